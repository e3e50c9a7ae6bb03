//! # BSN Engine
//!
//! Reliability adaptation engine for the body sensor network.
//!
//! ## Control Loop
//!
//! ```text
//! Monitor → Analyze → (Plan) → Execute → Monitor ...
//! ```
//!
//! Where:
//! - Monitor: refresh the strategy from the knowledge repository
//! - Analyze: `error = setpoint - qos(strategy)`, plan when `|error| > margin * setpoint`
//! - Plan: priority-ordered coordinate search for an in-band strategy
//! - Execute: publish the reliability targets to the enactor

pub mod config;
pub mod engine;
pub mod exception;
pub mod execute;
pub mod monitor;
pub mod planner;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use config::{EngineConfig, TransportSettings};
pub use engine::{AdaptationEngine, TickOutcome};
pub use state::{EnginePhase, EngineState, StrategyStore};
pub use telemetry::EngineMetrics;
