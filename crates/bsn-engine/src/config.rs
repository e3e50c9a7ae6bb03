//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use bsn_common::{BsnError, Result, QOS_ATTRIBUTE};
use bsn_model::{GoalTree, Node};

/// Environment variable prefix (`BSN__SETPOINT`, `BSN__TRANSPORT__NATS_URL`, ...)
pub const ENV_PREFIX: &str = "BSN";

/// The formula is re-fetched every `monitor_freq * RELOAD_FACTOR` ticks
pub const RELOAD_FACTOR: f64 = 10.0;

/// Shortest accepted control-loop period
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Longest accepted control-loop period
pub const MAX_TICK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Adaptation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name this engine uses as message source
    pub source: String,
    /// Managed QoS attribute, also the formula name in the repository
    pub qos_attribute: String,
    /// Target QoS (set-point)
    pub setpoint: f64,
    /// Relative offset applied when candidates are reseeded
    pub offset: f64,
    /// Proportional gain of each search step
    pub gain: f64,
    /// Precision requested for reliability observations
    pub info_quant: u32,
    /// Ticks per second
    pub monitor_freq: f64,
    /// Plans per second, at most
    pub actuation_freq: f64,
    /// Relative stability margin around the set-point
    pub stability_margin: f64,
    /// Explicit reload period in ticks, overrides `monitor_freq * RELOAD_FACTOR`
    pub reload_ticks: Option<u64>,
    /// Repository query timeout
    pub query_timeout_ms: u64,
    /// Delay between formula fetch attempts while idle
    pub formula_poll_ms: u64,
    /// Messaging configuration
    pub transport: TransportSettings,
    /// Goal model used to cross-check formulas and exceptions
    pub goal_model: Option<GoalModelSettings>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source: "/engine".to_string(),
            qos_attribute: QOS_ATTRIBUTE.to_string(),
            setpoint: 0.9,
            offset: 0.0,
            gain: 0.01,
            info_quant: 0,
            monitor_freq: 1.0,
            actuation_freq: 1.0,
            stability_margin: 0.02,
            reload_ticks: None,
            query_timeout_ms: 1000,
            formula_poll_ms: 1000,
            transport: TransportSettings::default(),
            goal_model: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `.env`, an optional file, and `BSN__*` variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BsnError::Config(e.to_string()))?;

        let cfg: Self = settings
            .try_deserialize()
            .map_err(|e| BsnError::Config(e.to_string()))?;
        cfg.validate()?;

        debug!(?cfg, "Loaded engine configuration");
        Ok(cfg)
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(BsnError::Config(msg));

        if !(self.setpoint > 0.0 && self.setpoint <= 1.0) {
            return fail(format!("setpoint must be in (0, 1], got {}", self.setpoint));
        }
        for (name, value) in [
            ("offset", self.offset),
            ("gain", self.gain),
            ("stability_margin", self.stability_margin),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return fail(format!("{name} must be non-negative, got {value}"));
            }
        }
        for (name, value) in [
            ("monitor_freq", self.monitor_freq),
            ("actuation_freq", self.actuation_freq),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return fail(format!("{name} must be positive, got {value}"));
            }
        }
        let period = 1.0 / self.monitor_freq;
        if period < MIN_TICK_PERIOD.as_secs_f64() || period > MAX_TICK_PERIOD.as_secs_f64() {
            return fail(format!(
                "monitor_freq {} gives a tick period outside [{:?}, {:?}]",
                self.monitor_freq, MIN_TICK_PERIOD, MAX_TICK_PERIOD
            ));
        }
        if self.formula_poll_ms == 0 {
            return fail("formula_poll_ms must be positive".to_string());
        }
        if self.qos_attribute.trim().is_empty() {
            return fail("qos_attribute must not be empty".to_string());
        }
        if self.reload_ticks == Some(0) {
            return fail("reload_ticks must be positive".to_string());
        }
        Ok(())
    }

    /// Period of the control loop, kept within the accepted range
    pub fn tick_period(&self) -> Duration {
        let secs = 1.0 / self.monitor_freq;
        if !(secs >= MIN_TICK_PERIOD.as_secs_f64()) {
            MIN_TICK_PERIOD
        } else if secs > MAX_TICK_PERIOD.as_secs_f64() {
            MAX_TICK_PERIOD
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Number of ticks between formula reloads
    pub fn reload_interval(&self) -> u64 {
        self.reload_ticks
            .unwrap_or_else(|| (self.monitor_freq * RELOAD_FACTOR).ceil().max(1.0) as u64)
    }

    /// Monitor cycles that must elapse between two plans
    pub fn cycles_per_plan(&self) -> f64 {
        self.monitor_freq / self.actuation_freq
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn formula_poll(&self) -> Duration {
        Duration::from_millis(self.formula_poll_ms)
    }

    /// Repository query returning the formula text
    pub fn formula_query(&self) -> String {
        format!("{}_formula", self.qos_attribute)
    }

    /// Repository query returning reliability observations
    pub fn reliability_query(&self) -> String {
        format!("all:reliability:{}", self.info_quant)
    }
}

/// NATS subjects used by the adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub nats_url: String,
    /// Knowledge repository request/reply subject
    pub repository_subject: String,
    /// Actuation commands
    pub strategy_subject: String,
    /// Incoming component exceptions
    pub exception_subject: String,
    /// Engine parameter requests
    pub service_subject: String,
    /// Prometheus text exposition, request/reply
    pub metrics_subject: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            repository_subject: "bsn.data_access".to_string(),
            strategy_subject: "bsn.strategy".to_string(),
            exception_subject: "bsn.exception".to_string(),
            service_subject: "bsn.engine_request".to_string(),
            metrics_subject: "bsn.engine_metrics".to_string(),
        }
    }
}

/// Goal model declared in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalModelSettings {
    /// Actor owning the model
    #[serde(default = "default_actor")]
    pub actor: String,
    pub root: Node,
}

fn default_actor() -> String {
    "body_hub".to_string()
}

impl GoalModelSettings {
    pub fn build(&self) -> Result<GoalTree> {
        let mut tree = GoalTree::new(self.actor.clone());
        tree.set_root(self.root.clone())?;
        Ok(tree)
    }
}
