//! Boundary to the knowledge repository and the actuation channel
//!
//! The engine only sees the [`Repository`] and [`Actuator`] traits. The
//! in-memory adapters back tests and local runs; the NATS adapters back the
//! deployed engine.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use bsn_common::{RepositoryError, TransportError};

pub use memory::{exception_channel, ChannelActuator, InMemoryRepository};
pub use nats::{NatsActuator, NatsRepository};

/// Actuation command published by Execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyCommand {
    pub source: String,
    pub target: String,
    pub content: String,
}

/// Exception raised by a component, `content` is `<path>=<delta>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionMessage {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    pub content: String,
}

impl ExceptionMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            source: String::new(),
            target: String::new(),
            content: content.into(),
        }
    }
}

/// Repository request envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessRequest {
    pub name: String,
    pub query: String,
}

/// Repository reply envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessResponse {
    pub content: String,
}

/// Knowledge repository queried by Monitor and formula reload
#[async_trait]
pub trait Repository: Send + Sync {
    /// Run `query` on behalf of `source`, returning the raw delimited answer
    async fn query(&self, source: &str, query: &str) -> Result<String, RepositoryError>;
}

/// Sink for actuation commands
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn publish(&self, command: StrategyCommand) -> Result<(), TransportError>;
}

/// Stream of incoming exceptions
pub type ExceptionStream = std::pin::Pin<Box<dyn Stream<Item = ExceptionMessage> + Send>>;
