//! In-process adapters

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use bsn_common::{RepositoryError, TransportError};

use super::{Actuator, ExceptionMessage, ExceptionStream, Repository, StrategyCommand};

/// Repository answering from a query → content table
///
/// Unknown queries fail as unavailable, like an unreachable data access node.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    answers: RwLock<HashMap<String, String>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for a query
    pub fn set(&self, query: impl Into<String>, content: impl Into<String>) {
        self.answers.write().insert(query.into(), content.into());
    }

    /// Make a query fail
    pub fn remove(&self, query: &str) {
        self.answers.write().remove(query);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn query(&self, _source: &str, query: &str) -> Result<String, RepositoryError> {
        self.answers
            .read()
            .get(query)
            .cloned()
            .ok_or_else(|| RepositoryError::Unavailable {
                query: query.to_string(),
                reason: "no answer configured".to_string(),
            })
    }
}

/// Actuator forwarding commands into a channel
#[derive(Debug, Clone)]
pub struct ChannelActuator {
    tx: mpsc::Sender<StrategyCommand>,
}

impl ChannelActuator {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StrategyCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Actuator for ChannelActuator {
    async fn publish(&self, command: StrategyCommand) -> Result<(), TransportError> {
        self.tx.send(command).await.map_err(|_| TransportError::Closed)
    }
}

/// Exception sender plus the stream the engine consumes
pub fn exception_channel(capacity: usize) -> (mpsc::Sender<ExceptionMessage>, ExceptionStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|msg| (msg, rx))
    });
    (tx, Box::pin(stream))
}
