//! NATS adapters
//!
//! Payloads are JSON. The repository is a request/reply responder on one
//! subject; actuation and exceptions are plain publish/subscribe.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use bsn_common::{BsnError, RepositoryError, Result, TransportError};

use super::{
    Actuator, DataAccessRequest, DataAccessResponse, ExceptionMessage, ExceptionStream,
    Repository, StrategyCommand,
};
use crate::engine::AdaptationEngine;
use crate::service::{EngineRequest, EngineResponse};
use crate::telemetry::export_metrics;

/// Connect to the NATS server
pub async fn connect(url: &str) -> Result<async_nats::Client> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;
    info!(url, "Connected to NATS");
    Ok(client)
}

/// Repository reached through NATS request/reply
#[derive(Debug, Clone)]
pub struct NatsRepository {
    client: async_nats::Client,
    subject: String,
}

impl NatsRepository {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Repository for NatsRepository {
    async fn query(&self, source: &str, query: &str) -> std::result::Result<String, RepositoryError> {
        let unavailable = |reason: String| RepositoryError::Unavailable {
            query: query.to_string(),
            reason,
        };

        let request = DataAccessRequest {
            name: source.to_string(),
            query: query.to_string(),
        };
        let payload = serde_json::to_vec(&request).map_err(|e| unavailable(e.to_string()))?;

        let reply = self
            .client
            .request(self.subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let response: DataAccessResponse =
            serde_json::from_slice(&reply.payload).map_err(|e| RepositoryError::Malformed {
                query: query.to_string(),
                reason: e.to_string(),
            })?;
        Ok(response.content)
    }
}

/// Actuator publishing strategy commands on a subject
#[derive(Debug, Clone)]
pub struct NatsActuator {
    client: async_nats::Client,
    subject: String,
}

impl NatsActuator {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl Actuator for NatsActuator {
    async fn publish(&self, command: StrategyCommand) -> std::result::Result<(), TransportError> {
        let publish_err = |reason: String| TransportError::Publish {
            subject: self.subject.clone(),
            reason,
        };

        let payload = serde_json::to_vec(&command).map_err(|e| publish_err(e.to_string()))?;
        self.client
            .publish(self.subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| publish_err(e.to_string()))
    }
}

/// Subscribe to exceptions; undecodable messages are logged and dropped
pub async fn exception_stream(client: &async_nats::Client, subject: &str) -> Result<ExceptionStream> {
    let subscriber = client
        .subscribe(subject.to_string())
        .await
        .map_err(|e| TransportError::Subscribe {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

    let stream = subscriber.filter_map(|msg| async move {
        match serde_json::from_slice::<ExceptionMessage>(&msg.payload) {
            Ok(exception) => Some(exception),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable exception message");
                None
            }
        }
    });
    Ok(Box::pin(stream))
}

/// Answer metrics scrapes with the Prometheus text exposition
pub async fn serve_metrics(
    client: async_nats::Client,
    subject: String,
    registry: prometheus::Registry,
) -> Result<()> {
    let mut requests = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| TransportError::Subscribe {
            subject: subject.clone(),
            reason: e.to_string(),
        })?;
    info!(%subject, "Serving metrics");

    while let Some(msg) = requests.next().await {
        let Some(reply) = msg.reply.as_ref().map(|r| r.to_string()) else {
            continue;
        };
        let text = match export_metrics(&registry) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode metrics");
                continue;
            }
        };
        if let Err(e) = client.publish(reply, Bytes::from(text)).await {
            warn!(error = %e, "Failed to answer metrics request");
        }
    }

    Ok(())
}

/// Answer engine parameter requests until the subscription closes
pub async fn serve_engine_requests(
    client: async_nats::Client,
    subject: String,
    engine: Arc<AdaptationEngine>,
) -> Result<()> {
    let mut requests = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| TransportError::Subscribe {
            subject: subject.clone(),
            reason: e.to_string(),
        })?;
    info!(%subject, "Serving engine requests");

    while let Some(msg) = requests.next().await {
        let Some(reply) = msg.reply.as_ref().map(|r| r.to_string()) else {
            debug!("Ignoring engine request without reply subject");
            continue;
        };

        let response = match serde_json::from_slice::<EngineRequest>(&msg.payload) {
            Ok(request) => engine.handle_request(&request),
            Err(e) => Err(BsnError::from(e)),
        };
        let body = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Engine request failed");
                EngineResponse::failure(e.to_string())
            }
        };

        let payload = serde_json::to_vec(&body)?;
        if let Err(e) = client.publish(reply, Bytes::from(payload)).await {
            warn!(error = %e, "Failed to answer engine request");
        }
    }

    Ok(())
}
