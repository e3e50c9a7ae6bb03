//! Engine parameter service
//!
//! Other managers ask the engine which QoS attribute it adapts.

use serde::{Deserialize, Serialize};

use bsn_common::{BsnError, Result};

use crate::engine::AdaptationEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineResponse {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            error: Some(error.into()),
        }
    }
}

impl AdaptationEngine {
    /// Managed QoS attribute
    pub fn qos_attribute(&self) -> Result<String> {
        let attribute = self.config().qos_attribute;
        if attribute.is_empty() {
            return Err(BsnError::Config("qos_attribute is empty".to_string()));
        }
        Ok(attribute)
    }

    /// Answer an engine parameter request
    pub fn handle_request(&self, request: &EngineRequest) -> Result<EngineResponse> {
        tracing::debug!(requester = %request.name, "Engine parameter request");
        Ok(EngineResponse::success(self.qos_attribute()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::transport::{ChannelActuator, InMemoryRepository};

    #[test]
    fn test_handle_request() {
        let (actuator, _rx) = ChannelActuator::new(1);
        let engine = AdaptationEngine::new(
            EngineConfig::default(),
            Arc::new(InMemoryRepository::new()),
            Arc::new(actuator),
        )
        .unwrap();

        let response = engine
            .handle_request(&EngineRequest {
                name: "/enactor".to_string(),
            })
            .unwrap();
        assert_eq!(response, EngineResponse::success("reliability"));
    }

    #[test]
    fn test_response_json() {
        let json = serde_json::to_string(&EngineResponse::success("reliability")).unwrap();
        assert_eq!(json, r#"{"content":"reliability"}"#);

        let failed: EngineResponse =
            serde_json::from_str(r#"{"content":"","error":"boom"}"#).unwrap();
        assert_eq!(failed, EngineResponse::failure("boom"));
    }
}
