//! Facility check-in/out and occupancy

use gym_api::{ApiClient, ApiRequest, Result};
use gym_auth::{CHECK_IN_PATH, CHECK_OUT_PATH, CHECK_STATUS_PATH, CONCURRENCY_PATH};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CheckRepository {
    client: ApiClient,
}

impl CheckRepository {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Register entry. Returns the server's confirmation message.
    pub async fn check_in(&self) -> Result<String> {
        let reply: Value = self.client.send_json(ApiRequest::post(CHECK_IN_PATH)).await?;
        Ok(message_of(reply))
    }

    /// Register exit. Returns the server's confirmation message.
    pub async fn check_out(&self) -> Result<String> {
        let reply: Value = self.client.send_json(ApiRequest::post(CHECK_OUT_PATH)).await?;
        Ok(message_of(reply))
    }

    /// Members currently inside. The backend answers either a bare number or
    /// `{"count": n}`; anything non-numeric counts as 0.
    pub async fn concurrency(&self) -> Result<u32> {
        let reply: Value = self.client.get(CONCURRENCY_PATH).await?;
        let count = occupancy_count(&reply);
        debug!(count, "occupancy fetched");
        Ok(count)
    }

    /// Whether the current member is checked in.
    pub async fn is_inside(&self) -> Result<bool> {
        self.client.get(CHECK_STATUS_PATH).await
    }
}

fn occupancy_count(reply: &Value) -> u32 {
    let number = match reply {
        Value::Object(map) => map.get("count").unwrap_or(&Value::Null),
        other => other,
    };
    number
        .as_u64()
        .or_else(|| number.as_f64().filter(|n| n.is_finite() && *n >= 0.0).map(|n| n as u64))
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn message_of(reply: Value) -> String {
    match reply {
        Value::String(message) => message,
        Value::Object(ref map) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => reply.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
