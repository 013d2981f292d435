//! Heart-rate samples

use gym_api::{ApiClient, ApiRequest, Result};
use gym_auth::heart_rate_path;
use tracing::debug;

use crate::model::HeartRate;
use crate::validation::{validate_heart_rate, validate_user_id};

#[derive(Debug, Clone)]
pub struct HeartRateRepository {
    client: ApiClient,
}

impl HeartRateRepository {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Store one reading for `user_id`; returns the stored sample.
    pub async fn save(&self, user_id: u64, bpm: u32) -> Result<HeartRate> {
        validate_heart_rate(user_id, bpm)?;
        let request = ApiRequest::post(heart_rate_path(user_id)).query("bpm", bpm);
        let sample: HeartRate = self.client.send_json(request).await?;
        debug!(user_id, sample_id = sample.id, "heart rate stored");
        Ok(sample)
    }

    /// All samples for `user_id`, in the order the server returns them.
    pub async fn history(&self, user_id: u64) -> Result<Vec<HeartRate>> {
        validate_user_id(user_id)?;
        let samples: Option<Vec<HeartRate>> =
            self.client.get(&heart_rate_path(user_id)).await?;
        Ok(samples.unwrap_or_default())
    }
}
