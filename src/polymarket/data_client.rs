use reqwest::Client;
use thiserror::Error;

use super::types::ApiTrade;
use crate::models::short;

const DATA_API_BASE: &str = "https://data-api.polymarket.com";

#[derive(Debug, Error)]
pub enum DataClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone)]
pub struct DataClient {
    http: Client,
    base_url: String,
}

impl DataClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: DATA_API_BASE.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch the most recent trades of one wallet, newest first.
    pub async fn get_user_trades(
        &self,
        user: &str,
        limit: u32,
    ) -> Result<Vec<ApiTrade>, DataClientError> {
        let url = format!("{}/trades", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[("user", user), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = resp.json().await?;
        match body {
            serde_json::Value::Array(_) => serde_json::from_value(body)
                .map_err(|e| DataClientError::Unexpected(e.to_string())),
            other => Err(DataClientError::Unexpected(format!(
                "expected array of trades, got {}",
                short(&other.to_string(), 120)
            ))),
        }
    }
}
