use reqwest::Client;
use thiserror::Error;

use super::types::GammaMarket;

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Error)]
pub enum GammaClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone)]
pub struct GammaClient {
    http: Client,
    base_url: String,
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GammaClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: GAMMA_API_BASE.into(),
        }
    }

    /// Look up one market by condition id.
    pub async fn get_market(&self, condition_id: &str) -> Result<Option<GammaMarket>, GammaClientError> {
        let url = format!("{}/markets", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("condition_ids", condition_id)])
            .send()
            .await?
            .error_for_status()?;

        let markets: Vec<GammaMarket> = resp.json().await?;
        Ok(markets
            .into_iter()
            .find(|m| m.condition_id.eq_ignore_ascii_case(condition_id)))
    }

    /// Market question, for notification titles.
    pub async fn market_title(&self, condition_id: &str) -> Result<String, GammaClientError> {
        self.get_market(condition_id)
            .await?
            .map(|m| m.question)
            .ok_or_else(|| GammaClientError::Unexpected(format!("no market for {condition_id}")))
    }
}
