use crate::competition::types::{
    parse_prices_payload, parse_roster_payload, PriceSnapshot, RawTraderRecord,
};
use crate::error::AppError;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

pub trait CompetitionSource: Send + Sync + 'static {
    fn fetch_roster(
        &self,
        competition_id: &str,
    ) -> impl Future<Output = Result<Vec<RawTraderRecord>, AppError>> + Send;

    fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> impl Future<Output = Result<PriceSnapshot, AppError>> + Send;
}

fn roster_endpoint(base_url: &str, competition_id: &str) -> String {
    format!("{base_url}/api/competitions/{competition_id}/traders")
}

fn prices_endpoint(base_url: &str, symbols: &[String]) -> String {
    format!("{base_url}/api/prices?symbols={}", symbols.join(","))
}

#[derive(Debug, Clone)]
pub struct HttpCompetitionSource {
    client: Client,
    base_url: String,
}

impl HttpCompetitionSource {
    pub fn new(base_url: &str, request_timeout_ms: u64) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_body(&self, endpoint: String) -> Result<Vec<u8>, AppError> {
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl CompetitionSource for HttpCompetitionSource {
    async fn fetch_roster(&self, competition_id: &str) -> Result<Vec<RawTraderRecord>, AppError> {
        let mut body = self
            .fetch_body(roster_endpoint(&self.base_url, competition_id))
            .await?;
        parse_roster_payload(body.as_mut_slice())
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<PriceSnapshot, AppError> {
        let mut body = self
            .fetch_body(prices_endpoint(&self.base_url, symbols))
            .await?;
        parse_prices_payload(body.as_mut_slice(), now_unix_ms())
    }
}

pub fn now_unix_ms() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
