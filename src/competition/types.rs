use crate::competition::checksum::DriftSnapshot;
use crate::competition::epoch::{EpochPhase, EpochSnapshot};
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_SYMBOLS: [&str; 3] = ["BTC", "ETH", "SOL"];
pub const DEFAULT_FAST_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SLOW_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const MIN_FAST_INTERVAL_MS: u64 = 100;
pub const MAX_FAST_INTERVAL_MS: u64 = 5_000;
pub const MIN_SLOW_INTERVAL_MS: u64 = 5_000;
pub const MAX_SLOW_INTERVAL_MS: u64 = 600_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
/// PnL is rounded to cents before it enters a state checksum.
pub const PNL_CHECKSUM_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            other => Err(AppError::Provider(format!("unknown exposure side '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exposure {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
}

impl Exposure {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - price) * self.quantity,
        }
    }

    pub fn entry_notional(&self) -> f64 {
        self.quantity * self.entry_price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTraderRecord {
    pub address: String,
    pub display_name: String,
    pub exposures: Vec<Exposure>,
    pub unused_balance: f64,
    pub last_activity_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSnapshot {
    pub prices: HashMap<String, f64>,
    pub observed_at_ms: i64,
}

impl PriceSnapshot {
    pub fn new(prices: HashMap<String, f64>, observed_at_ms: i64) -> Self {
        Self {
            prices,
            observed_at_ms,
        }
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraderState {
    pub address: String,
    pub display_name: String,
    pub exposures: Vec<Exposure>,
    pub unused_balance: f64,
    pub total_pnl: f64,
    pub total_equity: f64,
    pub total_pnl_percentage: f64,
    pub current_rank: Option<u32>,
    pub previous_rank: Option<u32>,
    pub rank_delta: i64,
    pub is_live: bool,
    pub last_update_timestamp: i64,
    pub last_activity_ms: Option<i64>,
    #[serde(skip)]
    pub input_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PnlLeader {
    pub address: String,
    pub pnl: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub participant_count: usize,
    pub total_volume: f64,
    pub total_pnl: f64,
    pub total_equity: f64,
    pub average_pnl: f64,
    pub median_pnl: f64,
    pub profitable_count: usize,
    pub losing_count: usize,
    pub flat_count: usize,
    pub best: Option<PnlLeader>,
    pub worst: Option<PnlLeader>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Ready,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardView {
    pub session_state: SessionState,
    pub competition_id: String,
    pub traders: Vec<TraderState>,
    pub stats: AggregateStats,
    pub epoch: Option<EpochSnapshot>,
    pub checksum: u64,
    pub drift: DriftSnapshot,
    pub last_full_refresh_ms: Option<i64>,
    pub last_price_refresh_ms: Option<i64>,
    pub stale: bool,
    pub error: Option<String>,
}

impl LeaderboardView {
    pub fn initializing(competition_id: String) -> Self {
        Self {
            session_state: SessionState::Initializing,
            competition_id,
            traders: Vec::new(),
            stats: AggregateStats::default(),
            epoch: None,
            checksum: 0,
            drift: DriftSnapshot::default(),
            last_full_refresh_ms: None,
            last_price_refresh_ms: None,
            stale: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardStatusSnapshot {
    pub session_state: SessionState,
    pub competition_id: String,
    pub trader_count: usize,
    pub phase: Option<EpochPhase>,
    pub time_remaining_ms: Option<i64>,
    pub stale: bool,
    pub error: Option<String>,
    pub reconciliations: u64,
    pub drift_events: u64,
    pub last_full_refresh_ms: Option<i64>,
    pub last_price_refresh_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EpochArgs {
    pub epoch_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartLeaderboardArgs {
    pub competition_id: Option<String>,
    pub api_base_url: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub fast_interval_ms: Option<u64>,
    pub slow_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub epoch: Option<EpochArgs>,
}

#[derive(Debug, Clone)]
pub struct LeaderboardConfig {
    pub competition_id: String,
    pub api_base_url: String,
    pub symbols: Vec<String>,
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub epoch: Option<EpochArgs>,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match env_value(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::InvalidArgument(format!("{key} must be numeric, got '{raw}'"))),
        None => Ok(None),
    }
}

impl StartLeaderboardArgs {
    pub fn from_env() -> Result<Self, AppError> {
        let symbols = env_value("LEADERBOARD_SYMBOLS").map(|raw| {
            raw.split(',')
                .map(|symbol| symbol.trim().to_string())
                .filter(|symbol| !symbol.is_empty())
                .collect::<Vec<_>>()
        });

        let epoch = match env_value("LEADERBOARD_EPOCH_ID") {
            Some(epoch_id) => {
                let start_ms = env_number::<i64>("LEADERBOARD_EPOCH_START_MS")?.ok_or_else(|| {
                    AppError::InvalidArgument(
                        "LEADERBOARD_EPOCH_START_MS is required with LEADERBOARD_EPOCH_ID"
                            .to_string(),
                    )
                })?;
                let end_ms = env_number::<i64>("LEADERBOARD_EPOCH_END_MS")?.ok_or_else(|| {
                    AppError::InvalidArgument(
                        "LEADERBOARD_EPOCH_END_MS is required with LEADERBOARD_EPOCH_ID"
                            .to_string(),
                    )
                })?;
                Some(EpochArgs {
                    epoch_id,
                    start_ms,
                    end_ms,
                })
            }
            None => None,
        };

        Ok(Self {
            competition_id: env_value("LEADERBOARD_COMPETITION_ID"),
            api_base_url: env_value("LEADERBOARD_API_URL"),
            symbols,
            fast_interval_ms: env_number("LEADERBOARD_FAST_MS")?,
            slow_interval_ms: env_number("LEADERBOARD_SLOW_MS")?,
            request_timeout_ms: env_number("LEADERBOARD_TIMEOUT_MS")?,
            epoch,
        })
    }

    pub fn normalize(self) -> Result<LeaderboardConfig, AppError> {
        let competition_id = self.competition_id.unwrap_or_default().trim().to_string();
        if competition_id.is_empty()
            || !competition_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(AppError::InvalidArgument(
                "competitionId must be non-empty and contain only [A-Za-z0-9_-]".to_string(),
            ));
        }

        let api_base_url = self
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            return Err(AppError::InvalidArgument(
                "apiBaseUrl must start with http:// or https://".to_string(),
            ));
        }

        let raw_symbols = self.symbols.unwrap_or_else(|| {
            DEFAULT_SYMBOLS
                .iter()
                .map(|symbol| symbol.to_string())
                .collect()
        });
        let mut symbols: Vec<String> = Vec::with_capacity(raw_symbols.len());
        for raw in raw_symbols {
            let symbol = raw.trim().to_ascii_uppercase();
            if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                return Err(AppError::InvalidArgument(format!(
                    "symbol '{raw}' must be non-empty alphanumeric ASCII"
                )));
            }
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if symbols.is_empty() {
            return Err(AppError::InvalidArgument(
                "at least one symbol is required".to_string(),
            ));
        }

        let fast_interval_ms = self.fast_interval_ms.unwrap_or(DEFAULT_FAST_INTERVAL_MS);
        if !(MIN_FAST_INTERVAL_MS..=MAX_FAST_INTERVAL_MS).contains(&fast_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "fastIntervalMs must be between {MIN_FAST_INTERVAL_MS} and {MAX_FAST_INTERVAL_MS}"
            )));
        }

        let slow_interval_ms = self.slow_interval_ms.unwrap_or(DEFAULT_SLOW_INTERVAL_MS);
        if !(MIN_SLOW_INTERVAL_MS..=MAX_SLOW_INTERVAL_MS).contains(&slow_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "slowIntervalMs must be between {MIN_SLOW_INTERVAL_MS} and {MAX_SLOW_INTERVAL_MS}"
            )));
        }
        if slow_interval_ms <= fast_interval_ms {
            return Err(AppError::InvalidArgument(
                "slowIntervalMs must exceed fastIntervalMs".to_string(),
            ));
        }

        let request_timeout_ms = self
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&request_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "requestTimeoutMs must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }

        Ok(LeaderboardConfig {
            competition_id,
            api_base_url,
            symbols,
            fast_interval_ms,
            slow_interval_ms,
            request_timeout_ms,
            epoch: self.epoch,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSession {
    pub running: bool,
    pub competition_id: String,
    pub symbols: Vec<String>,
    pub fast_interval_ms: u64,
    pub slow_interval_ms: u64,
    pub epoch_id: Option<String>,
}

impl LeaderboardSession {
    pub fn from_config(config: &LeaderboardConfig) -> Self {
        Self {
            running: true,
            competition_id: config.competition_id.clone(),
            symbols: config.symbols.clone(),
            fast_interval_ms: config.fast_interval_ms,
            slow_interval_ms: config.slow_interval_ms,
            epoch_id: config.epoch.as_ref().map(|epoch| epoch.epoch_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardStopResult {
    pub stopped: bool,
}

/// Providers send numbers either as JSON numbers or as decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Number(f64),
    Text(String),
}

impl WireNumber {
    pub fn to_f64(&self) -> Result<f64, AppError> {
        let value = match self {
            Self::Number(value) => *value,
            Self::Text(raw) => raw.trim().parse::<f64>()?,
        };
        if !value.is_finite() {
            return Err(AppError::Provider(format!("non-finite number {value}")));
        }
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureWire {
    pub symbol: String,
    pub side: String,
    pub quantity: WireNumber,
    pub entry_price: WireNumber,
}

impl TryFrom<ExposureWire> for Exposure {
    type Error = AppError;

    fn try_from(value: ExposureWire) -> Result<Self, Self::Error> {
        let symbol = value.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(AppError::Provider("exposure symbol is empty".to_string()));
        }
        let side = Side::parse_str(&value.side)?;
        let quantity = value.quantity.to_f64()?;
        let entry_price = value.entry_price.to_f64()?;
        if quantity < 0.0 || entry_price <= 0.0 {
            return Err(AppError::Provider(format!(
                "exposure on {symbol} must have quantity >= 0 and entryPrice > 0"
            )));
        }

        Ok(Self {
            symbol,
            side,
            quantity,
            entry_price,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTraderWire {
    pub address: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub exposures: Vec<ExposureWire>,
    pub unused_balance: WireNumber,
    #[serde(default)]
    pub last_activity_ms: Option<i64>,
}

impl TryFrom<RawTraderWire> for RawTraderRecord {
    type Error = AppError;

    fn try_from(value: RawTraderWire) -> Result<Self, Self::Error> {
        let address = value.address.trim().to_string();
        if address.is_empty() {
            return Err(AppError::Provider("trader address is empty".to_string()));
        }
        let display_name = value
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| address.clone());
        let unused_balance = value.unused_balance.to_f64()?;

        let mut exposures = Vec::with_capacity(value.exposures.len());
        for exposure in value.exposures {
            exposures.push(exposure.try_into()?);
        }

        Ok(Self {
            address,
            display_name,
            exposures,
            unused_balance,
            last_activity_ms: value.last_activity_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RosterWire {
    pub traders: Vec<RawTraderWire>,
}

#[derive(Debug, Deserialize)]
pub struct PricesWire {
    pub prices: HashMap<String, WireNumber>,
}

pub fn parse_roster_payload(payload: &mut [u8]) -> Result<Vec<RawTraderRecord>, AppError> {
    let wire: RosterWire = simd_json::serde::from_slice(payload)?;
    let mut traders = Vec::with_capacity(wire.traders.len());
    for trader in wire.traders {
        traders.push(trader.try_into()?);
    }
    Ok(traders)
}

/// Unusable quotes are dropped so the exposure falls back to the missing-price policy.
pub fn parse_prices_payload(
    payload: &mut [u8],
    observed_at_ms: i64,
) -> Result<PriceSnapshot, AppError> {
    let wire: PricesWire = simd_json::serde::from_slice(payload)?;
    let mut prices = HashMap::with_capacity(wire.prices.len());
    for (symbol, raw_price) in wire.prices {
        match raw_price.to_f64() {
            Ok(price) if price > 0.0 => {
                prices.insert(symbol.trim().to_ascii_uppercase(), price);
            }
            Ok(price) => {
                tracing::debug!(symbol = %symbol, price, "dropping non-positive price quote");
            }
            Err(error) => {
                tracing::debug!(symbol = %symbol, %error, "dropping unparseable price quote");
            }
        }
    }
    Ok(PriceSnapshot::new(prices, observed_at_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_and_short_exposures_mirror_each_other() {
        let long = Exposure {
            symbol: "BTC".to_string(),
            side: Side::Long,
            quantity: 10.0,
            entry_price: 100.0,
        };
        let short = Exposure {
            side: Side::Short,
            ..long.clone()
        };

        assert_eq!(long.unrealized_pnl(110.0), 100.0);
        assert_eq!(short.unrealized_pnl(110.0), -100.0);
        assert_eq!(long.entry_notional(), 1_000.0);
    }

    #[test]
    fn parses_side_case_insensitively() {
        assert_eq!(Side::parse_str("LONG").expect("long"), Side::Long);
        assert_eq!(Side::parse_str(" Short ").expect("short"), Side::Short);
        assert!(Side::parse_str("flat").is_err());
    }

    #[test]
    fn parses_roster_payload_with_string_and_number_values() {
        let mut payload = br#"{"traders":[
            {"address":"0xabc","displayName":"Alice","unusedBalance":"1000.5","lastActivityMs":17,
             "exposures":[{"symbol":"btc","side":"long","quantity":"2","entryPrice":100}]},
            {"address":"0xdef","unusedBalance":0}
        ]}"#
        .to_vec();

        let traders = parse_roster_payload(&mut payload).expect("roster should parse");

        assert_eq!(traders.len(), 2);
        assert_eq!(traders[0].display_name, "Alice");
        assert_eq!(traders[0].unused_balance, 1000.5);
        assert_eq!(traders[0].last_activity_ms, Some(17));
        assert_eq!(traders[0].exposures[0].symbol, "BTC");
        assert_eq!(traders[0].exposures[0].quantity, 2.0);
        assert_eq!(traders[1].display_name, "0xdef");
        assert!(traders[1].exposures.is_empty());
    }

    #[test]
    fn rejects_roster_with_invalid_exposure() {
        let mut payload = br#"{"traders":[
            {"address":"0xabc","unusedBalance":"10",
             "exposures":[{"symbol":"BTC","side":"long","quantity":"-1","entryPrice":"100"}]}
        ]}"#
        .to_vec();

        assert!(parse_roster_payload(&mut payload).is_err());

        let mut zero_entry = br#"{"traders":[
            {"address":"0xabc","unusedBalance":"10",
             "exposures":[{"symbol":"BTC","side":"short","quantity":"1","entryPrice":"0"}]}
        ]}"#
        .to_vec();

        assert!(parse_roster_payload(&mut zero_entry).is_err());
    }

    #[test]
    fn drops_unusable_price_quotes() {
        let mut payload =
            br#"{"prices":{"btc":"101.5","ETH":2000,"SOL":"broken","DOGE":"-1"}}"#.to_vec();

        let snapshot = parse_prices_payload(&mut payload, 42).expect("prices should parse");

        assert_eq!(snapshot.observed_at_ms, 42);
        assert_eq!(snapshot.price("BTC"), Some(101.5));
        assert_eq!(snapshot.price("ETH"), Some(2000.0));
        assert_eq!(snapshot.price("SOL"), None);
        assert_eq!(snapshot.price("DOGE"), None);
    }

    #[test]
    fn normalizes_start_args_defaults() {
        let config = StartLeaderboardArgs {
            competition_id: Some(" season-1 ".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("defaults should be valid");

        assert_eq!(config.competition_id, "season-1");
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.symbols, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(config.fast_interval_ms, DEFAULT_FAST_INTERVAL_MS);
        assert_eq!(config.slow_interval_ms, DEFAULT_SLOW_INTERVAL_MS);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert!(config.epoch.is_none());
    }

    #[test]
    fn requires_competition_id() {
        assert!(StartLeaderboardArgs::default().normalize().is_err());
        let result = StartLeaderboardArgs {
            competition_id: Some("bad id!".to_string()),
            ..Default::default()
        }
        .normalize();
        assert!(result.is_err());
    }

    #[test]
    fn uppercases_and_dedups_symbols() {
        let config = StartLeaderboardArgs {
            competition_id: Some("cup".to_string()),
            symbols: Some(vec!["eth".to_string(), "ETH".to_string(), "btc".to_string()]),
            api_base_url: Some("https://api.example.com/".to_string()),
            ..Default::default()
        }
        .normalize()
        .expect("symbols should normalize");

        assert_eq!(config.symbols, vec!["ETH", "BTC"]);
        assert_eq!(config.api_base_url, "https://api.example.com");
    }

    #[test]
    fn validates_interval_ranges() {
        let too_fast = StartLeaderboardArgs {
            competition_id: Some("cup".to_string()),
            fast_interval_ms: Some(10),
            ..Default::default()
        }
        .normalize();
        assert!(too_fast.is_err());

        let too_slow = StartLeaderboardArgs {
            competition_id: Some("cup".to_string()),
            slow_interval_ms: Some(1_000),
            ..Default::default()
        }
        .normalize();
        assert!(too_slow.is_err());

        let inverted = StartLeaderboardArgs {
            competition_id: Some("cup".to_string()),
            fast_interval_ms: Some(5_000),
            slow_interval_ms: Some(5_000),
            ..Default::default()
        }
        .normalize();
        assert!(inverted.is_err());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let result = StartLeaderboardArgs {
            competition_id: Some("cup".to_string()),
            api_base_url: Some("ftp://example.com".to_string()),
            ..Default::default()
        }
        .normalize();

        assert!(result.is_err());
    }
}
