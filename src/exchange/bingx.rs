use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::{self, ApiCredentials, Clock, ParamSet, SystemClock};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::model::{BalanceSnapshot, ExchangeKind, PriceObservation};

const BINGX_BASE_URL: &str = "https://open-api.bingx.com";
const PREMIUM_INDEX_PATH: &str = "/openApi/cswap/v1/market/premiumIndex";
const ACCOUNT_BALANCE_PATH: &str = "/openApi/account/v1/allAccountBalance";
/// Window (ms) the exchange accepts between our timestamp and its own clock.
const RECV_WINDOW_MS: u32 = 6000;
/// BingX allows 10 signed req/s per IP; use 5 for safety margin.
const BINGX_REQUESTS_PER_SECOND: u32 = 5;

pub struct BingxExchange {
    client: reqwest::Client,
    base_url: String,
    credentials: ApiCredentials,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BingxExchange {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self::with_base_url(credentials, BINGX_BASE_URL)
    }

    pub fn with_base_url(credentials: ApiCredentials, base_url: impl Into<String>) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(BINGX_REQUESTS_PER_SECOND).unwrap());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            clock: Arc::new(SystemClock),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sign and issue a GET, decoding the JSON envelope into `T`.
    async fn signed_get<T>(&self, path: &str, params: &ParamSet) -> Result<T, Report<ExchangeError>>
    where
        T: serde::de::DeserializeOwned,
    {
        // Wait for rate limiter before making the request
        self.rate_limiter.until_ready().await;

        let request = auth::build_signed_request(
            &self.base_url,
            path,
            params,
            &self.credentials,
            self.clock.as_ref(),
        )
        .change_context(ExchangeError::Request {
            exchange: "bingx".into(),
        })?;

        debug!(path, timestamp = request.timestamp_ms, "issuing signed request");

        let response = self
            .client
            .get(&request.url)
            .header(request.header_name, &request.header_value)
            .send()
            .await
            .change_context(ExchangeError::Request {
                exchange: "bingx".into(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(ExchangeError::Request {
                exchange: "bingx".into(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        response
            .json()
            .await
            .change_context(ExchangeError::ResponseParse {
                exchange: "bingx".into(),
            })
    }
}

impl Exchange for BingxExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Bingx
    }

    fn fetch_price(
        &self,
        token: &str,
    ) -> BoxFuture<'_, Result<PriceObservation, Report<ExchangeError>>> {
        let token = token.to_owned();
        Box::pin(async move {
            let mut params = ParamSet::new();
            params.insert("symbol", format!("{token}-USD"));

            let body: PremiumIndexResponse =
                self.signed_get(PREMIUM_INDEX_PATH, &params).await?;

            let observation = body.into_observation(&token)?;

            info!(
                token = %observation.token,
                price = observation.price,
                "bingx price fetch complete"
            );

            Ok(observation)
        })
    }

    fn fetch_balances(&self) -> BoxFuture<'_, Result<BalanceSnapshot, Report<ExchangeError>>> {
        Box::pin(async move {
            let mut params = ParamSet::new();
            params.insert("recvWindow", RECV_WINDOW_MS);

            let body: AccountBalanceResponse =
                self.signed_get(ACCOUNT_BALANCE_PATH, &params).await?;

            let snapshot = body.into_snapshot()?;

            info!(accounts = snapshot.entries.len(), "bingx balance fetch complete");

            Ok(snapshot)
        })
    }
}

fn parse_f64(s: &str) -> Result<f64, Report<ExchangeError>> {
    s.parse::<f64>().change_context(ExchangeError::ResponseParse {
        exchange: "bingx".into(),
    })
}

fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

// ── REST response types ───────────────────────────────────────────────────────

/// `GET /openApi/cswap/v1/market/premiumIndex` envelope.
#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    /// Server time (ms epoch); recorded as the observation time.
    timestamp: i64,
    data: Vec<PremiumIndexRow>,
}

#[derive(Debug, Deserialize)]
struct PremiumIndexRow {
    #[serde(rename = "markPrice")]
    mark_price: String,
}

impl PremiumIndexResponse {
    fn into_observation(self, token: &str) -> Result<PriceObservation, Report<ExchangeError>> {
        let row = self.data.first().ok_or_else(|| {
            Report::new(ExchangeError::Api {
                exchange: "bingx".into(),
            })
            .attach("premiumIndex returned no rows")
        })?;

        Ok(PriceObservation {
            exchange: ExchangeKind::Bingx,
            token: token.to_owned(),
            price: parse_f64(&row.mark_price)?,
            taken_at: timestamp_from_millis(self.timestamp),
        })
    }
}

/// `GET /openApi/account/v1/allAccountBalance` envelope.
#[derive(Debug, Deserialize)]
struct AccountBalanceResponse {
    timestamp: i64,
    data: Vec<AccountBalanceRow>,
}

#[derive(Debug, Deserialize)]
struct AccountBalanceRow {
    #[serde(rename = "accountType")]
    account_type: String,
    #[serde(rename = "usdtBalance")]
    usdt_balance: String,
}

impl AccountBalanceResponse {
    /// Keep only accounts holding a positive balance. The API reports the
    /// spot wallet under the misspelled type `"sopt"`; normalize it.
    fn into_snapshot(self) -> Result<BalanceSnapshot, Report<ExchangeError>> {
        let mut entries = BTreeMap::new();
        for row in &self.data {
            let balance = parse_f64(&row.usdt_balance)?;
            if balance > 0.0 {
                let account = if row.account_type == "sopt" {
                    "spot"
                } else {
                    row.account_type.as_str()
                };
                entries.insert(account.to_owned(), balance);
            }
        }

        Ok(BalanceSnapshot {
            exchange: ExchangeKind::Bingx,
            taken_at: timestamp_from_millis(self.timestamp),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_index_parses_into_observation() {
        let body = r#"{
            "code": 0,
            "timestamp": 1700000000000,
            "data": [{"symbol": "BTC-USD", "markPrice": "42123.5", "indexPrice": "42120.1"}]
        }"#;
        let response: PremiumIndexResponse = serde_json::from_str(body).unwrap();
        let observation = response.into_observation("BTC").unwrap();

        assert_eq!(observation.exchange, ExchangeKind::Bingx);
        assert_eq!(observation.token, "BTC");
        assert_eq!(observation.price, 42123.5);
        assert_eq!(observation.taken_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn premium_index_empty_data_is_an_api_error() {
        let body = r#"{"code": 0, "timestamp": 1700000000000, "data": []}"#;
        let response: PremiumIndexResponse = serde_json::from_str(body).unwrap();
        assert!(response.into_observation("BTC").is_err());
    }

    #[test]
    fn premium_index_unparseable_price_is_an_error() {
        let body = r#"{
            "code": 0,
            "timestamp": 1700000000000,
            "data": [{"markPrice": "not-a-number"}]
        }"#;
        let response: PremiumIndexResponse = serde_json::from_str(body).unwrap();
        assert!(response.into_observation("BTC").is_err());
    }

    #[test]
    fn balances_skip_zero_and_normalize_sopt() {
        let body = r#"{
            "code": 0,
            "timestamp": 1700000000000,
            "data": [
                {"accountType": "sopt", "usdtBalance": "120.5"},
                {"accountType": "swap", "usdtBalance": "44.25"},
                {"accountType": "fund", "usdtBalance": "0"}
            ]
        }"#;
        let response: AccountBalanceResponse = serde_json::from_str(body).unwrap();
        let snapshot = response.into_snapshot().unwrap();

        assert_eq!(snapshot.exchange, ExchangeKind::Bingx);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries["spot"], 120.5);
        assert_eq!(snapshot.entries["swap"], 44.25);
        assert!(!snapshot.entries.contains_key("fund"));
        assert!(!snapshot.entries.contains_key("sopt"));
    }

    #[test]
    fn balances_all_zero_yield_empty_snapshot() {
        let body = r#"{
            "code": 0,
            "timestamp": 1700000000000,
            "data": [{"accountType": "swap", "usdtBalance": "0.0"}]
        }"#;
        let response: AccountBalanceResponse = serde_json::from_str(body).unwrap();
        let snapshot = response.into_snapshot().unwrap();
        assert!(snapshot.entries.is_empty());
    }

    /// Integration test: requires network access and live credentials.
    /// Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_price() {
        let credentials = ApiCredentials::new(
            std::env::var("BINGX_APIKEY").unwrap(),
            std::env::var("BINGX_SECRETKEY").unwrap(),
        );
        let exchange = BingxExchange::new(credentials);
        let observation = exchange.fetch_price("BTC").await.unwrap();
        assert!(observation.price > 0.0);
    }

    #[test]
    fn test_clock_is_injectable() {
        struct FixedClock;
        impl Clock for FixedClock {
            fn now_millis(&self) -> i64 {
                1_700_000_000_000
            }
        }

        let exchange = BingxExchange::new(ApiCredentials::new("k", "s"))
            .with_clock(Arc::new(FixedClock));
        assert_eq!(exchange.clock.now_millis(), 1_700_000_000_000);
    }
}
