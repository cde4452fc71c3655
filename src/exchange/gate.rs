use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tracing::info;

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::model::{BalanceSnapshot, ExchangeKind, PriceObservation};

const GATE_BASE_URL: &str = "https://www.gate.com";
const ORDER_BOOK_PATH: &str = "/apiw/v2/futures/usdt/order_book";
const ACCOUNTS_PATH: &str = "/apiw/v2/futures/usdt/accounts";
/// Book depth 1 at the finest price grouping is enough for a top-of-book quote.
const ORDER_BOOK_LIMIT: &str = "1";
const ORDER_BOOK_INTERVAL: &str = "0.00001";
const GATE_REQUESTS_PER_SECOND: u32 = 5;

/// Gate's private web API authenticates with a session cookie, not a
/// signature; the cookie string is passed through verbatim.
pub struct GateExchange {
    client: reqwest::Client,
    base_url: String,
    cookie: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl GateExchange {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self::with_base_url(cookie, GATE_BASE_URL)
    }

    pub fn with_base_url(cookie: impl Into<String>, base_url: impl Into<String>) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(GATE_REQUESTS_PER_SECOND).unwrap());
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cookie: cookie.into(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Exchange for GateExchange {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Gate
    }

    fn fetch_price(
        &self,
        token: &str,
    ) -> BoxFuture<'_, Result<PriceObservation, Report<ExchangeError>>> {
        let token = token.to_owned();
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{}{}", self.base_url, ORDER_BOOK_PATH);
            let contract = format!("{token}_USDT");
            let params = [
                ("limit", ORDER_BOOK_LIMIT),
                ("contract", contract.as_str()),
                ("interval", ORDER_BOOK_INTERVAL),
            ];

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .change_context(ExchangeError::Request {
                    exchange: "gate".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(ExchangeError::Request {
                    exchange: "gate".into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let body: OrderBookResponse =
                response
                    .json()
                    .await
                    .change_context(ExchangeError::ResponseParse {
                        exchange: "gate".into(),
                    })?;

            let observation = body.into_observation(&token)?;

            info!(
                token = %observation.token,
                price = observation.price,
                "gate price fetch complete"
            );

            Ok(observation)
        })
    }

    fn fetch_balances(&self) -> BoxFuture<'_, Result<BalanceSnapshot, Report<ExchangeError>>> {
        Box::pin(async move {
            self.rate_limiter.until_ready().await;

            let url = format!("{}{}", self.base_url, ACCOUNTS_PATH);

            let response = self
                .client
                .get(&url)
                .header(reqwest::header::COOKIE, &self.cookie)
                .send()
                .await
                .change_context(ExchangeError::Request {
                    exchange: "gate".into(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(ExchangeError::Request {
                    exchange: "gate".into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let body: AccountsResponse =
                response
                    .json()
                    .await
                    .change_context(ExchangeError::ResponseParse {
                        exchange: "gate".into(),
                    })?;

            let snapshot = body.into_snapshot(Utc::now())?;

            info!("gate balance fetch complete");

            Ok(snapshot)
        })
    }
}

/// Gate reports figures as either JSON numbers or numeric strings
/// depending on the endpoint version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Num(f64),
    Text(String),
}

impl RawNumber {
    fn as_f64(&self) -> Result<f64, Report<ExchangeError>> {
        match self {
            Self::Num(n) => Ok(*n),
            Self::Text(s) => s.parse::<f64>().change_context(ExchangeError::ResponseParse {
                exchange: "gate".into(),
            }),
        }
    }
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OrderBookResponse {
    data: OrderBookData,
}

#[derive(Debug, Deserialize)]
struct OrderBookData {
    asks: Vec<BookLevel>,
    /// Book snapshot time (seconds epoch, fractional).
    current: f64,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    p: RawNumber,
}

impl OrderBookResponse {
    fn into_observation(self, token: &str) -> Result<PriceObservation, Report<ExchangeError>> {
        let best_ask = self.data.asks.first().ok_or_else(|| {
            Report::new(ExchangeError::Api {
                exchange: "gate".into(),
            })
            .attach("order book returned no asks")
        })?;

        let taken_at = DateTime::from_timestamp_millis((self.data.current * 1000.0) as i64)
            .unwrap_or_else(Utc::now);

        Ok(PriceObservation {
            exchange: ExchangeKind::Gate,
            token: token.to_owned(),
            price: best_ask.p.as_f64()?,
            taken_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    data: Vec<AccountRow>,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    history: AccountHistory,
    unrealised_pnl: RawNumber,
    total: RawNumber,
}

#[derive(Debug, Deserialize)]
struct AccountHistory {
    pnl: RawNumber,
    /// Net deposits-and-withdrawals; serves as the starting balance.
    dnw: RawNumber,
}

impl AccountsResponse {
    fn into_snapshot(self, taken_at: DateTime<Utc>) -> Result<BalanceSnapshot, Report<ExchangeError>> {
        let account = self.data.first().ok_or_else(|| {
            Report::new(ExchangeError::Api {
                exchange: "gate".into(),
            })
            .attach("accounts returned no rows")
        })?;

        let mut entries = BTreeMap::new();
        entries.insert("pnl".to_owned(), account.history.pnl.as_f64()?);
        entries.insert("unrealised_pnl".to_owned(), account.unrealised_pnl.as_f64()?);
        entries.insert("total_usd".to_owned(), account.total.as_f64()?);
        entries.insert("starting_balance".to_owned(), account.history.dnw.as_f64()?);

        Ok(BalanceSnapshot {
            exchange: ExchangeKind::Gate,
            taken_at,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_book_parses_into_observation() {
        let body = r#"{
            "data": {
                "asks": [{"p": "2.3456", "s": 100}],
                "bids": [{"p": "2.3455", "s": 80}],
                "current": 1700000000.123
            }
        }"#;
        let response: OrderBookResponse = serde_json::from_str(body).unwrap();
        let observation = response.into_observation("XRP").unwrap();

        assert_eq!(observation.exchange, ExchangeKind::Gate);
        assert_eq!(observation.token, "XRP");
        assert_eq!(observation.price, 2.3456);
        assert_eq!(observation.taken_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn order_book_numeric_price_also_accepted() {
        let body = r#"{"data": {"asks": [{"p": 2.5}], "current": 1700000000}}"#;
        let response: OrderBookResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.into_observation("XRP").unwrap().price, 2.5);
    }

    #[test]
    fn order_book_without_asks_is_an_api_error() {
        let body = r#"{"data": {"asks": [], "current": 1700000000}}"#;
        let response: OrderBookResponse = serde_json::from_str(body).unwrap();
        assert!(response.into_observation("XRP").is_err());
    }

    #[test]
    fn accounts_parse_into_snapshot() {
        let body = r#"{
            "data": [{
                "unrealised_pnl": "-3.2",
                "total": "1250.75",
                "history": {"pnl": "250.75", "dnw": "1000"}
            }]
        }"#;
        let response: AccountsResponse = serde_json::from_str(body).unwrap();
        let t = Utc::now();
        let snapshot = response.into_snapshot(t).unwrap();

        assert_eq!(snapshot.exchange, ExchangeKind::Gate);
        assert_eq!(snapshot.taken_at, t);
        assert_eq!(snapshot.entries["pnl"], 250.75);
        assert_eq!(snapshot.entries["unrealised_pnl"], -3.2);
        assert_eq!(snapshot.entries["total_usd"], 1250.75);
        assert_eq!(snapshot.entries["starting_balance"], 1000.0);
    }

    #[test]
    fn accounts_without_rows_is_an_api_error() {
        let body = r#"{"data": []}"#;
        let response: AccountsResponse = serde_json::from_str(body).unwrap();
        assert!(response.into_snapshot(Utc::now()).is_err());
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_price() {
        let exchange = GateExchange::new(String::new());
        let observation = exchange.fetch_price("BTC").await.unwrap();
        assert!(observation.price > 0.0);
    }
}
