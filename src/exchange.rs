pub mod bingx;
pub mod gate;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::ExchangeError;
use crate::model::{BalanceSnapshot, ExchangeKind, PriceObservation};

/// Abstraction over a cryptocurrency exchange REST API.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn Exchange`).
pub trait Exchange: Send + Sync {
    fn kind(&self) -> ExchangeKind;

    /// Fetch the current price for `token` (bare ticker, e.g. `"BTC"`).
    fn fetch_price(&self, token: &str)
    -> BoxFuture<'_, Result<PriceObservation, Report<ExchangeError>>>;

    /// Fetch the account balance snapshot for the configured credentials.
    fn fetch_balances(&self) -> BoxFuture<'_, Result<BalanceSnapshot, Report<ExchangeError>>>;
}
