pub mod json_file;

use error_stack::Report;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::{BalanceSnapshot, PriceObservation};

/// Record shape persisted for one price observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub token: String,
    pub price: f64,
    /// Kyiv-local `%Y-%m-%d %H:%M:%S`.
    pub datetime: String,
}

/// Append-only log with two logical collections per exchange: price
/// observations and account-balance snapshots. Implementations own the file
/// format; callers only hand over normalized values.
pub trait Storage: Send + Sync {
    fn append_price(
        &self,
        observation: &PriceObservation,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn append_balances(
        &self,
        snapshot: &BalanceSnapshot,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}
