use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Europe::Kyiv;
use serde::{Deserialize, Serialize};

/// Log entries are timestamped in this fixed zone, in `%Y-%m-%d %H:%M:%S`
/// format, regardless of where the process runs.
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    Bingx,
    Gate,
}

impl ExchangeKind {
    /// Parse the CLI/config exchange selector.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bingx" => Some(Self::Bingx),
            "gate" => Some(Self::Gate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bingx => "bingx",
            Self::Gate => "gate",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Format an instant the way log entries record it: Kyiv local time.
pub fn format_log_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Kyiv).format(LOG_TIME_FORMAT).to_string()
}

/// A single normalized price reading for one token on one exchange.
#[derive(Debug, Clone)]
pub struct PriceObservation {
    pub exchange: ExchangeKind,
    pub token: String,
    pub price: f64,
    pub taken_at: DateTime<Utc>,
}

/// A normalized account balance snapshot.
///
/// `entries` maps an exchange-specific field name (account type for BingX,
/// pnl/total fields for Gate) to a USD(T) amount.
#[derive(Debug, Clone)]
pub struct BalanceSnapshot {
    pub exchange: ExchangeKind,
    pub taken_at: DateTime<Utc>,
    pub entries: BTreeMap<String, f64>,
}
