use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::error::StorageError;
use crate::model::{BalanceSnapshot, ExchangeKind, PriceObservation, format_log_time};
use crate::storage::{PriceRecord, Storage};

const PRICE_LOG_FILE: &str = "token_results.json";
const SUMMARY_LOG_FILE: &str = "summary.json";
const PRICE_COLLECTION: &str = "token_stats";

/// Append-only JSON log, one directory per exchange
/// (`<root>/output_<exchange>/`). Each append reads the whole file, pushes
/// the new record onto its collection array, and rewrites the file as pretty
/// JSON; a missing or zero-length file is initialized with the empty
/// collection first.
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Create the storage rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self, Report<StorageError>> {
        std::fs::create_dir_all(root)
            .change_context(StorageError::WriteFile)
            .attach_with(|| format!("cannot create data directory: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn exchange_dir(&self, exchange: ExchangeKind) -> PathBuf {
        self.root.join(format!("output_{exchange}"))
    }

    /// Key of the balance collection inside `summary.json`.
    fn balance_collection(exchange: ExchangeKind) -> String {
        format!("{exchange}_account_stats")
    }

    async fn append_record(
        &self,
        exchange: ExchangeKind,
        file_name: &str,
        collection: &str,
        record: Value,
    ) -> Result<(), Report<StorageError>> {
        let dir = self.exchange_dir(exchange);
        tokio::fs::create_dir_all(&dir)
            .await
            .change_context(StorageError::WriteFile)
            .attach_with(|| format!("cannot create log directory: {}", dir.display()))?;

        let path = dir.join(file_name);
        let mut document = load_or_init(&path, collection).await?;

        document
            .get_mut(collection)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| {
                Report::new(StorageError::Parse)
                    .attach(format!("log file lacks \"{collection}\" array"))
            })?
            .push(record);

        let serialized =
            serde_json::to_string_pretty(&document).change_context(StorageError::WriteFile)?;
        tokio::fs::write(&path, serialized)
            .await
            .change_context(StorageError::WriteFile)
            .attach_with(|| format!("path: {}", path.display()))?;

        Ok(())
    }
}

/// Read and parse the log at `path`; a missing or empty file yields a fresh
/// document holding the empty collection.
async fn load_or_init(path: &Path, collection: &str) -> Result<Value, Report<StorageError>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if !content.is_empty() => {
            serde_json::from_str(&content)
                .change_context(StorageError::Parse)
                .attach_with(|| format!("path: {}", path.display()))
        }
        Ok(_) => Ok(json!({ collection: [] })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({ collection: [] })),
        Err(e) => Err(Report::new(e)
            .change_context(StorageError::ReadFile)
            .attach(format!("path: {}", path.display()))),
    }
}

impl Storage for JsonFileStorage {
    fn append_price(
        &self,
        observation: &PriceObservation,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let exchange = observation.exchange;
        let record = PriceRecord {
            token: observation.token.clone(),
            price: observation.price,
            datetime: format_log_time(observation.taken_at),
        };
        Box::pin(async move {
            let value = serde_json::to_value(&record).change_context(StorageError::WriteFile)?;
            self.append_record(exchange, PRICE_LOG_FILE, PRICE_COLLECTION, value)
                .await
        })
    }

    fn append_balances(
        &self,
        snapshot: &BalanceSnapshot,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let exchange = snapshot.exchange;
        let mut record = serde_json::Map::new();
        for (account, balance) in &snapshot.entries {
            record.insert(account.clone(), json!(balance));
        }
        record.insert(
            "datetime".to_owned(),
            json!(format_log_time(snapshot.taken_at)),
        );
        Box::pin(async move {
            self.append_record(
                exchange,
                SUMMARY_LOG_FILE,
                &Self::balance_collection(exchange),
                Value::Object(record),
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::DateTime;
    use uuid::Uuid;

    use super::*;

    fn temp_storage() -> (JsonFileStorage, PathBuf) {
        let root = std::env::temp_dir().join(format!("cex-logger-test-{}", Uuid::new_v4()));
        let storage = JsonFileStorage::open(&root).unwrap();
        (storage, root)
    }

    fn observation(token: &str, price: f64) -> PriceObservation {
        PriceObservation {
            exchange: ExchangeKind::Bingx,
            token: token.to_owned(),
            price,
            taken_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    async fn read_json(path: &Path) -> Value {
        let content = tokio::fs::read_to_string(path).await.unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[tokio::test]
    async fn append_price_creates_file_with_collection() {
        let (storage, root) = temp_storage();
        storage.append_price(&observation("BTC", 42000.5)).await.unwrap();

        let doc = read_json(&root.join("output_bingx").join("token_results.json")).await;
        let stats = doc["token_stats"].as_array().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0]["token"], "BTC");
        assert_eq!(stats[0]["price"], 42000.5);
        assert_eq!(stats[0]["datetime"], "2023-11-15 00:13:20");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn successive_appends_accumulate() {
        let (storage, root) = temp_storage();
        storage.append_price(&observation("BTC", 1.0)).await.unwrap();
        storage.append_price(&observation("ETH", 2.0)).await.unwrap();

        let doc = read_json(&root.join("output_bingx").join("token_results.json")).await;
        let stats = doc["token_stats"].as_array().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0]["token"], "BTC");
        assert_eq!(stats[1]["token"], "ETH");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn empty_file_is_reinitialized() {
        let (storage, root) = temp_storage();
        let dir = root.join("output_bingx");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("token_results.json"), "").unwrap();

        storage.append_price(&observation("BTC", 1.0)).await.unwrap();

        let doc = read_json(&dir.join("token_results.json")).await;
        assert_eq!(doc["token_stats"].as_array().unwrap().len(), 1);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let (storage, root) = temp_storage();
        let dir = root.join("output_bingx");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("token_results.json"), "{not json").unwrap();

        let result = storage.append_price(&observation("BTC", 1.0)).await;
        assert!(result.is_err());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn balance_collection_is_keyed_by_exchange() {
        let (storage, root) = temp_storage();
        let snapshot = BalanceSnapshot {
            exchange: ExchangeKind::Gate,
            taken_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            entries: BTreeMap::from([
                ("pnl".to_owned(), 250.75),
                ("total_usd".to_owned(), 1250.75),
            ]),
        };
        storage.append_balances(&snapshot).await.unwrap();

        let doc = read_json(&root.join("output_gate").join("summary.json")).await;
        let stats = doc["gate_account_stats"].as_array().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0]["pnl"], 250.75);
        assert_eq!(stats[0]["total_usd"], 1250.75);
        assert_eq!(stats[0]["datetime"], "2023-11-15 00:13:20");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn exchanges_log_into_separate_directories() {
        let (storage, root) = temp_storage();
        storage.append_price(&observation("BTC", 1.0)).await.unwrap();

        let gate = PriceObservation {
            exchange: ExchangeKind::Gate,
            ..observation("BTC", 2.0)
        };
        storage.append_price(&gate).await.unwrap();

        assert!(root.join("output_bingx").join("token_results.json").exists());
        assert!(root.join("output_gate").join("token_results.json").exists());

        std::fs::remove_dir_all(&root).unwrap();
    }
}
