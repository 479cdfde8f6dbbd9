use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use crate::records::{DtcReferenceEntry, PointOfInterest};
use crate::store::{Item, RecordStore};

/// Writers running against the reference table at once. Kept small so the
/// loader never saturates a freshly created table's write capacity.
const MAX_CONCURRENT_PUTS: usize = 4;

const MAX_PUT_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read reference data: {0}")]
    Csv(#[from] csv::Error),
}

/// Writes one item, backing off exponentially while the store reports
/// exhausted write capacity. Any other failure, or exhausting the attempts,
/// drops the item with a warning. Returns whether the item landed.
async fn put_best_effort(store: &dyn RecordStore, table: &str, label: &str, item: Item) -> bool {
    let mut attempt = 0u32;
    loop {
        match store.put(table, item.clone()).await {
            Ok(()) => {
                info!("Added {}", label);
                return true;
            }
            Err(e) if e.throttled && attempt + 1 < MAX_PUT_ATTEMPTS => {
                attempt += 1;
                let backoff = BASE_BACKOFF * 2u32.pow(attempt);
                warn!(
                    "write capacity exceeded on {}, retrying {} in {:?}",
                    table, label, backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!("skipping {} - {}", label, e);
                return false;
            }
        }
    }
}

async fn load_items(
    store: &dyn RecordStore,
    table: &str,
    entries: Vec<(String, Item)>,
) -> usize {
    futures::stream::iter(entries)
        .map(|(label, item)| async move { put_best_effort(store, table, &label, item).await })
        .buffer_unordered(MAX_CONCURRENT_PUTS)
        .fold(0usize, |loaded, stored| async move {
            loaded + usize::from(stored)
        })
        .await
}

/// Loads the trouble-code reference table from a two-column CSV
/// (code, description; header row expected). Returns the number of items
/// loaded; individual failures are logged and skipped.
pub async fn load_dtc_codes(
    store: &dyn RecordStore,
    table: &str,
    path: &Path,
) -> Result<usize, LoaderError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for result in reader.deserialize() {
        let (code, description): (String, String) = result?;
        let entry = DtcReferenceEntry {
            dtc: code,
            description,
        };
        entries.push((entry.dtc.clone(), entry.to_item()));
    }

    Ok(load_items(store, table, entries).await)
}

/// Loads the point-of-interest table from a nine-column CSV
/// (id, address, city, latitude, longitude, message, name, radius, state;
/// header row expected). Same best-effort semantics as [load_dtc_codes].
pub async fn load_pois(
    store: &dyn RecordStore,
    table: &str,
    path: &Path,
) -> Result<usize, LoaderError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut entries = Vec::new();
    for result in reader.deserialize() {
        let (poi_id, address, city, latitude, longitude, message, poi, radius, state): (
            String,
            String,
            String,
            f64,
            f64,
            String,
            String,
            f64,
            String,
        ) = result?;
        let entry = PointOfInterest {
            poi_id,
            poi,
            latitude,
            longitude,
            radius,
            message,
            address,
            city,
            state,
        };
        entries.push((entry.poi_id.clone(), entry.to_item()));
    }

    Ok(load_items(store, table, entries).await)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{KeyCondition, QueryPage, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails the first `failures` puts, optionally as capacity errors, then
    /// accepts everything.
    struct FlakyStore {
        failures: Mutex<u32>,
        throttled: bool,
        stored: Mutex<Vec<Item>>,
    }

    impl FlakyStore {
        fn new(failures: u32, throttled: bool) -> Self {
            FlakyStore {
                failures: Mutex::new(failures),
                throttled,
                stored: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn get(&self, _table: &str, _key: Item) -> Result<Option<Item>, StoreError> {
            Ok(None)
        }

        async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError {
                    op: "put",
                    table: table.to_string(),
                    message: "no capacity".to_string(),
                    throttled: self.throttled,
                });
            }
            self.stored.lock().unwrap().push(item);
            Ok(())
        }

        async fn delete(&self, _table: &str, _key: Item) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(
            &self,
            _table: &str,
            _condition: &KeyCondition,
            _exclusive_start_key: Option<Item>,
            _limit: Option<i32>,
        ) -> Result<QueryPage, StoreError> {
            Ok(QueryPage::default())
        }

        async fn scan(&self, _table: &str) -> Result<Vec<Item>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_put_retries_through_capacity_errors() {
        let store = FlakyStore::new(2, true);
        let entry = DtcReferenceEntry {
            dtc: "P0123".to_string(),
            description: "Throttle circuit high input".to_string(),
        };

        let stored = put_best_effort(&store, "cvs-dtc-reference", "P0123", entry.to_item()).await;

        assert!(stored);
        assert_eq!(store.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_skips_non_capacity_errors_without_retry() {
        let store = FlakyStore::new(1, false);
        let entry = DtcReferenceEntry {
            dtc: "P0123".to_string(),
            description: "Throttle circuit high input".to_string(),
        };

        let stored = put_best_effort(&store, "cvs-dtc-reference", "P0123", entry.to_item()).await;

        assert!(!stored);
        assert!(store.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_continues_past_a_dropped_item() {
        let store = FlakyStore::new(MAX_PUT_ATTEMPTS, true);
        let entries = vec![
            ("P0123".to_string(), DtcReferenceEntry {
                dtc: "P0123".to_string(),
                description: "Throttle circuit high input".to_string(),
            }
            .to_item()),
            ("P0456".to_string(), DtcReferenceEntry {
                dtc: "P0456".to_string(),
                description: "Evaporative emission system leak".to_string(),
            }
            .to_item()),
        ];

        let loaded = load_items(&store, "cvs-dtc-reference", entries).await;

        // the capacity failures are spread across both items by the pool, so
        // at least one lands and none abort the load
        assert!(loaded >= 1);
    }
}
