//! time-windowed reads over the record store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::Reading;
use crate::store::{RecordStore, StoreError, StoreResult};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// readings stamped at or after `now - window`, in stored order
///
/// a window reaching past the earliest representable instant keeps everything.
pub async fn recent(
    store: Arc<dyn RecordStore>,
    now: DateTime<Utc>,
    window: Duration,
) -> StoreResult<Vec<Reading>> {
    let readings = tokio::task::spawn_blocking(move || store.read_all())
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

    let cutoff = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    Ok(within_window(readings, cutoff))
}

pub fn within_window(readings: Vec<Reading>, cutoff: DateTime<Utc>) -> Vec<Reading> {
    // insertion order is chronological in practice but not enforced, so no
    // binary search here
    readings
        .into_iter()
        .filter(|r| r.timestamp >= cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SensorSubmission;
    use crate::store::{JsonFileStore, MemoryStore};
    use serde_json::json;
    use tempfile::tempdir;

    fn at(ts: DateTime<Utc>, temp: i64) -> Reading {
        SensorSubmission {
            temperature: Some(json!(temp)),
            ..Default::default()
        }
        .into_reading(ts)
    }

    #[tokio::test]
    async fn keeps_only_last_thirty_days() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let old = at(now - Duration::days(31), 1);
        let fresh = at(now - Duration::days(1), 2);
        store.append(&old).unwrap();
        store.append(&fresh).unwrap();

        let result = recent(store, now, Duration::days(DEFAULT_WINDOW_DAYS)).await.unwrap();
        assert_eq!(result, vec![fresh]);
    }

    #[tokio::test]
    async fn oversized_window_keeps_everything() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let ancient = at(now - Duration::days(365 * 200), 1);
        store.append(&ancient).unwrap();

        let result = recent(store, now, Duration::max_value()).await.unwrap();
        assert_eq!(result, vec![ancient]);
    }

    #[test]
    fn cutoff_is_inclusive() {
        let now = Utc::now();
        let cutoff = now - Duration::days(30);
        let edge = at(cutoff, 1);
        let before = at(cutoff - Duration::milliseconds(1), 2);

        assert_eq!(within_window(vec![before, edge.clone()], cutoff), vec![edge]);
    }

    #[tokio::test]
    async fn empty_store_gives_empty_result() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("sensordata.json")).unwrap());
        let result = recent(store, Utc::now(), Duration::days(30)).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn malformed_store_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sensordata.json");
        std::fs::write(&path, "[{\"timestamp\": 12").unwrap();
        let store = Arc::new(JsonFileStore::open(&path).unwrap());

        let result = recent(store, Utc::now(), Duration::days(30)).await;
        assert!(matches!(result, Err(StoreError::Malformed(_))));
    }
}
