//! ingestion of sensor submissions: stamp, append, then publish.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{Reading, SensorSubmission};
use crate::hub::BroadcastHub;
use crate::store::{RecordStore, StoreError, StoreResult};

/// store a submission and fan it out
///
/// the reading is only published once the append is durable. the whole
/// append+publish pair runs on its own task, so a caller that goes away
/// mid-request can not leave it half done.
pub async fn ingest(
    store: Arc<dyn RecordStore>,
    hub: BroadcastHub,
    submission: SensorSubmission,
    log_readings: bool,
) -> StoreResult<Reading> {
    let reading = submission.into_reading(Utc::now());

    let task = tokio::spawn(async move {
        let stored = reading.clone();
        tokio::task::spawn_blocking(move || store.append(&stored))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let report = hub.publish(reading.clone());
        if log_readings {
            info!(
                timestamp = %reading.timestamp,
                subscribers = report.delivered,
                "reading stored: {}",
                serde_json::to_string(&reading).unwrap_or_default()
            );
        }
        if report.dropped > 0 {
            warn!(dropped = report.dropped, "slow subscribers missed a reading");
        }
        Ok::<_, StoreError>(reading)
    });

    task.await.map_err(|e| StoreError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, MemoryStore};
    use serde_json::json;

    struct FailingStore;

    impl RecordStore for FailingStore {
        fn append(&self, _reading: &Reading) -> StoreResult<()> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only medium",
            )))
        }

        fn read_all(&self) -> StoreResult<Vec<Reading>> {
            Ok(Vec::new())
        }
    }

    fn submission(temp: f64) -> SensorSubmission {
        SensorSubmission {
            temperature: Some(json!(temp)),
            led: Some(json!("on")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ingest_appends_then_publishes() {
        let store = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();

        let before = Utc::now();
        let reading = ingest(store.clone(), hub.clone(), submission(20.5), false)
            .await
            .unwrap();

        assert!(reading.timestamp >= before);
        assert_eq!(reading.temperature, Some(json!(20.5)));
        assert_eq!(store.read_all().unwrap(), vec![reading.clone()]);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event, "sensorData");
        assert_eq!(event.data, reading);
    }

    #[tokio::test]
    async fn returned_reading_matches_the_reloaded_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("sensordata.json")).unwrap());
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();

        let reading = ingest(store.clone(), hub.clone(), submission(18.25), false)
            .await
            .unwrap();

        assert_eq!(store.read_all().unwrap(), vec![reading.clone()]);
        assert_eq!(sub.recv().await.unwrap().data, reading);
    }

    #[tokio::test]
    async fn failed_append_is_not_published() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();

        let result = ingest(Arc::new(FailingStore), hub.clone(), submission(1.0), false).await;
        assert!(matches!(result, Err(StoreError::Io(_))));

        let marker = submission(99.0).into_reading(Utc::now());
        hub.publish(marker.clone());
        assert_eq!(sub.recv().await.unwrap().data, marker);
    }

    #[tokio::test]
    async fn retried_submission_is_stored_twice() {
        let store = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::new(4);

        ingest(store.clone(), hub.clone(), submission(5.0), false).await.unwrap();
        ingest(store.clone(), hub.clone(), submission(5.0), false).await.unwrap();

        assert_eq!(store.read_all().unwrap().len(), 2);
    }
}
