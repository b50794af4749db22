//! In-memory collaborator bindings
//!
//! Used by the binary in single-replica mode and by the test suites.

use super::{
    ControllerStorage, CoordinationStore, HistoryQuery, HistoryStorage, ScaleConfigStorage,
    STORAGE_PAGE_CAP,
};
use crate::error::{Result, ScalerError};
use crate::models::{
    ControllerRecord, PerformanceHistoryEvent, Prediction, PredictionKey, ScaleConfig,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Entity store for history rows, scale configs and controller rows
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<BTreeMap<(String, i64), PerformanceHistoryEvent>>,
    scale_configs: DashMap<String, ScaleConfig>,
    controllers: RwLock<Vec<ControllerRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, simulating an unreachable store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ScalerError::Storage("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistoryStorage for MemoryStore {
    async fn upsert_event(&self, event: PerformanceHistoryEvent) -> Result<()> {
        self.check_available()?;
        let mut events = self.events.write().await;
        events.insert(event.key(), event);
        Ok(())
    }

    async fn find_events(
        &self,
        query: &HistoryQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PerformanceHistoryEvent>> {
        self.check_available()?;
        let events = self.events.read().await;
        let mut matching: Vec<_> = events.values().filter(|e| query.matches(e)).collect();
        matching.sort_by(|a, b| b.event_timestamp.cmp(&a.event_timestamp));

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit.min(STORAGE_PAGE_CAP))
            .cloned()
            .collect())
    }

    async fn get_event(
        &self,
        application_id: &str,
        event_timestamp: i64,
    ) -> Result<Option<PerformanceHistoryEvent>> {
        self.check_available()?;
        let events = self.events.read().await;
        Ok(events
            .get(&(application_id.to_string(), event_timestamp))
            .cloned())
    }
}

#[async_trait]
impl ScaleConfigStorage for MemoryStore {
    async fn scale_config(&self, application_id: &str) -> Result<Option<ScaleConfig>> {
        self.check_available()?;
        Ok(self
            .scale_configs
            .get(application_id)
            .map(|c| c.value().clone()))
    }

    async fn save_scale_config(&self, config: ScaleConfig) -> Result<()> {
        self.check_available()?;
        self.scale_configs
            .insert(config.application_id.clone(), config);
        Ok(())
    }
}

#[async_trait]
impl ControllerStorage for MemoryStore {
    async fn latest_controller(&self, application_id: &str) -> Result<Option<ControllerRecord>> {
        self.check_available()?;
        let controllers = self.controllers.read().await;
        Ok(controllers
            .iter()
            .filter(|c| c.application_id == application_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn save_controller(&self, record: ControllerRecord) -> Result<()> {
        self.check_available()?;
        self.controllers.write().await.push(record);
        Ok(())
    }

    async fn list_applications(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let controllers = self.controllers.read().await;
        let mut ids: Vec<String> = controllers.iter().map(|c| c.application_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Lease holder with its expiry deadline
#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

/// Shared lease + prediction list, for single-process deployments and tests
#[derive(Default)]
pub struct MemoryCoordinationStore {
    leases: Mutex<HashMap<String, Lease>>,
    predictions: RwLock<Vec<Prediction>>,
    unavailable: AtomicBool,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ScalerError::Coordination("coordination store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut leases = self.leases.lock().await;

        let available = match leases.get(name) {
            None => true,
            Some(lease) => lease.holder == holder || lease.expires_at <= now,
        };

        if available {
            leases.insert(
                name.to_string(),
                Lease {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        Ok(available)
    }

    async fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        self.check_available()?;
        let mut leases = self.leases.lock().await;
        if leases.get(name).is_some_and(|l| l.holder == holder) {
            leases.remove(name);
        }
        Ok(())
    }

    async fn lease_holder(&self, name: &str) -> Result<Option<String>> {
        self.check_available()?;
        let leases = self.leases.lock().await;
        Ok(leases
            .get(name)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.holder.clone()))
    }

    async fn replace_predictions(
        &self,
        application_id: &str,
        predictions: Vec<Prediction>,
    ) -> Result<()> {
        self.check_available()?;
        let mut queued = self.predictions.write().await;
        queued.retain(|p| p.application_id != application_id);
        queued.extend(predictions);
        queued.sort_by_key(|p| p.absolute_time);
        Ok(())
    }

    async fn predictions(&self) -> Result<Vec<Prediction>> {
        self.check_available()?;
        Ok(self.predictions.read().await.clone())
    }

    async fn remove_prediction(&self, key: &PredictionKey) -> Result<bool> {
        self.check_available()?;
        let mut queued = self.predictions.write().await;
        match queued.iter().position(|p| &p.key() == key) {
            Some(index) => {
                queued.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventSource, PredictionReasons, ScaleAction, SlotReasons};

    fn event(app: &str, ts: i64) -> PerformanceHistoryEvent {
        PerformanceHistoryEvent {
            application_id: app.to_string(),
            event_timestamp: ts,
            pods_added: 1,
            total_pods: 3,
            pre_elu_mean: 0.5,
            pre_heap_mean: 0.4,
            pre_elu_trend: 0.0,
            pre_heap_trend: 0.0,
            delta_elu: 0.0,
            delta_heap: 0.0,
            sigma_elu: 0.0,
            sigma_heap: 0.0,
            success_score: Some(1.0),
            source: EventSource::Signal,
            prediction: None,
        }
    }

    fn prediction(app: &str, at: i64) -> Prediction {
        Prediction {
            application_id: app.to_string(),
            time_of_day: 0,
            absolute_time: at,
            action: ScaleAction::Up,
            pods: 1,
            confidence: 0.9,
            reasons: PredictionReasons::Slot(SlotReasons {
                event_count: 1,
                recent_count: 1,
                avg_success: 1.0,
                avg_elu: 0.5,
                avg_heap: 0.5,
            }),
        }
    }

    #[tokio::test]
    async fn test_find_events_newest_first_with_range() {
        let store = MemoryStore::new();
        for ts in [100, 300, 200, 400] {
            store.upsert_event(event("app", ts)).await.unwrap();
        }
        store.upsert_event(event("other", 250)).await.unwrap();

        let query = HistoryQuery {
            application_id: Some("app".to_string()),
            start: Some(200),
            end: Some(400),
        };
        let found = store.find_events(&query, 10, 0).await.unwrap();
        let stamps: Vec<i64> = found.iter().map(|e| e.event_timestamp).collect();
        assert_eq!(stamps, vec![400, 300, 200]);
    }

    #[tokio::test]
    async fn test_find_events_caps_page() {
        let store = MemoryStore::new();
        for ts in 0..(STORAGE_PAGE_CAP as i64 + 10) {
            store.upsert_event(event("app", ts)).await.unwrap();
        }
        let found = store
            .find_events(&HistoryQuery::for_application("app"), 5000, 0)
            .await
            .unwrap();
        assert_eq!(found.len(), STORAGE_PAGE_CAP);
    }

    #[tokio::test]
    async fn test_latest_controller_wins() {
        let store = MemoryStore::new();
        for (created_at, replicas) in [(10, 2), (30, 5), (20, 3)] {
            store
                .save_controller(ControllerRecord {
                    application_id: "app".to_string(),
                    controller_id: "web".to_string(),
                    namespace: "default".to_string(),
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    replicas,
                    created_at,
                })
                .await
                .unwrap();
        }
        let latest = store.latest_controller("app").await.unwrap().unwrap();
        assert_eq!(latest.replicas, 5);
        assert_eq!(store.list_applications().await.unwrap(), vec!["app".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.upsert_event(event("app", 1)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_exclusive_until_expiry() {
        let store = MemoryCoordinationStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.acquire_lease("scaler", "a", ttl).await.unwrap());
        assert!(!store.acquire_lease("scaler", "b", ttl).await.unwrap());
        assert!(store.acquire_lease("scaler", "a", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.acquire_lease("scaler", "b", ttl).await.unwrap());
        assert_eq!(
            store.lease_holder("scaler").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let store = MemoryCoordinationStore::new();
        let ttl = Duration::from_secs(10);
        store.acquire_lease("scaler", "a", ttl).await.unwrap();
        store.release_lease("scaler", "b").await.unwrap();
        assert_eq!(store.lease_holder("scaler").await.unwrap().as_deref(), Some("a"));
        store.release_lease("scaler", "a").await.unwrap();
        assert!(store.lease_holder("scaler").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_predictions_is_per_application() {
        let store = MemoryCoordinationStore::new();
        store
            .replace_predictions("a", vec![prediction("a", 300), prediction("a", 100)])
            .await
            .unwrap();
        store
            .replace_predictions("b", vec![prediction("b", 200)])
            .await
            .unwrap();
        store
            .replace_predictions("a", vec![prediction("a", 50)])
            .await
            .unwrap();

        let queued = store.predictions().await.unwrap();
        let order: Vec<(String, i64)> = queued
            .iter()
            .map(|p| (p.application_id.clone(), p.absolute_time))
            .collect();
        assert_eq!(order, vec![("a".to_string(), 50), ("b".to_string(), 200)]);

        assert!(store.remove_prediction(&queued[0].key()).await.unwrap());
        assert!(!store.remove_prediction(&queued[0].key()).await.unwrap());
    }
}
