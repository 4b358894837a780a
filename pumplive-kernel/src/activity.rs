/**
 * ACTIVITY RATE - Compteurs horaires et taux d'activité glissant
 *
 * RÔLE :
 * Transforme les compteurs d'activité horaires (alimentés par le callback PuSH)
 * en un taux moyen d'activités par seconde sur les 24 dernières heures.
 *
 * FONCTIONNEMENT :
 * - Bucket id = heure calendaire UTC "{année}_{mois}_{jour}_{heure}" (mois 1-12)
 * - Le taux pour `now` couvre les heures [now-24h, now-1h] : l'heure en cours,
 *   encore incomplète, est exclue
 * - Le taux est mis en cache sous le bucket "now-1h" et jamais recalculé ensuite
 * - Deux calculs concurrents du même bucket écrivent la même valeur (idempotent)
 */

use crate::store::{kinds, soft_read, CounterStore, StoreError};
use serde_json::Value;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

pub const WINDOW_HOURS: i64 = 24;
pub const WINDOW_SECONDS: f64 = (WINDOW_HOURS * 3600) as f64;

/// Identifiant du bucket horaire UTC contenant `t`
pub fn bucket_id(t: OffsetDateTime) -> String {
    let t = t.to_offset(time::UtcOffset::UTC);
    format!("{}_{}_{}_{}", t.year(), t.month() as u8, t.day(), t.hour())
}

/// Les 24 buckets de la fenêtre, du plus récent (now-1h) au plus ancien (now-24h)
pub fn trailing_bucket_ids(now: OffsetDateTime) -> Vec<String> {
    (1..=WINDOW_HOURS)
        .map(|i| bucket_id(now - Duration::hours(i)))
        .collect()
}

/// Bucket sous lequel le taux de `now` est mis en cache
pub fn rate_bucket_id(now: OffsetDateTime) -> String {
    bucket_id(now - Duration::hours(1))
}

/// Résultat de la maintenance du cache
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateStatus {
    AlreadyCached,
    Computed(f64),
}

#[derive(Clone)]
pub struct ActivityAggregator {
    store: Arc<dyn CounterStore>,
}

impl ActivityAggregator {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Compte une activité vérifiée dans le bucket de l'heure courante
    pub async fn record_activity(&self, now: OffsetDateTime) -> Result<i64, StoreError> {
        self.store
            .incr(kinds::HOURLY_ACTIVITY_COUNT, &bucket_id(now))
            .await
    }

    /// Calcule le taux si le bucket "now-1h" n'a pas encore de valeur en cache
    pub async fn ensure_rate(&self, now: OffsetDateTime) -> Result<RateStatus, StoreError> {
        let key = rate_bucket_id(now);
        match self.store.read(kinds::ACTIVITY_RATE, &key).await {
            Ok(_) => Ok(RateStatus::AlreadyCached),
            Err(e) if e.is_not_found() => self.compute_rate(now).await.map(RateStatus::Computed),
            Err(e) => Err(e),
        }
    }

    /// Somme des 24 buckets / 86400, écrite dans le cache (sans vérifier l'existant)
    pub async fn compute_rate(&self, now: OffsetDateTime) -> Result<f64, StoreError> {
        let keys = trailing_bucket_ids(now);
        let counts = self
            .store
            .read_all(kinds::HOURLY_ACTIVITY_COUNT, &keys)
            .await?;

        let total: u64 = counts
            .iter()
            .flatten()
            .filter_map(Value::as_u64)
            .sum();
        let rate = total as f64 / WINDOW_SECONDS;

        let key = rate_bucket_id(now);
        self.store
            .create(kinds::ACTIVITY_RATE, &key, Value::from(rate))
            .await?;

        tracing::info!(bucket = %key, total, rate, "activity rate computed");
        Ok(rate)
    }

    /// Lecture souple du taux en cache : absent → 0
    pub async fn current_rate(&self, now: OffsetDateTime) -> Result<f64, StoreError> {
        soft_read(self.store.as_ref(), kinds::ACTIVITY_RATE, &rate_bucket_id(now), 0.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;
    use time::macros::datetime;

    fn aggregator() -> (Arc<FileStore>, ActivityAggregator) {
        let store = Arc::new(FileStore::in_memory());
        let aggregator = ActivityAggregator::new(store.clone());
        (store, aggregator)
    }

    #[test]
    fn test_bucket_id_is_unpadded_utc() {
        assert_eq!(bucket_id(datetime!(2013-03-05 07:59:59 UTC)), "2013_3_5_7");
        assert_eq!(bucket_id(datetime!(2013-12-31 23:00 UTC)), "2013_12_31_23");
        // 01:30 à +02:00 = 23:30 UTC la veille
        assert_eq!(bucket_id(datetime!(2013-03-05 01:30 +02:00)), "2013_3_4_23");
    }

    #[test]
    fn test_trailing_window_excludes_current_hour() {
        let now = datetime!(2013-03-02 00:15 UTC);
        let ids = trailing_bucket_ids(now);
        assert_eq!(ids.len(), 24);
        assert_eq!(ids[0], "2013_3_1_23");
        assert_eq!(ids[23], "2013_3_1_0");
        assert!(!ids.contains(&bucket_id(now)));
        assert_eq!(rate_bucket_id(now), ids[0]);
    }

    #[tokio::test]
    async fn test_rate_is_sum_over_day_in_seconds() {
        let (store, aggregator) = aggregator();
        let now = datetime!(2013-03-05 12:10 UTC);
        let ids = trailing_bucket_ids(now);

        // Un bucket sur deux renseigné, les autres absents
        let mut expected = 0u64;
        for (i, id) in ids.iter().enumerate().step_by(2) {
            let count = (i as u64 + 1) * 100;
            expected += count;
            store
                .create(kinds::HOURLY_ACTIVITY_COUNT, id, Value::from(count))
                .await
                .unwrap();
        }
        // L'heure courante ne compte pas
        store
            .create(kinds::HOURLY_ACTIVITY_COUNT, &bucket_id(now), Value::from(1_000_000))
            .await
            .unwrap();

        let rate = aggregator.compute_rate(now).await.unwrap();
        assert_eq!(rate, expected as f64 / 86400.0);
        assert_eq!(aggregator.current_rate(now).await.unwrap(), rate);
    }

    #[tokio::test]
    async fn test_ensure_rate_does_not_recompute_cached_bucket() {
        let (store, aggregator) = aggregator();
        let now = datetime!(2013-03-05 12:10 UTC);
        let last_hour = rate_bucket_id(now);

        store
            .create(kinds::HOURLY_ACTIVITY_COUNT, &last_hour, Value::from(8640))
            .await
            .unwrap();
        assert_eq!(aggregator.ensure_rate(now).await.unwrap(), RateStatus::Computed(0.1));

        // Les entrées changent mais le cache reste
        store
            .create(kinds::HOURLY_ACTIVITY_COUNT, &last_hour, Value::from(86400))
            .await
            .unwrap();
        assert_eq!(aggregator.ensure_rate(now).await.unwrap(), RateStatus::AlreadyCached);
        assert_eq!(aggregator.current_rate(now).await.unwrap(), 0.1);
    }

    #[tokio::test]
    async fn test_recompute_with_same_inputs_is_idempotent() {
        let (store, aggregator) = aggregator();
        let now = datetime!(2013-03-05 12:10 UTC);
        store
            .create(kinds::HOURLY_ACTIVITY_COUNT, &rate_bucket_id(now), Value::from(43))
            .await
            .unwrap();

        let first = aggregator.compute_rate(now).await.unwrap();
        let second = aggregator.compute_rate(now).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_current_rate_defaults_to_zero() {
        let (_store, aggregator) = aggregator();
        let rate = aggregator.current_rate(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(rate, 0.0);
    }

    #[tokio::test]
    async fn test_record_activity_targets_current_hour() {
        let (store, aggregator) = aggregator();
        let now = datetime!(2013-03-05 12:10 UTC);
        aggregator.record_activity(now).await.unwrap();
        assert_eq!(aggregator.record_activity(now).await.unwrap(), 2);

        let value = store
            .read(kinds::HOURLY_ACTIVITY_COUNT, "2013_3_5_12")
            .await
            .unwrap();
        assert_eq!(value, Value::from(2));
    }
}
