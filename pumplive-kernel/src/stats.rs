//! Statistiques publiques : lectures souples, un store vide donne des zéros.

use crate::activity::ActivityAggregator;
use crate::models::TotalCount;
use crate::store::{kinds, soft_read, CounterStore, StoreError, SINGLETON_KEY};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub hosts: u64,
    pub users: u64,
    #[serde(rename = "activityRate")]
    pub activity_rate: f64,
}

pub async fn get_stats(
    store: &dyn CounterStore,
    activity: &ActivityAggregator,
    now: OffsetDateTime,
) -> Result<Stats, StoreError> {
    let (hosts, last_total, activity_rate) = tokio::join!(
        soft_read(store, kinds::HOST_TOTAL, SINGLETON_KEY, 0u64),
        soft_read(store, kinds::LAST_TOTAL_COUNT, SINGLETON_KEY, TotalCount::default()),
        activity.current_rate(now),
    );

    Ok(Stats {
        hosts: hosts?,
        users: last_total?.count,
        activity_rate: activity_rate?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::rate_bucket_id;
    use crate::store::{create_from, FileStore};
    use serde_json::Value;
    use std::sync::Arc;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_empty_store_reports_zeros() {
        let store = Arc::new(FileStore::in_memory());
        let activity = ActivityAggregator::new(store.clone());

        let stats = get_stats(store.as_ref(), &activity, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            serde_json::json!({ "hosts": 0, "users": 0, "activityRate": 0.0 })
        );
    }

    #[tokio::test]
    async fn test_reads_latest_values() {
        let store = Arc::new(FileStore::in_memory());
        let activity = ActivityAggregator::new(store.clone());
        let now = datetime!(2013-03-05 12:10 UTC);

        store.incr(kinds::HOST_TOTAL, SINGLETON_KEY).await.unwrap();
        store.incr(kinds::HOST_TOTAL, SINGLETON_KEY).await.unwrap();
        let total = TotalCount {
            count: 1234,
            timestamp: "2013-03-05T12:00:00Z".into(),
        };
        create_from(store.as_ref(), kinds::LAST_TOTAL_COUNT, SINGLETON_KEY, &total)
            .await
            .unwrap();
        store
            .create(kinds::ACTIVITY_RATE, &rate_bucket_id(now), Value::from(0.5))
            .await
            .unwrap();

        let stats = get_stats(store.as_ref(), &activity, now).await.unwrap();
        assert_eq!(
            stats,
            Stats {
                hosts: 2,
                users: 1234,
                activity_rate: 0.5
            }
        );
    }
}
