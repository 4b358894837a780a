use std::sync::Arc;

use crate::activity::ActivityAggregator;
use crate::health::HealthTracker;
use crate::store::CounterStore;
use crate::subscriber::PushSubscriber;

/// État unique partagé par les handlers axum
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CounterStore>,
    pub activity: ActivityAggregator,
    pub subscriber: PushSubscriber,
    pub health_tracker: HealthTracker,
}
