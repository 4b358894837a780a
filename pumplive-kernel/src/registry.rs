/**
 * REGISTRIES PUSH - Abonnements et handshakes en attente
 *
 * RÔLE :
 * Lecture seule, côté kernel, des enregistrements créés par l'initiateur des
 * abonnements PuSH : Subscription (topic → secret partagé) et PushRequest
 * (token → mode/topic attendus au handshake).
 *
 * FONCTIONNEMENT :
 * - Deux traits, consommés par le subscriber ; NotFound = rejet côté vérification
 * - StoreRegistry implémente les deux sur le CounterStore
 */

use crate::models::{PushRequest, Subscription};
use crate::store::{kinds, read_as, CounterStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn subscription(&self, topic: &str) -> Result<Subscription, StoreError>;
}

#[async_trait]
pub trait PushRequestRegistry: Send + Sync {
    async fn push_request(&self, token: &str) -> Result<PushRequest, StoreError>;
}

#[derive(Clone)]
pub struct StoreRegistry {
    store: Arc<dyn CounterStore>,
}

impl StoreRegistry {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        crate::store::create_from(
            self.store.as_ref(),
            kinds::SUBSCRIPTION,
            &subscription.topic,
            subscription,
        )
        .await
    }

    #[cfg(test)]
    pub async fn save_push_request(&self, request: &PushRequest) -> Result<(), StoreError> {
        crate::store::create_from(self.store.as_ref(), kinds::PUSH_REQUEST, &request.token, request).await
    }
}

#[async_trait]
impl SubscriptionRegistry for StoreRegistry {
    async fn subscription(&self, topic: &str) -> Result<Subscription, StoreError> {
        read_as(self.store.as_ref(), kinds::SUBSCRIPTION, topic).await
    }
}

#[async_trait]
impl PushRequestRegistry for StoreRegistry {
    async fn push_request(&self, token: &str) -> Result<PushRequest, StoreError> {
        read_as(self.store.as_ref(), kinds::PUSH_REQUEST, token).await
    }
}
