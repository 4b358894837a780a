/*!
Mock Hub PuSH pour développer sans hub réel

Joue le rôle du hub PubSubHubbub-JSON face au callback du kernel:
- Construit les formulaires de handshake (`hub.mode`, `hub.topic`, ...)
- Construit des livraisons JSON et les signe `sha1=<hmac hex>` sur les octets exacts
- Fournit des activités d'exemple (ActivityBuilder)
*/

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Livraison prête à poster : corps brut + valeur du header `x-hub-signature`
#[derive(Debug, Clone)]
pub struct SignedDelivery {
    pub body: Vec<u8>,
    pub signature: String,
}

/// Hub simulé pour un topic et son secret partagé
#[derive(Debug, Clone)]
pub struct MockHub {
    pub topic: String,
    pub secret: String,
}

impl MockHub {
    pub fn new<T: Into<String>, S: Into<String>>(topic: T, secret: S) -> Self {
        Self {
            topic: topic.into(),
            secret: secret.into(),
        }
    }

    /// Signature `sha1=<hex>` des octets donnés, avec le secret du hub
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any size");
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Sérialise `{"items": items}` puis signe le résultat
    pub fn delivery(&self, items: Vec<Value>) -> SignedDelivery {
        let body = serde_json::to_vec(&serde_json::json!({ "items": items }))
            .expect("JSON values always serialize");
        self.signed(body)
    }

    /// Signe un corps brut tel quel (pour tester l'exactitude octet par octet)
    pub fn signed(&self, body: Vec<u8>) -> SignedDelivery {
        let signature = self.sign(&body);
        log::info!("📤 [MOCK HUB] signed {} bytes for {}", body.len(), self.topic);
        SignedDelivery { body, signature }
    }

    /// Un item de livraison pour le topic du hub
    pub fn item(&self, activity: Value) -> Value {
        let actor = activity.get("actor").cloned().unwrap_or(Value::Null);
        serde_json::json!({
            "topic": self.topic,
            "actor": actor,
            "payload": activity,
        })
    }

    /// Formulaire urlencoded d'un handshake de vérification
    pub fn handshake_form(&self, mode: &str, verify_token: &str, challenge: &str) -> String {
        serde_urlencoded::to_string([
            ("hub.mode", mode),
            ("hub.topic", self.topic.as_str()),
            ("hub.verify_token", verify_token),
            ("hub.challenge", challenge),
        ])
        .expect("string pairs always encode")
    }
}

/// Helper pour créer des activités de test au format activitystrea.ms
pub struct ActivityBuilder;

impl ActivityBuilder {
    /// Activité "post" d'un acteur identifié par son URL de profil
    pub fn post<S: Into<String>>(id: S, actor_url: S) -> Value {
        serde_json::json!({
            "id": id.into(),
            "verb": "post",
            "published": chrono::Utc::now().to_rfc3339(),
            "actor": {
                "objectType": "person",
                "url": actor_url.into()
            },
            "object": {
                "objectType": "note",
                "content": "Hello federation"
            }
        })
    }

    /// Activité sans acteur exploitable
    pub fn anonymous<S: Into<String>>(id: S) -> Value {
        serde_json::json!({
            "id": id.into(),
            "verb": "share",
            "published": chrono::Utc::now().to_rfc3339()
        })
    }
}
