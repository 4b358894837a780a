use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Host {
    pub hostname: String,
    pub credentials: Option<HostCredentials>,
    pub created: String, // RFC3339
}

/// Identifiants client enregistrés auprès du host (gérés hors du kernel)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HostCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HostCount {
    pub hostname: String,
    pub count: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct TotalCount {
    pub count: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Subscription {
    pub topic: String,
    pub secret: String,
}

/// Handshake PuSH en attente, créé par l'initiateur de l'abonnement
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PushRequest {
    pub token: String,
    pub mode: String,
    pub topic: String,
}

pub fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_default()
}

pub fn now_rfc3339() -> String {
    rfc3339(OffsetDateTime::now_utc())
}
