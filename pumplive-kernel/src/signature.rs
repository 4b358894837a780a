//! Signatures PuSH : `x-hub-signature: sha1=<hex(hmac_sha1(secret, raw_body))>`
//!
//! Le calcul porte sur les octets bruts reçus. Un corps re-sérialisé, même
//! sémantiquement identique, ne produit pas la même signature.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature";
pub const SIGNATURE_PREFIX: &str = "sha1=";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("unsigned message")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("bad signature")]
    Mismatch,
}

/// Vérifie la valeur du header contre le corps brut.
/// La comparaison est sensible à la casse : seul l'hexadécimal minuscule est accepté.
pub fn verify_signature(
    header: Option<&str>,
    secret: &[u8],
    raw_body: &[u8],
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let supplied = header
        .strip_prefix(SIGNATURE_PREFIX)
        .filter(|hex| !hex.is_empty())
        .ok_or(SignatureError::Malformed)?;

    let digest = hex::decode(supplied).map_err(|_| SignatureError::Malformed)?;
    if hex::encode(&digest) != supplied {
        return Err(SignatureError::Mismatch);
    }

    let mut mac = HmacSha1::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(raw_body);
    mac.verify_slice(&digest).map_err(|_| SignatureError::Mismatch)
}
