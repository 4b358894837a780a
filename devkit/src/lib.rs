/*!
# Pump Live DevKit - Stubs et utilitaires pour le développement du kernel

Bibliothèque facilitant les tests du kernel sans fédération réelle:
- Hub PuSH simulé (handshakes, livraisons signées HMAC-SHA1)
- Host distant simulé servant `/api/users`
- Harness de tests (serveur HTTP éphémère, attentes par polling)
*/

pub mod hub_stub;
pub mod host_stub;
pub mod test_utils;

pub use hub_stub::{ActivityBuilder, MockHub, SignedDelivery};
pub use host_stub::{StubHost, StubResponse};
pub use test_utils::TestHarness;
