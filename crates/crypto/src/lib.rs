//! # homenet-crypto
//!
//! Kryptografische Bausteine des Nodes.
//!
//! ## Module
//! - `identity` - Ed25519-Schluessel, Identitaets-IDs, Challenges
//! - `tls` - Zertifikatslieferanten, TLS-Acceptor und Client-Connectoren
//! - `error` - Fehlertypen

pub mod error;
pub mod identity;
pub mod tls;

pub use error::{CryptoError, CryptoResult};
pub use identity::{challenge_erzeugen, identity_id, Identity, CHALLENGE_LEN, PUBLIC_KEY_LEN};
pub use tls::{
    fingerprint_berechnen, fingerprint_connector, tls_acceptor, unsicherer_connector,
    CertificateSupplier, PemZertifikat, SelbstsigniertesZertifikat, ServerCertificate,
};
