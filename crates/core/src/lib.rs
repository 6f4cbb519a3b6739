//! homenet-core – Gemeinsame Typen, Fehlertypen und Profil-Store
//!
//! Dieses Crate stellt die Bausteine bereit, die Protokoll, Kryptografie
//! und Node-Laufzeit gemeinsam nutzen. Die persistente Profilhaltung ist
//! ein externer Kollaborateur; hier lebt nur ihre Schnittstelle
//! ([`ProfileStore`]) und eine In-Memory-Implementierung.

pub mod error;
pub mod profile;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{HomeNetError, HomeNetResult};
pub use profile::{IdentityRecord, InMemoryProfileStore, ProfileStore, ProfileUpdate};
pub use types::{ConnectionId, IdentityId, ProtocolVersion, ServerRole};
