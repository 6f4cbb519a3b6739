//! Fehlertypen fuer die Node-Laufzeit
//!
//! Jede Variante gehoert zu genau einer Fehlerkategorie des Protokolls und
//! bestimmt Status, Details und ob die Verbindung danach geschlossen wird.

use homenet_core::HomeNetError;
use homenet_crypto::CryptoError;
use homenet_protocol::{Message, Status, WireError};
use thiserror::Error;

/// Fehlertyp fuer die Node-Laufzeit
#[derive(Debug, Error)]
pub enum NodeError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Frame- oder Body-Fehler
    #[error("Wire-Fehler: {0}")]
    Wire(#[from] WireError),

    #[error("Kryptografie-Fehler: {0}")]
    Crypto(#[from] CryptoError),

    /// Listener konnte nicht gebunden werden
    #[error("Port {port} konnte nicht gebunden werden: {quelle}")]
    Bind {
        port: u16,
        #[source]
        quelle: std::io::Error,
    },

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Ungueltiges Feld; `details` ist der Feldname
    #[error("Ungueltiger Wert: {details}")]
    Validierung { details: String },

    /// Signatur oder Challenge stimmt nicht
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    /// Request im aktuellen Zustand nicht erlaubt
    #[error("Nicht autorisiert: {0}")]
    Autorisierung(String),

    /// Request auf der Rolle dieser Verbindung nicht erlaubt
    #[error("Falsche Rolle: {0}")]
    FalscheRolle(String),

    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Nicht initialisiert: {0}")]
    NichtInitialisiert(String),

    #[error("Bereits vorhanden: {0}")]
    BereitsVorhanden(String),

    #[error("Nicht unterstuetzt: {0}")]
    NichtUnterstuetzt(String),

    /// Zustandsfehler (Token bereits gebunden, Anruf beendet, ...)
    #[error("Ungueltiger Zustand: {0}")]
    Zustand(String),

    /// Bestaetigung nicht rechtzeitig erhalten
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl NodeError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    pub fn validierung(feld: impl Into<String>) -> Self {
        Self::Validierung {
            details: feld.into(),
        }
    }

    /// Wire-Status fuer die Fehler-Antwort
    pub fn status(&self) -> Status {
        match self {
            NodeError::Validierung { .. } => Status::ErrorInvalidValue,
            NodeError::Authentifizierung(_) => Status::ErrorInvalidSignature,
            NodeError::Autorisierung(_) => Status::ErrorUnauthorized,
            NodeError::FalscheRolle(_) => Status::ErrorBadRole,
            NodeError::NichtGefunden(_) => Status::ErrorNotFound,
            NodeError::NichtInitialisiert(_) => Status::ErrorUninitialized,
            NodeError::BereitsVorhanden(_) => Status::ErrorAlreadyExists,
            NodeError::NichtUnterstuetzt(_) => Status::ErrorUnsupported,
            NodeError::Zustand(_) => Status::ErrorRejected,
            NodeError::Timeout(_) | NodeError::VerbindungGetrennt => Status::ErrorNotAvailable,
            _ => Status::ErrorInternal,
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            NodeError::Validierung { details } => Some(details.clone()),
            _ => None,
        }
    }

    /// Wird die Verbindung nach der Fehler-Antwort geschlossen?
    pub fn schliesst_verbindung(&self) -> bool {
        matches!(
            self,
            NodeError::FalscheRolle(_) | NodeError::Authentifizierung(_)
        )
    }

    /// Fehler-Antwort auf den Request mit `id`
    pub fn als_antwort(&self, id: u32) -> Message {
        Message::error(id, self.status(), self.details())
    }
}

impl From<HomeNetError> for NodeError {
    fn from(e: HomeNetError) -> Self {
        match e {
            HomeNetError::IdentitaetNichtGefunden(id) => NodeError::NichtGefunden(id),
            HomeNetError::IdentitaetVorhanden(id) => NodeError::BereitsVorhanden(id),
            andere => NodeError::Intern(andere.to_string()),
        }
    }
}

/// Result-Typ fuer die Node-Laufzeit
pub type NodeResult<T> = Result<T, NodeError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
