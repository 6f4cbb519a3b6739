//! Fehlertypen fuer HomeNet
//!
//! Basisfehler der gemeinsamen Typen und des Profil-Stores. Die Node-Laufzeit
//! bildet diese Fehler auf ihre eigene Taxonomie ab.

use thiserror::Error;

/// Result-Alias fuer homenet-core
pub type HomeNetResult<T> = std::result::Result<T, HomeNetError>;

/// Fehler der gemeinsamen Schicht
#[derive(Debug, Error)]
pub enum HomeNetError {
    #[error("Identitaet nicht gefunden: {0}")]
    IdentitaetNichtGefunden(String),

    #[error("Identitaet bereits vorhanden: {0}")]
    IdentitaetVorhanden(String),

    #[error("Ungueltige Laenge fuer {feld}: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeLaenge {
        feld: &'static str,
        erwartet: usize,
        erhalten: usize,
    },

    #[error("Unbekannte Rolle: {0}")]
    UnbekannteRolle(String),

    #[error("Speicherfehler: {0}")]
    Speicher(String),
}

impl HomeNetError {
    pub fn speicher(msg: impl Into<String>) -> Self {
        Self::Speicher(msg.into())
    }
}
