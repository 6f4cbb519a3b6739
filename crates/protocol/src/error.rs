//! Fehlertypen fuer das Wire-Framing

use std::io;

use thiserror::Error;

/// Fehler beim Lesen oder Schreiben eines Frames
#[derive(Debug, Error)]
pub enum WireError {
    /// Gegenueber hat den Stream geschlossen (0 Bytes gelesen)
    #[error("Verbindung vom Gegenueber geschlossen")]
    ConnectionClosed,

    /// Body passt nicht zum Nachrichtenschema
    #[error("Nachricht nicht lesbar: {0}")]
    Parse(String),

    #[error("Ungueltige Frame-Markierung: 0x{0:02X}")]
    UngueltigeMarkierung(u8),

    #[error("Frame zu gross: {laenge} Bytes (Maximum: {maximum} Bytes)")]
    FrameZuGross { laenge: usize, maximum: usize },

    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// Fehlerhafte Frames/Bodies: Verbindung schliessen, keine Antwort senden
    pub fn ist_protokollverletzung(&self) -> bool {
        matches!(
            self,
            WireError::Parse(_)
                | WireError::UngueltigeMarkierung(_)
                | WireError::FrameZuGross { .. }
        )
    }
}
