//! Validierung von Profil-Updates und Dienstnamen
//!
//! Das erste ungueltige Feld bricht ab; `details` der Fehler-Antwort ist der
//! Feldname (`version`, `name`, `image`, `extraData`). Fehlt bei der
//! Erstinitialisierung ein Pflichtfeld, nennt `details` den Setter
//! (`setVersion`, `setName`, `setLocation`). Ein Update ohne jedes Feld
//! ergibt `set*`.

use std::io::Cursor;

use homenet_core::ProfileUpdate;
use homenet_protocol::message::UpdateProfileRequest;

use crate::error::{NodeError, NodeResult};

pub const MAX_NAME_BYTES: usize = 64;
pub const MAX_EXTRA_DATA_BYTES: usize = 200;
pub const MAX_SERVICE_NAME_BYTES: usize = 32;
/// Maximale Anzahl angebotener Application Services pro Sitzung
pub const MAX_DIENSTE: usize = 50;

/// Grenzen fuer Profilbilder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilGrenzen {
    pub max_bildgroesse: usize,
    /// Kantenlaenge des erzeugten Thumbnails in Pixeln
    pub thumbnail_kante: u32,
}

impl Default for ProfilGrenzen {
    fn default() -> Self {
        Self {
            max_bildgroesse: 20 * 1024,
            thumbnail_kante: 128,
        }
    }
}

/// Prueft ein Profil-Update und bereitet es fuer den Store auf
///
/// `initialisiert` gibt an, ob das Profil bereits eine Version besitzt.
pub fn profil_update_pruefen(
    anfrage: &UpdateProfileRequest,
    initialisiert: bool,
    grenzen: &ProfilGrenzen,
) -> NodeResult<ProfileUpdate> {
    if anfrage.ist_leer() {
        return Err(NodeError::validierung("set*"));
    }

    if !initialisiert {
        if anfrage.version.is_none() {
            return Err(NodeError::validierung("setVersion"));
        }
        if anfrage.name.is_none() {
            return Err(NodeError::validierung("setName"));
        }
        if anfrage.location.is_none() {
            return Err(NodeError::validierung("setLocation"));
        }
    }

    if let Some(version) = anfrage.version {
        if version.ist_null() || !version.ist_unterstuetzt() {
            return Err(NodeError::validierung("version"));
        }
    }

    if let Some(name) = &anfrage.name {
        if name.is_empty() || name.len() > MAX_NAME_BYTES {
            return Err(NodeError::validierung("name"));
        }
    }

    let mut thumbnail_image = None;
    if let Some(bild) = &anfrage.image {
        // Leeres Bild entfernt das vorhandene
        if !bild.is_empty() {
            thumbnail_image = Some(bild_pruefen(bild, grenzen)?);
        }
    }

    if let Some(extra) = &anfrage.extra_data {
        if extra.len() > MAX_EXTRA_DATA_BYTES {
            return Err(NodeError::validierung("extraData"));
        }
    }

    Ok(ProfileUpdate {
        version: anfrage.version,
        name: anfrage.name.clone(),
        profile_image: anfrage.image.clone(),
        thumbnail_image,
        location: anfrage.location,
        extra_data: anfrage.extra_data.clone(),
    })
}

/// Dekodiert das Bild und erzeugt ein PNG-Thumbnail
fn bild_pruefen(bild: &[u8], grenzen: &ProfilGrenzen) -> NodeResult<Vec<u8>> {
    if bild.len() > grenzen.max_bildgroesse {
        tracing::debug!(
            groesse = bild.len(),
            maximum = grenzen.max_bildgroesse,
            "Profilbild zu gross"
        );
        return Err(NodeError::validierung("image"));
    }

    let dekodiert = image::load_from_memory(bild).map_err(|e| {
        tracing::debug!(fehler = %e, "Profilbild nicht lesbar");
        NodeError::validierung("image")
    })?;

    let thumbnail = dekodiert.thumbnail(grenzen.thumbnail_kante, grenzen.thumbnail_kante);
    let mut png = Cursor::new(Vec::new());
    thumbnail
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| NodeError::intern(format!("Thumbnail konnte nicht erzeugt werden: {}", e)))?;
    Ok(png.into_inner())
}

pub fn dienstname_pruefen(name: &str) -> NodeResult<()> {
    if name.is_empty() || name.len() > MAX_SERVICE_NAME_BYTES {
        return Err(NodeError::validierung("serviceName"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
