//! Profil-Store: Schnittstelle zur externen Profilhaltung
//!
//! Der Node liest Profile zur Verifikation (Anrufe, Identitaetsabfragen) und
//! schreibt sie bei Profil-Updates. Wie und wo die Datensaetze persistiert
//! werden, entscheidet die Implementierung von [`ProfileStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{HomeNetError, HomeNetResult};
use crate::types::{IdentityId, ProtocolVersion};

/// Profil einer vom Node gehosteten Identitaet
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub public_key: [u8; 32],
    /// `None` solange das Profil nicht initialisiert wurde
    pub version: Option<ProtocolVersion>,
    pub name: String,
    /// Kodierte GPS-Position (32 Bit)
    pub location: u32,
    pub extra_data: String,
    pub profile_image: Option<Vec<u8>>,
    pub thumbnail_image: Option<Vec<u8>>,
    pub gehostet_seit: DateTime<Utc>,
}

impl IdentityRecord {
    /// Neuer, noch nicht initialisierter Datensatz (nach EstablishHomeNode)
    pub fn neu(id: IdentityId, public_key: [u8; 32]) -> Self {
        Self {
            id,
            public_key,
            version: None,
            name: String::new(),
            location: 0,
            extra_data: String::new(),
            profile_image: None,
            thumbnail_image: None,
            gehostet_seit: Utc::now(),
        }
    }

    /// Ein Profil gilt als initialisiert, sobald eine Version gesetzt ist
    pub fn ist_initialisiert(&self) -> bool {
        self.version.is_some()
    }

    /// Uebernimmt alle gesetzten Felder eines Updates
    ///
    /// Ein leeres Bild entfernt das vorhandene Profilbild samt Thumbnail.
    pub fn anwenden(&mut self, update: ProfileUpdate) {
        if let Some(version) = update.version {
            self.version = Some(version);
        }
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(location) = update.location {
            self.location = location;
        }
        if let Some(extra) = update.extra_data {
            self.extra_data = extra;
        }
        if let Some(bild) = update.profile_image {
            if bild.is_empty() {
                self.profile_image = None;
                self.thumbnail_image = None;
            } else {
                self.profile_image = Some(bild);
                self.thumbnail_image = update.thumbnail_image;
            }
        }
    }
}

/// Bereits validierte Aenderungen an einem Profil
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub version: Option<ProtocolVersion>,
    pub name: Option<String>,
    pub profile_image: Option<Vec<u8>>,
    pub thumbnail_image: Option<Vec<u8>>,
    pub location: Option<u32>,
    pub extra_data: Option<String>,
}

/// Externe Profilhaltung
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Liefert den Datensatz einer Identitaet, falls gehostet
    async fn get(&self, id: &IdentityId) -> HomeNetResult<Option<IdentityRecord>>;

    /// Legt einen neuen gehosteten Datensatz an
    ///
    /// Schlaegt mit [`HomeNetError::IdentitaetVorhanden`] fehl, wenn die
    /// Identitaet bereits gehostet wird.
    async fn create(&self, record: IdentityRecord) -> HomeNetResult<()>;

    /// Wendet ein Update an und gibt den neuen Stand zurueck
    async fn update(&self, id: &IdentityId, update: ProfileUpdate)
        -> HomeNetResult<IdentityRecord>;
}

/// Fluechtiger Profil-Store im Speicher
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profile: DashMap<IdentityId, IdentityRecord>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anzahl(&self) -> usize {
        self.profile.len()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, id: &IdentityId) -> HomeNetResult<Option<IdentityRecord>> {
        Ok(self.profile.get(id).map(|r| r.value().clone()))
    }

    async fn create(&self, record: IdentityRecord) -> HomeNetResult<()> {
        match self.profile.entry(record.id) {
            Entry::Occupied(_) => Err(HomeNetError::IdentitaetVorhanden(record.id.to_string())),
            Entry::Vacant(frei) => {
                frei.insert(record);
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        id: &IdentityId,
        update: ProfileUpdate,
    ) -> HomeNetResult<IdentityRecord> {
        let mut eintrag = self
            .profile
            .get_mut(id)
            .ok_or_else(|| HomeNetError::IdentitaetNichtGefunden(id.to_string()))?;
        eintrag.anwenden(update);
        Ok(eintrag.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(b: u8) -> IdentityRecord {
        IdentityRecord::neu(IdentityId([b; 20]), [b; 32])
    }

    #[tokio::test]
    async fn anlegen_und_lesen() {
        let store = InMemoryProfileStore::new();
        store.create(test_record(1)).await.unwrap();

        let record = store.get(&IdentityId([1; 20])).await.unwrap().unwrap();
        assert!(!record.ist_initialisiert());
        assert_eq!(record.public_key, [1; 32]);
        assert!(store.get(&IdentityId([2; 20])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn doppeltes_anlegen_schlaegt_fehl() {
        let store = InMemoryProfileStore::new();
        store.create(test_record(1)).await.unwrap();
        let result = store.create(test_record(1)).await;
        assert!(matches!(result, Err(HomeNetError::IdentitaetVorhanden(_))));
        assert_eq!(store.anzahl(), 1);
    }

    #[tokio::test]
    async fn update_initialisiert_profil() {
        let store = InMemoryProfileStore::new();
        store.create(test_record(3)).await.unwrap();

        let neu = store
            .update(
                &IdentityId([3; 20]),
                ProfileUpdate {
                    version: Some(ProtocolVersion::V1_0_0),
                    name: Some("Test Identity".into()),
                    location: Some(0x12345678),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(neu.ist_initialisiert());
        assert_eq!(neu.name, "Test Identity");
        assert_eq!(neu.location, 0x12345678);
        assert_eq!(neu.extra_data, "");
    }

    #[tokio::test]
    async fn update_unbekannter_identitaet() {
        let store = InMemoryProfileStore::new();
        let result = store
            .update(&IdentityId([9; 20]), ProfileUpdate::default())
            .await;
        assert!(matches!(
            result,
            Err(HomeNetError::IdentitaetNichtGefunden(_))
        ));
    }

    #[test]
    fn leeres_bild_entfernt_bild_und_thumbnail() {
        let mut record = test_record(4);
        record.anwenden(ProfileUpdate {
            profile_image: Some(vec![1, 2, 3]),
            thumbnail_image: Some(vec![4]),
            ..Default::default()
        });
        assert_eq!(record.thumbnail_image, Some(vec![4]));

        record.anwenden(ProfileUpdate {
            profile_image: Some(Vec::new()),
            ..Default::default()
        });
        assert!(record.profile_image.is_none());
        assert!(record.thumbnail_image.is_none());
    }
}
