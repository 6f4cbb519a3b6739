//! Client-Registry – Alle aktiven Verbindungen des Nodes
//!
//! Primaerindex nach Verbindungs-ID, Sekundaerindex nach Identitaet fuer
//! eingecheckte Kunden (wird gebraucht, um einem Angerufenen eine
//! Anruf-Benachrichtigung zu pushen). Beide Indizes liegen hinter einer
//! gemeinsamen Sperre, damit sie nie auseinanderlaufen.

use std::collections::HashMap;
use std::sync::Arc;

use homenet_core::{ConnectionId, IdentityId};
use parking_lot::RwLock;

use crate::connection::Connection;

#[derive(Default)]
struct RegistryInner {
    verbindungen: HashMap<ConnectionId, Arc<Connection>>,
    identitaeten: HashMap<IdentityId, ConnectionId>,
}

/// Thread-sichere Registry; Clone teilt den inneren Zustand
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ClientRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn hinzufuegen(&self, conn: Arc<Connection>) {
        let id = conn.id();
        self.inner.write().verbindungen.insert(id, conn);
        tracing::debug!(verbindung = %id, "Verbindung registriert");
    }

    /// Entfernt eine Verbindung samt Identitaetseintrag (idempotent)
    pub fn entfernen(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let entfernt = inner.verbindungen.remove(&id);
        inner.identitaeten.retain(|_, conn_id| *conn_id != id);
        entfernt
    }

    /// Traegt die eingecheckte Verbindung einer Identitaet ein
    ///
    /// Gibt eine zuvor eingetragene, andere Verbindung derselben Identitaet
    /// zurueck; der Aufrufer schliesst sie.
    pub fn identitaet_eintragen(
        &self,
        identitaet: IdentityId,
        conn_id: ConnectionId,
    ) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let vorher = inner.identitaeten.insert(identitaet, conn_id)?;
        if vorher == conn_id {
            return None;
        }
        inner.verbindungen.get(&vorher).cloned()
    }

    /// Eingecheckte, offene Verbindung einer Identitaet
    pub fn nach_identitaet(&self, identitaet: &IdentityId) -> Option<Arc<Connection>> {
        let inner = self.inner.read();
        let conn_id = inner.identitaeten.get(identitaet)?;
        inner
            .verbindungen
            .get(conn_id)
            .filter(|c| !c.ist_geschlossen())
            .cloned()
    }

    pub fn ist_online(&self, identitaet: &IdentityId) -> bool {
        self.nach_identitaet(identitaet).is_some()
    }

    pub fn holen(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.read().verbindungen.get(&id).cloned()
    }

    /// Momentaufnahme aller Verbindungen; die Sperre ist danach frei
    pub fn schnappschuss(&self) -> Vec<Arc<Connection>> {
        self.inner.read().verbindungen.values().cloned().collect()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.read().verbindungen.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_verbindung;
    use homenet_crypto::Identity;

    #[tokio::test]
    async fn hinzufuegen_und_entfernen() {
        let registry = ClientRegistry::neu();
        let (conn, _g) = test_verbindung();
        registry.hinzufuegen(Arc::clone(&conn));
        assert_eq!(registry.anzahl(), 1);
        assert!(registry.holen(conn.id()).is_some());

        assert!(registry.entfernen(conn.id()).is_some());
        assert!(registry.entfernen(conn.id()).is_none());
        assert_eq!(registry.anzahl(), 0);
    }

    #[tokio::test]
    async fn identitaetsindex_folgt_der_verbindung() {
        let registry = ClientRegistry::neu();
        let identitaet = Identity::generate().id();
        let (conn, _g) = test_verbindung();
        registry.hinzufuegen(Arc::clone(&conn));

        assert!(registry.identitaet_eintragen(identitaet, conn.id()).is_none());
        assert!(registry.ist_online(&identitaet));

        registry.entfernen(conn.id());
        assert!(!registry.ist_online(&identitaet));
    }

    #[tokio::test]
    async fn neuer_check_in_verdraengt_alte_verbindung() {
        let registry = ClientRegistry::neu();
        let identitaet = Identity::generate().id();
        let (alt, _a) = test_verbindung();
        let (neu, _b) = test_verbindung();
        registry.hinzufuegen(Arc::clone(&alt));
        registry.hinzufuegen(Arc::clone(&neu));

        registry.identitaet_eintragen(identitaet, alt.id());
        let verdraengt = registry.identitaet_eintragen(identitaet, neu.id()).unwrap();
        assert_eq!(verdraengt.id(), alt.id());

        // Das Entfernen der alten Verbindung darf den neuen Eintrag nicht loeschen
        registry.entfernen(alt.id());
        assert_eq!(
            registry.nach_identitaet(&identitaet).map(|c| c.id()),
            Some(neu.id())
        );
    }

    #[tokio::test]
    async fn geschlossene_verbindung_ist_nicht_online() {
        let registry = ClientRegistry::neu();
        let identitaet = Identity::generate().id();
        let (conn, _g) = test_verbindung();
        registry.hinzufuegen(Arc::clone(&conn));
        registry.identitaet_eintragen(identitaet, conn.id());

        conn.schliessen();
        assert!(registry.nach_identitaet(&identitaet).is_none());
        assert_eq!(registry.schnappschuss().len(), 1);
    }
}
