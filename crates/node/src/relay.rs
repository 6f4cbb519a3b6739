//! Anruf-Relay – Verbindet zwei Identitaeten ueber den Node
//!
//! ## Ablauf
//! ```text
//! Anrufer                      Node                        Angerufener
//!    | CallIdentityAppService    |                               |
//!    |-------------------------->| IncomingCallNotification      |
//!    |                           |------------------------------>|
//!    |                           |<------------------ Ok (Ack) --|
//!    |<----- Ok{callerToken} ----|            Offered            |
//!    |                           |                               |
//!    | SendMessage{callerToken}  |   SendMessage{calleeToken}    |
//!    |==========================>|<==============================|
//!    |    (neue App-Service-Verbindungen)      Established       |
//! ```
//!
//! Sitzungszustand: `Pending -> Offered -> Established -> Terminated`, nur
//! vorwaerts. Jede Sitzung hat ihre eigene Sperre fuer die Leg-Bindung; die
//! Token-Tabellen des Managers werden nie gesperrt gehalten, waehrend eine
//! Sitzungssperre genommen wird.
//!
//! Endet ein Leg, wird die Sitzung beendet. Das ueberlebende Leg wird nicht
//! aktiv benachrichtigt: jeder weitere Sendeversuch schlaegt fehl, und die
//! Verbindung selbst faellt spaetestens ihrem Keepalive zum Opfer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use homenet_core::{ConnectionId, IdentityId, ProfileStore};
use homenet_protocol::message::{
    ApplicationServiceReceiveMessageNotificationRequest, IncomingCallNotificationRequest,
    RequestPayload,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{watch, OwnedMutexGuard};

use crate::connection::Connection;
use crate::error::{NodeError, NodeResult};
use crate::registry::ClientRegistry;

pub const TOKEN_LEN: usize = 32;

// ---------------------------------------------------------------------------
// CallToken
// ---------------------------------------------------------------------------

/// Nicht erratbares Token fuer genau ein Leg eines Anrufs
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallToken([u8; TOKEN_LEN]);

impl CallToken {
    pub fn zufaellig() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl fmt::Debug for CallToken {
    // Nur ein Praefix, Tokens sind Zugangsdaten
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallToken({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    /// Benachrichtigung an den Angerufenen unterwegs
    Pending,
    /// Angerufener hat bestaetigt, Anrufer hat sein Token
    Offered,
    /// Beide Legs gebunden
    Established,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seite {
    Anrufer,
    Angerufener,
}

impl Seite {
    fn index(self) -> usize {
        match self {
            Seite::Anrufer => 0,
            Seite::Angerufener => 1,
        }
    }

    fn gegenueber(self) -> Seite {
        match self {
            Seite::Anrufer => Seite::Angerufener,
            Seite::Angerufener => Seite::Anrufer,
        }
    }
}

pub struct CallSession {
    pub caller_id: IdentityId,
    pub callee_id: IdentityId,
    pub service_name: String,
    caller_token: CallToken,
    callee_token: CallToken,
    pub erstellt_am: DateTime<Utc>,
    zustand: watch::Sender<CallState>,
    legs: parking_lot::Mutex<[Option<Arc<Connection>>; 2]>,
    /// Hoechstens eine unbestaetigte Nachricht pro Richtung
    sende_sperren: [Arc<tokio::sync::Mutex<()>>; 2],
}

impl CallSession {
    fn neu(caller_id: IdentityId, callee_id: IdentityId, service_name: String) -> Self {
        let caller_token = CallToken::zufaellig();
        let mut callee_token = CallToken::zufaellig();
        while callee_token == caller_token {
            callee_token = CallToken::zufaellig();
        }
        let (zustand, _) = watch::channel(CallState::Pending);
        Self {
            caller_id,
            callee_id,
            service_name,
            caller_token,
            callee_token,
            erstellt_am: Utc::now(),
            zustand,
            legs: parking_lot::Mutex::new([None, None]),
            sende_sperren: [
                Arc::new(tokio::sync::Mutex::new(())),
                Arc::new(tokio::sync::Mutex::new(())),
            ],
        }
    }

    pub fn zustand(&self) -> CallState {
        *self.zustand.borrow()
    }

    pub fn caller_token(&self) -> CallToken {
        self.caller_token
    }

    pub fn callee_token(&self) -> CallToken {
        self.callee_token
    }

    /// Setzt den Zustand, falls er damit vorwaerts geht
    fn weiter(&self, neu: CallState) -> bool {
        self.zustand.send_if_modified(|z| {
            if neu > *z {
                *z = neu;
                true
            } else {
                false
            }
        })
    }

    /// Angerufener hat die Benachrichtigung bestaetigt
    ///
    /// `false`, wenn die Sitzung inzwischen beendet wurde.
    fn annehmen(&self) -> bool {
        let legs = self.legs.lock();
        if !self.weiter(CallState::Offered) {
            return false;
        }
        if legs.iter().all(Option::is_some) {
            self.aufgebaut();
        }
        true
    }

    /// Bindet eine Verbindung an ein Leg
    fn binden(&self, seite: Seite, conn: Arc<Connection>) -> NodeResult<()> {
        let mut legs = self.legs.lock();
        match self.zustand() {
            CallState::Terminated => {
                return Err(NodeError::NichtGefunden("Anruf beendet".into()));
            }
            CallState::Established => {
                return Err(NodeError::Zustand("Token bereits gebunden".into()));
            }
            CallState::Pending | CallState::Offered => {}
        }
        let platz = &mut legs[seite.index()];
        if platz.is_some() {
            return Err(NodeError::Zustand("Token bereits gebunden".into()));
        }
        *platz = Some(conn);

        if legs.iter().all(Option::is_some) && self.zustand() == CallState::Offered {
            self.aufgebaut();
        }
        Ok(())
    }

    fn aufgebaut(&self) {
        if self.weiter(CallState::Established) {
            tracing::info!(
                anrufer = %self.caller_id,
                angerufener = %self.callee_id,
                dienst = %self.service_name,
                "Anruf aufgebaut"
            );
        }
    }

    /// Gebundene Verbindung der anderen Seite
    pub fn gegenueber(&self, seite: Seite) -> Option<Arc<Connection>> {
        self.legs.lock()[seite.gegenueber().index()].clone()
    }

    /// Beendet die Sitzung; gibt die freigegebenen Legs zurueck, falls sie
    /// nicht schon beendet war
    fn beenden(&self) -> Option<Vec<Arc<Connection>>> {
        let mut legs = self.legs.lock();
        if !self.weiter(CallState::Terminated) {
            return None;
        }
        Some(legs.iter_mut().filter_map(Option::take).collect())
    }

    /// Wartet begrenzt, bis beide Legs gebunden sind
    pub async fn warten_auf_aufbau(&self, frist: Duration) -> NodeResult<()> {
        let mut rx = self.zustand.subscribe();
        let ergebnis = tokio::time::timeout(
            frist,
            rx.wait_for(|z| *z >= CallState::Established),
        )
        .await;
        match ergebnis {
            Ok(Ok(z)) if *z == CallState::Established => Ok(()),
            Ok(_) => Err(NodeError::NichtGefunden("Anruf beendet".into())),
            Err(_) => Err(NodeError::Timeout("Anruf nicht aufgebaut".into())),
        }
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("caller_id", &self.caller_id)
            .field("callee_id", &self.callee_id)
            .field("service_name", &self.service_name)
            .field("zustand", &self.zustand())
            .finish()
    }
}

/// An ein Leg gebundene Verbindung
#[derive(Debug, Clone)]
pub struct LegHandle {
    pub sitzung: Arc<CallSession>,
    pub seite: Seite,
    pub token: CallToken,
}

// ---------------------------------------------------------------------------
// CallRelayManager
// ---------------------------------------------------------------------------

struct RelayInner {
    /// Token -> Sitzung und Seite des Tokens
    sitzungen: DashMap<CallToken, (Arc<CallSession>, Seite)>,
    /// Gebundene App-Service-Verbindung -> Token
    legs: DashMap<ConnectionId, CallToken>,
    ack_timeout: Duration,
    bindung_timeout: Duration,
}

/// Verwaltet alle Anruf-Sitzungen; Clone teilt den inneren Zustand
#[derive(Clone)]
pub struct CallRelayManager {
    inner: Arc<RelayInner>,
}

impl CallRelayManager {
    pub fn neu(ack_timeout: Duration, bindung_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                sitzungen: DashMap::new(),
                legs: DashMap::new(),
                ack_timeout,
                bindung_timeout,
            }),
        }
    }

    /// Bietet dem Angerufenen einen Anruf an und wartet auf seine Bestaetigung
    ///
    /// Gibt das Token des Anrufers zurueck, sobald der Angerufene die
    /// Benachrichtigung mit `Ok` bestaetigt hat.
    pub async fn anruf_anbieten(
        &self,
        profile: &dyn ProfileStore,
        registry: &ClientRegistry,
        anrufer_key: &[u8],
        anrufer_id: IdentityId,
        angerufener_id: IdentityId,
        dienst: &str,
    ) -> NodeResult<CallToken> {
        let record = profile
            .get(&angerufener_id)
            .await?
            .ok_or_else(|| NodeError::NichtGefunden(format!("Identitaet {}", angerufener_id)))?;
        if !record.ist_initialisiert() {
            return Err(NodeError::NichtInitialisiert(format!(
                "Identitaet {}",
                angerufener_id
            )));
        }

        let angerufener = registry
            .nach_identitaet(&angerufener_id)
            .ok_or_else(|| NodeError::NichtGefunden(format!("{} ist nicht online", angerufener_id)))?;
        if !angerufener.mit_gespraech(|g| g.bietet_dienst(dienst)) {
            return Err(NodeError::NichtGefunden(format!("Dienst '{}'", dienst)));
        }

        let sitzung = Arc::new(CallSession::neu(
            anrufer_id,
            angerufener_id,
            dienst.to_string(),
        ));
        self.inner.sitzungen.insert(
            sitzung.caller_token,
            (Arc::clone(&sitzung), Seite::Anrufer),
        );
        self.inner.sitzungen.insert(
            sitzung.callee_token,
            (Arc::clone(&sitzung), Seite::Angerufener),
        );

        let benachrichtigung =
            RequestPayload::IncomingCallNotification(IncomingCallNotificationRequest {
                caller_public_key: anrufer_key.to_vec(),
                service_name: dienst.to_string(),
                callee_token: sitzung.callee_token.as_bytes().to_vec(),
            });

        match angerufener
            .anfrage_senden(benachrichtigung, self.inner.ack_timeout)
            .await
        {
            Ok(antwort) if antwort.status.ist_ok() => {
                if !sitzung.annehmen() {
                    return Err(NodeError::NichtGefunden("Anruf beendet".into()));
                }
                self.abbau_planen(Arc::clone(&sitzung));
                tracing::info!(
                    anrufer = %anrufer_id,
                    angerufener = %angerufener_id,
                    dienst = %dienst,
                    "Anruf angeboten"
                );
                Ok(sitzung.caller_token)
            }
            Ok(antwort) => {
                tracing::warn!(
                    angerufener = %angerufener_id,
                    status = ?antwort.status,
                    "Anruf abgelehnt"
                );
                self.sitzung_beenden(&sitzung);
                Err(NodeError::Zustand("Anruf abgelehnt".into()))
            }
            Err(e) => {
                if matches!(e, NodeError::Timeout(_)) {
                    tracing::warn!(verbindung = %angerufener.id(), "Angerufener bestaetigt nicht");
                    angerufener.schliessen();
                }
                self.sitzung_beenden(&sitzung);
                Err(e)
            }
        }
    }

    /// Beendet eine Sitzung, die nicht rechtzeitig aufgebaut wird
    fn abbau_planen(&self, sitzung: Arc<CallSession>) {
        let manager = self.clone();
        let frist = self.inner.bindung_timeout;
        tokio::spawn(async move {
            if let Err(e) = sitzung.warten_auf_aufbau(frist).await {
                if manager.sitzung_beenden(&sitzung) {
                    tracing::info!(dienst = %sitzung.service_name, grund = %e, "Anruf verfallen");
                }
            }
        });
    }

    /// Bindet die Verbindung an das Leg des Tokens
    ///
    /// Eine bereits gebundene Verbindung muss dasselbe Token weiterverwenden.
    pub fn leg_binden(&self, conn: &Arc<Connection>, token_bytes: &[u8]) -> NodeResult<LegHandle> {
        let gebunden = self.inner.legs.get(&conn.id()).map(|e| *e.value());
        if let Some(token) = gebunden {
            if token.as_bytes().as_slice() != token_bytes {
                return Err(NodeError::Zustand(
                    "Verbindung ist an ein anderes Token gebunden".into(),
                ));
            }
            let (sitzung, seite) = self
                .eintrag(&token)
                .ok_or_else(|| NodeError::NichtGefunden("Anruf beendet".into()))?;
            if sitzung.zustand() == CallState::Terminated {
                return Err(NodeError::NichtGefunden("Anruf beendet".into()));
            }
            return Ok(LegHandle {
                sitzung,
                seite,
                token,
            });
        }

        let token = CallToken::from_slice(token_bytes).ok_or_else(|| NodeError::validierung("token"))?;
        let (sitzung, seite) = self
            .eintrag(&token)
            .ok_or_else(|| NodeError::NichtGefunden("Token unbekannt".into()))?;
        sitzung.binden(seite, Arc::clone(conn))?;
        self.inner.legs.insert(conn.id(), token);

        tracing::info!(
            verbindung = %conn.id(),
            seite = ?seite,
            dienst = %sitzung.service_name,
            "Leg gebunden"
        );
        Ok(LegHandle {
            sitzung,
            seite,
            token,
        })
    }

    fn eintrag(&self, token: &CallToken) -> Option<(Arc<CallSession>, Seite)> {
        self.inner
            .sitzungen
            .get(token)
            .map(|e| (Arc::clone(&e.0), e.1))
    }

    /// Reserviert den einzigen Sendeplatz eines Legs
    pub fn sendeplatz_reservieren(&self, leg: &LegHandle) -> NodeResult<OwnedMutexGuard<()>> {
        Arc::clone(&leg.sitzung.sende_sperren[leg.seite.index()])
            .try_lock_owned()
            .map_err(|_| NodeError::Zustand("Vorherige Nachricht noch unbestaetigt".into()))
    }

    /// Leitet eine Nachricht an das andere Leg weiter
    ///
    /// Kehrt erst zurueck, wenn die Gegenseite bestaetigt hat. Der
    /// Sendeplatz bleibt bis dahin belegt.
    pub async fn weiterleiten(
        &self,
        leg: LegHandle,
        _sendeplatz: OwnedMutexGuard<()>,
        nachricht: Vec<u8>,
    ) -> NodeResult<()> {
        let frist = self.inner.ack_timeout;
        leg.sitzung.warten_auf_aufbau(frist).await?;

        let ziel = leg
            .sitzung
            .gegenueber(leg.seite)
            .ok_or_else(|| NodeError::NichtGefunden("Gegenstelle nicht gebunden".into()))?;

        let push = RequestPayload::ApplicationServiceReceiveMessageNotification(
            ApplicationServiceReceiveMessageNotificationRequest { message: nachricht },
        );
        match ziel.anfrage_senden(push, frist).await {
            Ok(antwort) if antwort.status.ist_ok() => Ok(()),
            Ok(antwort) => {
                tracing::debug!(verbindung = %ziel.id(), status = ?antwort.status, "Nachricht abgelehnt");
                Err(NodeError::Zustand("Nachricht von der Gegenstelle abgelehnt".into()))
            }
            Err(NodeError::Timeout(grund)) => {
                tracing::warn!(verbindung = %ziel.id(), "Gegenstelle bestaetigt nicht – Leg wird geschlossen");
                ziel.schliessen();
                self.sitzung_beenden(&leg.sitzung);
                Err(NodeError::Timeout(grund))
            }
            Err(_) => {
                self.sitzung_beenden(&leg.sitzung);
                Err(NodeError::NichtGefunden("Gegenstelle getrennt".into()))
            }
        }
    }

    /// Beendet die Sitzung, an die die Verbindung gebunden war
    pub fn verbindung_getrennt(&self, conn_id: ConnectionId) {
        let Some((_, token)) = self.inner.legs.remove(&conn_id) else {
            return;
        };
        if let Some((sitzung, _)) = self.eintrag(&token) {
            self.sitzung_beenden(&sitzung);
        }
    }

    /// Beendet eine Sitzung und verwirft ihre Tokens (idempotent)
    pub fn sitzung_beenden(&self, sitzung: &CallSession) -> bool {
        let Some(legs) = sitzung.beenden() else {
            return false;
        };
        let tokens = [sitzung.caller_token, sitzung.callee_token];
        for token in &tokens {
            self.inner.sitzungen.remove(token);
        }
        for conn in legs {
            self.inner
                .legs
                .remove_if(&conn.id(), |_, token| tokens.contains(token));
        }
        tracing::info!(
            anrufer = %sitzung.caller_id,
            angerufener = %sitzung.callee_id,
            dienst = %sitzung.service_name,
            "Anruf beendet"
        );
        true
    }

    /// Zustand der Sitzung eines Tokens, falls noch bekannt
    pub fn zustand(&self, token: &CallToken) -> Option<CallState> {
        self.eintrag(token).map(|(s, _)| s.zustand())
    }

    pub fn anzahl_sitzungen(&self) -> usize {
        self.inner.sitzungen.len() / 2
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{eingecheckt, test_verbindung};
    use homenet_core::{IdentityRecord, InMemoryProfileStore, ProfileUpdate, ProtocolVersion};
    use homenet_crypto::Identity;
    use homenet_protocol::message::ResponsePayload;
    use homenet_protocol::wire::read_message;
    use homenet_protocol::{Message, MessageBody, Status};

    fn manager() -> CallRelayManager {
        CallRelayManager::neu(Duration::from_secs(2), Duration::from_secs(5))
    }

    fn sitzung_anlegen(manager: &CallRelayManager) -> Arc<CallSession> {
        let sitzung = Arc::new(CallSession::neu(
            Identity::generate().id(),
            Identity::generate().id(),
            "Test Service".into(),
        ));
        manager.inner.sitzungen.insert(
            sitzung.caller_token,
            (Arc::clone(&sitzung), Seite::Anrufer),
        );
        manager.inner.sitzungen.insert(
            sitzung.callee_token,
            (Arc::clone(&sitzung), Seite::Angerufener),
        );
        sitzung
    }

    async fn initialisiertes_profil(store: &InMemoryProfileStore, identitaet: &Identity) {
        store
            .create(IdentityRecord::neu(identitaet.id(), identitaet.public_key_bytes()))
            .await
            .unwrap();
        store
            .update(
                &identitaet.id(),
                ProfileUpdate {
                    version: Some(ProtocolVersion::V1_0_0),
                    name: Some("Angerufener".into()),
                    location: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn tokens_sind_verschieden() {
        let sitzung = CallSession::neu(
            Identity::generate().id(),
            Identity::generate().id(),
            "x".into(),
        );
        assert_ne!(sitzung.caller_token(), sitzung.callee_token());
        assert!(CallToken::from_slice(&[0; 31]).is_none());
    }

    #[tokio::test]
    async fn zustand_geht_nur_vorwaerts() {
        let manager = manager();
        let sitzung = sitzung_anlegen(&manager);
        let (a, _ga) = test_verbindung();
        let (b, _gb) = test_verbindung();

        manager
            .leg_binden(&a, sitzung.callee_token.as_bytes())
            .unwrap();
        assert_eq!(sitzung.zustand(), CallState::Pending);

        assert!(sitzung.annehmen());
        assert_eq!(sitzung.zustand(), CallState::Offered);

        manager
            .leg_binden(&b, sitzung.caller_token.as_bytes())
            .unwrap();
        assert_eq!(sitzung.zustand(), CallState::Established);

        assert!(!sitzung.weiter(CallState::Offered));
        assert!(manager.sitzung_beenden(&sitzung));
        assert!(!manager.sitzung_beenden(&sitzung));
        assert_eq!(sitzung.zustand(), CallState::Terminated);
        assert_eq!(manager.anzahl_sitzungen(), 0);
    }

    #[tokio::test]
    async fn token_kann_nicht_erneut_gebunden_werden() {
        let manager = manager();
        let sitzung = sitzung_anlegen(&manager);
        let (a, _ga) = test_verbindung();
        let (b, _gb) = test_verbindung();

        manager
            .leg_binden(&a, sitzung.caller_token.as_bytes())
            .unwrap();
        let result = manager.leg_binden(&b, sitzung.caller_token.as_bytes());
        assert!(matches!(result, Err(NodeError::Zustand(_))));

        // Gleiche Verbindung, gleiches Token: erlaubt
        assert!(manager.leg_binden(&a, sitzung.caller_token.as_bytes()).is_ok());
        // Gleiche Verbindung, anderes Token: abgelehnt
        let result = manager.leg_binden(&a, sitzung.callee_token.as_bytes());
        assert!(matches!(result, Err(NodeError::Zustand(_))));
    }

    #[tokio::test]
    async fn unbekanntes_token() {
        let manager = manager();
        let (a, _ga) = test_verbindung();
        let result = manager.leg_binden(&a, CallToken::zufaellig().as_bytes());
        assert!(matches!(result, Err(NodeError::NichtGefunden(_))));
        let result = manager.leg_binden(&a, &[1, 2, 3]);
        assert!(matches!(result, Err(NodeError::Validierung { .. })));
    }

    #[tokio::test]
    async fn getrenntes_leg_beendet_sitzung() {
        let manager = manager();
        let sitzung = sitzung_anlegen(&manager);
        let (a, _ga) = test_verbindung();
        let leg = manager
            .leg_binden(&a, sitzung.caller_token.as_bytes())
            .unwrap();

        manager.verbindung_getrennt(a.id());
        assert_eq!(sitzung.zustand(), CallState::Terminated);
        assert!(manager.zustand(&sitzung.callee_token).is_none());

        let (b, _gb) = test_verbindung();
        let result = manager.leg_binden(&b, sitzung.callee_token.as_bytes());
        assert!(matches!(result, Err(NodeError::NichtGefunden(_))));

        let platz = manager.sendeplatz_reservieren(&leg).unwrap();
        let result = manager.weiterleiten(leg, platz, b"hallo".to_vec()).await;
        assert!(matches!(result, Err(NodeError::NichtGefunden(_))));
    }

    #[tokio::test]
    async fn nur_eine_nachricht_pro_richtung() {
        let manager = manager();
        let sitzung = sitzung_anlegen(&manager);
        let (a, _ga) = test_verbindung();
        let leg = manager
            .leg_binden(&a, sitzung.caller_token.as_bytes())
            .unwrap();

        let platz = manager.sendeplatz_reservieren(&leg).unwrap();
        assert!(matches!(
            manager.sendeplatz_reservieren(&leg),
            Err(NodeError::Zustand(_))
        ));
        drop(platz);
        assert!(manager.sendeplatz_reservieren(&leg).is_ok());
    }

    #[tokio::test]
    async fn weiterleiten_wartet_auf_bestaetigung() {
        let manager = manager();
        let sitzung = sitzung_anlegen(&manager);
        sitzung.annehmen();
        let (anrufer, _ga) = test_verbindung();
        let (angerufener, mut gegenstelle) = test_verbindung();
        let leg = manager
            .leg_binden(&anrufer, sitzung.caller_token.as_bytes())
            .unwrap();
        manager
            .leg_binden(&angerufener, sitzung.callee_token.as_bytes())
            .unwrap();

        let platz = manager.sendeplatz_reservieren(&leg).unwrap();
        let m = manager.clone();
        let senden = tokio::spawn(async move { m.weiterleiten(leg, platz, b"hallo".to_vec()).await });

        let push = read_message(&mut gegenstelle, 4096).await.unwrap();
        match &push.body {
            MessageBody::Request(req) => match &req.payload {
                RequestPayload::ApplicationServiceReceiveMessageNotification(n) => {
                    assert_eq!(n.message, b"hallo".to_vec());
                }
                andere => panic!("Unerwarteter Push: {:?}", andere),
            },
            MessageBody::Response(_) => panic!("Request erwartet"),
        }
        assert!(!senden.is_finished());

        let ack = Message::ok(push.id, ResponsePayload::Empty)
            .into_response()
            .unwrap();
        assert!(angerufener.antwort_zustellen(push.id, ack));
        senden.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn anruf_an_unbekannte_und_uninitialisierte_identitaet() {
        let manager = manager();
        let store = InMemoryProfileStore::new();
        let registry = ClientRegistry::neu();
        let anrufer = Identity::generate();
        let angerufener = Identity::generate();

        let result = manager
            .anruf_anbieten(
                &store,
                &registry,
                &anrufer.public_key_bytes(),
                anrufer.id(),
                angerufener.id(),
                "Test Service",
            )
            .await;
        assert!(matches!(result, Err(NodeError::NichtGefunden(_))));

        store
            .create(IdentityRecord::neu(angerufener.id(), angerufener.public_key_bytes()))
            .await
            .unwrap();
        let result = manager
            .anruf_anbieten(
                &store,
                &registry,
                &anrufer.public_key_bytes(),
                anrufer.id(),
                angerufener.id(),
                "Test Service",
            )
            .await;
        assert!(matches!(result, Err(NodeError::NichtInitialisiert(_))));
    }

    #[tokio::test]
    async fn anruf_braucht_online_und_dienst() {
        let manager = manager();
        let store = InMemoryProfileStore::new();
        let registry = ClientRegistry::neu();
        let anrufer = Identity::generate();
        let angerufener = Identity::generate();
        initialisiertes_profil(&store, &angerufener).await;

        let result = manager
            .anruf_anbieten(&store, &registry, &anrufer.public_key_bytes(), anrufer.id(), angerufener.id(), "Test Service")
            .await;
        assert!(matches!(result, Err(NodeError::NichtGefunden(_))));

        let (conn, _g) = eingecheckt(&angerufener);
        registry.hinzufuegen(Arc::clone(&conn));
        registry.identitaet_eintragen(angerufener.id(), conn.id());

        let result = manager
            .anruf_anbieten(&store, &registry, &anrufer.public_key_bytes(), anrufer.id(), angerufener.id(), "Test Service")
            .await;
        assert!(matches!(result, Err(NodeError::NichtGefunden(_))));
        assert_eq!(manager.anzahl_sitzungen(), 0);
    }

    #[tokio::test]
    async fn abgelehnter_anruf() {
        let manager = manager();
        let store = InMemoryProfileStore::new();
        let registry = ClientRegistry::neu();
        let anrufer = Identity::generate();
        let angerufener = Identity::generate();
        initialisiertes_profil(&store, &angerufener).await;

        let (conn, mut gegenstelle) = eingecheckt(&angerufener);
        conn.mit_gespraech(|g| g.dienste_hinzufuegen(&["Test Service".to_string()]))
            .unwrap();
        registry.hinzufuegen(Arc::clone(&conn));
        registry.identitaet_eintragen(angerufener.id(), conn.id());

        let c = Arc::clone(&conn);
        tokio::spawn(async move {
            let push = read_message(&mut gegenstelle, 4096).await.unwrap();
            let nein = Message::error(push.id, Status::ErrorRejected, None)
                .into_response()
                .unwrap();
            c.antwort_zustellen(push.id, nein);
            // Gegenstelle offen halten
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(gegenstelle);
        });

        let result = manager
            .anruf_anbieten(&store, &registry, &anrufer.public_key_bytes(), anrufer.id(), angerufener.id(), "Test Service")
            .await;
        assert!(matches!(result, Err(NodeError::Zustand(_))));
        assert_eq!(manager.anzahl_sitzungen(), 0);
    }

    #[tokio::test]
    async fn ungebundene_sitzung_verfaellt() {
        let manager = CallRelayManager::neu(Duration::from_secs(1), Duration::from_millis(30));
        let sitzung = sitzung_anlegen(&manager);
        sitzung.annehmen();
        manager.abbau_planen(Arc::clone(&sitzung));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sitzung.zustand(), CallState::Terminated);
        assert_eq!(manager.anzahl_sitzungen(), 0);
    }
}
