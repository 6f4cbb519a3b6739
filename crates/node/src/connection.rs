//! Verbindung – Eine akzeptierte TCP- oder TLS-Verbindung
//!
//! Jede Verbindung hat genau einen Lese-Task ([`verarbeiten`]), aber zwei
//! Schreibquellen: den eigenen Antwortpfad und Pushes des Nodes (Anruf- und
//! Relay-Benachrichtigungen) aus fremden Tasks. Beide schreiben ueber
//! [`Connection::senden`], das den Schreiber fuer einen ganzen Frame sperrt.
//!
//! ## Push-Requests
//! Vom Node ausgeloeste Requests nutzen eine eigene ID-Sequenz. Die Antwort
//! des Clients kommt ueber den Lese-Task herein und wird per
//! [`Connection::antwort_zustellen`] an den wartenden Task weitergereicht.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use homenet_core::{ConnectionId, ServerRole};
use homenet_protocol::message::{RequestPayload, Response};
use homenet_protocol::wire::{encode_message, read_message};
use homenet_protocol::{Message, WireError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::conversation::{Conversation, ConversationState};
use crate::dispatcher::{Antwort, MessageDispatcher};
use crate::error::{NodeError, NodeResult};
use crate::state::NodeState;

/// Lesehaelfte einer Verbindung
pub type Leser = Box<dyn AsyncRead + Send + Unpin>;
/// Schreibhaelfte einer Verbindung
pub type Schreiber = Box<dyn AsyncWrite + Send + Unpin>;

/// Rollen, die ohne Handshake auskommen
const ROLLEN_OHNE_HANDSHAKE: [ServerRole; 2] = [ServerRole::Primary, ServerRole::ClAppService];

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    /// Rollen des Ports, auf dem die Verbindung angenommen wurde
    rollen: Vec<ServerRole>,
    max_groesse: usize,
    /// `None` nach dem Aufraeumen
    schreiber: tokio::sync::Mutex<Option<Schreiber>>,
    gespraech: parking_lot::Mutex<Conversation>,
    keepalive_frist: parking_lot::Mutex<Instant>,
    push_id: AtomicU32,
    ausstehend: DashMap<u32, oneshot::Sender<Response>>,
    geschlossen: CancellationToken,
}

impl Connection {
    pub fn neu(
        peer_addr: SocketAddr,
        rollen: Vec<ServerRole>,
        schreiber: Schreiber,
        max_groesse: usize,
        keepalive: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            peer_addr,
            rollen,
            max_groesse,
            schreiber: tokio::sync::Mutex::new(Some(schreiber)),
            gespraech: parking_lot::Mutex::new(Conversation::neu()),
            keepalive_frist: parking_lot::Mutex::new(Instant::now() + keepalive),
            push_id: AtomicU32::new(1),
            ausstehend: DashMap::new(),
            geschlossen: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn rollen(&self) -> &[ServerRole] {
        &self.rollen
    }

    pub fn hat_rolle(&self, rolle: ServerRole) -> bool {
        self.rollen.contains(&rolle)
    }

    /// Braucht diese Verbindung einen Handshake innerhalb der Frist?
    pub fn braucht_handshake(&self) -> bool {
        !self
            .rollen
            .iter()
            .any(|r| ROLLEN_OHNE_HANDSHAKE.contains(r))
    }

    /// Zugriff auf den Gespraechszustand
    ///
    /// Die Sperre wird nie ueber einen `.await` gehalten.
    pub fn mit_gespraech<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        f(&mut self.gespraech.lock())
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    /// Schreibt eine Nachricht als ganzen Frame
    pub async fn senden(&self, nachricht: &Message) -> NodeResult<()> {
        let frame = encode_message(nachricht, self.max_groesse)?;

        let mut schreiber = tokio::select! {
            guard = self.schreiber.lock() => guard,
            _ = self.geschlossen.cancelled() => return Err(NodeError::VerbindungGetrennt),
        };
        let Some(stream) = schreiber.as_mut() else {
            return Err(NodeError::VerbindungGetrennt);
        };

        let ergebnis = tokio::select! {
            r = async {
                stream.write_all(&frame).await?;
                stream.flush().await
            } => r,
            _ = self.geschlossen.cancelled() => return Err(NodeError::VerbindungGetrennt),
        };

        if let Err(e) = ergebnis {
            tracing::debug!(verbindung = %self.id, fehler = %e, "Schreiben fehlgeschlagen");
            drop(schreiber);
            self.schliessen();
            return Err(NodeError::Io(e));
        }
        Ok(())
    }

    /// Sendet einen Node-Request und wartet begrenzt auf die Antwort
    ///
    /// Die Frist umfasst Schreiben und Warten. Liest die Gegenstelle nicht,
    /// bleibt nach Ablauf evtl. ein halber Frame im Stream; die Verbindung
    /// wird dann geschlossen.
    pub async fn anfrage_senden(
        &self,
        payload: RequestPayload,
        frist: Duration,
    ) -> NodeResult<Response> {
        let id = self.push_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.ausstehend.insert(id, tx);

        let geschrieben = AtomicBool::new(false);
        let austausch = async {
            self.senden(&Message::request(id, payload)).await?;
            geschrieben.store(true, Ordering::Relaxed);
            rx.await.map_err(|_| NodeError::VerbindungGetrennt)
        };

        let ergebnis = tokio::select! {
            r = tokio::time::timeout(frist, austausch) => match r {
                Ok(r) => r,
                Err(_) => {
                    if !geschrieben.load(Ordering::Relaxed) {
                        tracing::warn!(verbindung = %self.id, "Push nicht schreibbar, Verbindung wird geschlossen");
                        self.schliessen();
                    }
                    Err(NodeError::Timeout(format!(
                        "keine Bestaetigung von {} innerhalb {:?}",
                        self.id, frist
                    )))
                }
            },
            _ = self.geschlossen.cancelled() => Err(NodeError::VerbindungGetrennt),
        };
        self.ausstehend.remove(&id);
        ergebnis
    }

    /// Reicht eine Client-Antwort an den wartenden Push-Request weiter
    ///
    /// Gibt `false` zurueck, wenn niemand auf diese ID wartet.
    pub fn antwort_zustellen(&self, id: u32, antwort: Response) -> bool {
        match self.ausstehend.remove(&id) {
            Some((_, tx)) => tx.send(antwort).is_ok(),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Markiert die Verbindung als geschlossen (idempotent)
    ///
    /// Weckt den Lese-Task und alle wartenden Push-Requests. Den Stream
    /// selbst schliesst der Lese-Task beim Aufraeumen.
    pub fn schliessen(&self) {
        if self.geschlossen.is_cancelled() {
            return;
        }
        self.geschlossen.cancel();
        self.gespraech.lock().schliessen();
        self.ausstehend.clear();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.is_cancelled()
    }

    /// Wird fertig, sobald die Verbindung geschlossen ist
    pub async fn geschlossen(&self) {
        self.geschlossen.cancelled().await
    }

    pub fn keepalive_erneuern(&self, dauer: Duration) {
        *self.keepalive_frist.lock() = Instant::now() + dauer;
    }

    pub fn keepalive_abgelaufen(&self, jetzt: Instant) -> bool {
        jetzt > *self.keepalive_frist.lock()
    }

    /// Faehrt die Schreibhaelfte herunter und gibt sie frei
    async fn schreiber_schliessen(&self) {
        let stream = self.schreiber.lock().await.take();
        if let Some(mut stream) = stream {
            // Fehler hier stammen von bereits getrennten Gegenstellen
            let _ = tokio::time::timeout(Duration::from_secs(1), stream.shutdown()).await;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("rollen", &self.rollen)
            .field("geschlossen", &self.ist_geschlossen())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Lese-Schleife
// ---------------------------------------------------------------------------

/// Verarbeitet eine Verbindung bis sie getrennt, geschlossen oder der Node
/// heruntergefahren wird
///
/// Die Verbindung muss bereits in der Registry stehen; beim Verlassen wird
/// sie dort entfernt und ihre Relay-Legs werden beendet.
pub async fn verarbeiten(
    conn: Arc<Connection>,
    mut leser: Leser,
    state: Arc<NodeState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
    let max = state.config.max_nachrichtengroesse;
    let handshake_frist = Instant::now() + state.config.handshake_timeout;
    let braucht_handshake = conn.braucht_handshake();

    tracing::info!(
        verbindung = %conn.id(),
        peer = %conn.peer_addr(),
        "Neue Verbindung"
    );

    loop {
        let wartet_auf_handshake = braucht_handshake
            && conn.mit_gespraech(|g| g.zustand() == ConversationState::New);

        tokio::select! {
            gelesen = read_message(&mut leser, max) => {
                let nachricht = match gelesen {
                    Ok(n) => n,
                    Err(WireError::ConnectionClosed) => {
                        tracing::info!(verbindung = %conn.id(), "Verbindung vom Client getrennt");
                        break;
                    }
                    Err(e) if e.ist_protokollverletzung() => {
                        tracing::warn!(
                            verbindung = %conn.id(),
                            fehler = %e,
                            "Protokollverletzung – Verbindung wird geschlossen"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(verbindung = %conn.id(), fehler = %e, "Frame-Lesefehler");
                        break;
                    }
                };

                match dispatcher.dispatch(&conn, nachricht).await {
                    Antwort::Sofort(antwort) => {
                        if conn.senden(&antwort).await.is_err() {
                            break;
                        }
                    }
                    Antwort::Schliessen(antwort) => {
                        let _ = conn.senden(&antwort).await;
                        break;
                    }
                    Antwort::Spaeter | Antwort::Keine => {}
                }
            }

            _ = conn.geschlossen() => {
                tracing::debug!(verbindung = %conn.id(), "Verbindung wurde geschlossen");
                break;
            }

            _ = tokio::time::sleep_until(handshake_frist), if wartet_auf_handshake => {
                tracing::warn!(verbindung = %conn.id(), "Handshake-Timeout");
                break;
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(verbindung = %conn.id(), "Shutdown-Signal – Verbindung wird getrennt");
                    break;
                }
            }
        }
    }

    aufraeumen(&conn, &state).await;
    tracing::info!(verbindung = %conn.id(), "Verbindungs-Task beendet");
}

/// Gibt alle Ressourcen einer beendeten Verbindung frei
async fn aufraeumen(conn: &Arc<Connection>, state: &NodeState) {
    conn.schliessen();
    state.registry.entfernen(conn.id());
    state.relay.verbindung_getrennt(conn.id());
    conn.schreiber_schliessen().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
