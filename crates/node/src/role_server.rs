//! Rollen-Server – Ein Listener pro konfiguriertem Port
//!
//! Mehrere Rollen koennen sich einen Port teilen. Der Start ist
//! alles-oder-nichts: schlaegt ein Bind fehl, werden alle bereits
//! gebundenen Listener wieder freigegeben und der Start schlaegt fehl.
//!
//! ## Concurrency-Modell
//! Jeder Listener hat eine Accept-Loop als eigenen Task, jede akzeptierte
//! Verbindung ebenfalls. Ein gemeinsames `watch`-Signal beendet Accept-Loops,
//! Verbindungen und den Liveness-Monitor.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use homenet_core::ServerRole;
use homenet_crypto::{tls_acceptor, CertificateSupplier};
use homenet_protocol::message::RoleEntry;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::connection::{verarbeiten, Connection, Leser, Schreiber};
use crate::error::{NodeError, NodeResult};
use crate::liveness::LivenessMonitor;
use crate::registry::ClientRegistry;
use crate::state::{NodeState, RoleServerConfig};

/// Ein laufender Listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleServerInfo {
    pub endpoint: SocketAddr,
    pub rollen: Vec<ServerRole>,
    pub tls: bool,
}

pub struct RoleServerManager {
    state: Arc<NodeState>,
    server: Vec<RoleServerInfo>,
    shutdown_tx: watch::Sender<bool>,
    accept_tasks: Vec<JoinHandle<()>>,
    monitor: LivenessMonitor,
}

impl RoleServerManager {
    /// Bindet alle Listener und startet Accept-Loops und Liveness-Monitor
    pub async fn starten(
        state: Arc<NodeState>,
        zertifikate: &dyn CertificateSupplier,
    ) -> NodeResult<Self> {
        konfiguration_pruefen(&state.config.rollen_server)?;

        let acceptor = if state.config.rollen_server.iter().any(|s| s.tls) {
            Some(tls_acceptor(&zertifikate.zertifikat()?)?)
        } else {
            None
        };

        let mut gebunden: Vec<(TcpListener, RoleServerConfig)> = Vec::new();
        for config in &state.config.rollen_server {
            let adresse = SocketAddr::new(state.config.bind_adresse, config.port);
            match TcpListener::bind(adresse).await {
                Ok(listener) => gebunden.push((listener, config.clone())),
                Err(quelle) => {
                    tracing::error!(
                        port = config.port,
                        fehler = %quelle,
                        bereits_gebunden = gebunden.len(),
                        "Listener konnte nicht gebunden werden – Start abgebrochen"
                    );
                    // Bereits gebundene Listener werden hier freigegeben
                    drop(gebunden);
                    return Err(NodeError::Bind {
                        port: config.port,
                        quelle,
                    });
                }
            }
        }

        let mut server = Vec::with_capacity(gebunden.len());
        let mut eintraege = Vec::new();
        for (listener, config) in &gebunden {
            let endpoint = listener.local_addr()?;
            for rolle in &config.rollen {
                eintraege.push(RoleEntry {
                    role: *rolle,
                    port: endpoint.port(),
                    is_tcp: true,
                    is_tls: config.tls,
                });
            }
            server.push(RoleServerInfo {
                endpoint,
                rollen: config.rollen.clone(),
                tls: config.tls,
            });
        }
        state.rollen_setzen(eintraege);

        let (shutdown_tx, _) = watch::channel(false);
        let mut accept_tasks = Vec::with_capacity(gebunden.len());
        for (listener, config) in gebunden {
            let acceptor = if config.tls { acceptor.clone() } else { None };
            let state = Arc::clone(&state);
            let shutdown_rx = shutdown_tx.subscribe();
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                config.rollen,
                acceptor,
                state,
                shutdown_rx,
            )));
        }

        let monitor = LivenessMonitor::starten(
            state.registry.clone(),
            state.config.liveness_intervall,
            shutdown_tx.subscribe(),
        );

        for info in &server {
            tracing::info!(
                adresse = %info.endpoint,
                rollen = ?info.rollen,
                tls = info.tls,
                "Rollen-Server gestartet"
            );
        }

        Ok(Self {
            state,
            server,
            shutdown_tx,
            accept_tasks,
            monitor,
        })
    }

    /// Aktive Listener (Endpunkt + Rollen)
    pub fn rollen_server(&self) -> &[RoleServerInfo] {
        &self.server
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.state.registry
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    /// Port, der eine Rolle bedient
    pub fn port_fuer(&self, rolle: ServerRole) -> Option<u16> {
        self.server
            .iter()
            .find(|s| s.rollen.contains(&rolle))
            .map(|s| s.endpoint.port())
    }

    /// Stoppt Accept-Loops, schliesst alle Verbindungen und wartet begrenzt
    /// auf den Liveness-Monitor
    ///
    /// Gibt `false` zurueck, wenn der Monitor nicht rechtzeitig fertig wurde.
    pub async fn herunterfahren(self) -> bool {
        tracing::info!("Rollen-Server werden heruntergefahren");
        let _ = self.shutdown_tx.send(true);

        for task in self.accept_tasks {
            if let Err(e) = task.await {
                tracing::warn!(fehler = %e, "Accept-Loop nicht sauber beendet");
            }
        }

        let verbindungen = self.state.registry.schnappschuss();
        let anzahl = verbindungen.len();
        for conn in verbindungen {
            conn.schliessen();
        }

        let monitor_beendet = self
            .monitor
            .stoppen(self.state.config.monitor_stopp_timeout)
            .await;
        if !monitor_beendet {
            tracing::warn!("Liveness-Monitor hat das Herunterfahren nicht rechtzeitig abgeschlossen");
        }

        tracing::info!(verbindungen = anzahl, "Rollen-Server gestoppt");
        monitor_beendet
    }
}

/// Jede Rolle hoechstens einmal, jeder feste Port hoechstens einmal
fn konfiguration_pruefen(server: &[RoleServerConfig]) -> NodeResult<()> {
    if server.is_empty() {
        return Err(NodeError::Konfiguration("keine Rollen-Server konfiguriert".into()));
    }
    let mut rollen = HashSet::new();
    let mut ports = HashSet::new();
    for config in server {
        if config.rollen.is_empty() {
            return Err(NodeError::Konfiguration(format!(
                "Port {} bedient keine Rolle",
                config.port
            )));
        }
        if config.port != 0 && !ports.insert(config.port) {
            return Err(NodeError::Konfiguration(format!(
                "Port {} mehrfach konfiguriert",
                config.port
            )));
        }
        for rolle in &config.rollen {
            if !rollen.insert(*rolle) {
                return Err(NodeError::Konfiguration(format!(
                    "Rolle {} mehrfach konfiguriert",
                    rolle
                )));
            }
        }
    }
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    rollen: Vec<ServerRole>,
    acceptor: Option<TlsAcceptor>,
    state: Arc<NodeState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");
                        tokio::spawn(verbindung_annehmen(
                            stream,
                            peer_addr,
                            rollen.clone(),
                            acceptor.clone(),
                            Arc::clone(&state),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(rollen = ?rollen, "Accept-Loop beendet");
}

/// TLS-Handshake (falls noetig), Registrierung und Lese-Schleife
async fn verbindung_annehmen(
    stream: TcpStream,
    peer_addr: SocketAddr,
    rollen: Vec<ServerRole>,
    acceptor: Option<TlsAcceptor>,
    state: Arc<NodeState>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);

    let (leser, schreiber): (Leser, Schreiber) = match acceptor {
        Some(acceptor) => {
            match tokio::time::timeout(state.config.handshake_timeout, acceptor.accept(stream)).await
            {
                Ok(Ok(tls)) => {
                    let (r, w) = tokio::io::split(tls);
                    (Box::new(r), Box::new(w))
                }
                Ok(Err(e)) => {
                    tracing::warn!(peer = %peer_addr, fehler = %e, "TLS-Handshake fehlgeschlagen");
                    return;
                }
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "TLS-Handshake-Timeout");
                    return;
                }
            }
        }
        None => {
            let (r, w) = stream.into_split();
            (Box::new(r), Box::new(w))
        }
    };

    let conn = Connection::neu(
        peer_addr,
        rollen,
        schreiber,
        state.config.max_nachrichtengroesse,
        state.config.keepalive,
    );
    state.registry.hinzufuegen(Arc::clone(&conn));
    verarbeiten(conn, leser, state, shutdown_rx).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
