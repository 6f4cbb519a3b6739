//! Gemeinsamer Node-Zustand
//!
//! Haelt Konfiguration, Node-Identitaet, Profil-Store, Client-Registry und
//! Relay-Manager. Alles wird als `Arc<NodeState>` zwischen den Tasks der
//! Rollen-Server, Verbindungen und des Liveness-Monitors geteilt.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use homenet_core::{ProfileStore, ServerRole};
use homenet_crypto::Identity;
use homenet_protocol::message::RoleEntry;
use homenet_protocol::wire::DEFAULT_MAX_BODY_SIZE;
use parking_lot::RwLock;

use crate::registry::ClientRegistry;
use crate::relay::CallRelayManager;
use crate::validation::ProfilGrenzen;

/// Ein Listener: Port plus die Rollen, die er bedient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleServerConfig {
    /// 0 = vom Betriebssystem vergeben
    pub port: u16,
    pub rollen: Vec<ServerRole>,
    pub tls: bool,
}

/// Konfiguration der Node-Laufzeit
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_adresse: IpAddr,
    pub rollen_server: Vec<RoleServerConfig>,
    /// Maximale Body-Groesse eines Frames
    pub max_nachrichtengroesse: usize,
    /// Zeit bis StartConversation eingehen muss
    pub handshake_timeout: Duration,
    /// Inaktivitaetsfrist fuer normale Verbindungen
    pub keepalive: Duration,
    /// Inaktivitaetsfrist fuer eingecheckte Kunden
    pub keepalive_kunde: Duration,
    /// Wartezeit auf Bestaetigung gepushter Benachrichtigungen
    pub benachrichtigung_ack_timeout: Duration,
    /// Zeit, in der beide Legs eines Anrufs ihr Token binden muessen
    pub token_bindung_timeout: Duration,
    pub liveness_intervall: Duration,
    /// Maximale Wartezeit auf den Monitor-Worker beim Herunterfahren
    pub monitor_stopp_timeout: Duration,
    pub profil: ProfilGrenzen,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_adresse: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            rollen_server: vec![
                RoleServerConfig {
                    port: 16987,
                    rollen: vec![
                        ServerRole::Primary,
                        ServerRole::NdNeighbor,
                        ServerRole::NdColleague,
                    ],
                    tls: false,
                },
                RoleServerConfig {
                    port: 16988,
                    rollen: vec![
                        ServerRole::ClNonCustomer,
                        ServerRole::ClCustomer,
                        ServerRole::ClAppService,
                    ],
                    tls: true,
                },
            ],
            max_nachrichtengroesse: DEFAULT_MAX_BODY_SIZE,
            handshake_timeout: Duration::from_secs(60),
            keepalive: Duration::from_secs(60),
            keepalive_kunde: Duration::from_secs(180),
            benachrichtigung_ack_timeout: Duration::from_secs(30),
            token_bindung_timeout: Duration::from_secs(60),
            liveness_intervall: Duration::from_secs(120),
            monitor_stopp_timeout: Duration::from_secs(10),
            profil: ProfilGrenzen::default(),
        }
    }
}

/// Gemeinsamer Node-Zustand (thread-safe, Arc-geteilt)
pub struct NodeState {
    pub config: Arc<NodeConfig>,
    /// Schluesselpaar des Nodes (Handshake-Signaturen)
    pub identitaet: Identity,
    pub profile: Arc<dyn ProfileStore>,
    pub registry: ClientRegistry,
    pub relay: CallRelayManager,
    /// Tatsaechlich gebundene Rollen-Ports (nach dem Start gefuellt)
    rollen: RwLock<Vec<RoleEntry>>,
    pub start_time: Instant,
}

impl NodeState {
    pub fn neu(
        config: NodeConfig,
        identitaet: Identity,
        profile: Arc<dyn ProfileStore>,
    ) -> Arc<Self> {
        let relay = CallRelayManager::neu(
            config.benachrichtigung_ack_timeout,
            config.token_bindung_timeout,
        );
        Arc::new(Self {
            config: Arc::new(config),
            identitaet,
            profile,
            registry: ClientRegistry::neu(),
            relay,
            rollen: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        })
    }

    /// Live-Zuordnung Rolle -> Port
    pub fn rollen_eintraege(&self) -> Vec<RoleEntry> {
        self.rollen.read().clone()
    }

    pub(crate) fn rollen_setzen(&self, eintraege: Vec<RoleEntry>) {
        *self.rollen.write() = eintraege;
    }

    /// Keepalive-Frist je nach Check-In-Status
    pub fn keepalive_fuer(&self, eingecheckt: bool) -> Duration {
        if eingecheckt {
            self.config.keepalive_kunde
        } else {
            self.config.keepalive
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use homenet_core::InMemoryProfileStore;

    #[test]
    fn standard_konfiguration_deckt_alle_rollen_ab() {
        let config = NodeConfig::default();
        for rolle in ServerRole::ALLE {
            let anzahl = config
                .rollen_server
                .iter()
                .filter(|s| s.rollen.contains(&rolle))
                .count();
            assert_eq!(anzahl, 1, "Rolle {} nicht genau einmal", rolle);
        }
        assert_eq!(config.liveness_intervall, Duration::from_secs(120));
    }

    #[test]
    fn keepalive_fuer_kunden_ist_laenger() {
        let state = NodeState::neu(
            NodeConfig::default(),
            Identity::generate(),
            Arc::new(InMemoryProfileStore::new()),
        );
        assert!(state.keepalive_fuer(true) > state.keepalive_fuer(false));
        assert!(state.rollen_eintraege().is_empty());
    }
}
