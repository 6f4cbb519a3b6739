//! homenet-node – Rollen-Server, Handshake und Anruf-Relay
//!
//! Dieser Crate implementiert die Laufzeit eines HomeNet-Nodes. Er bindet
//! die konfigurierten Rollen-Ports, fuehrt den Ed25519-Handshake, verwaltet
//! gehostete Identitaeten und deren Online-Verbindungen und vermittelt
//! Anrufe zwischen Application Services.
//!
//! ## Architektur
//!
//! ```text
//! RoleServerManager (ein Listener pro Port, optional TLS)
//!     |
//!     v
//! Connection (pro Verbindung ein Task)
//!     |  Conversation: New -> HandshakeStarted -> Authenticated(..) -> Closed
//!     |
//!     v
//! MessageDispatcher (Rollenpruefung)
//!     |
//!     +-- NodeHandler          (Ping, ListRoles)
//!     +-- ConversationHandler  (StartConversation, HomeNodeRequest, CheckIn, VerifyIdentity)
//!     +-- ProfileHandler       (UpdateProfile, GetIdentityInformation, Dienste)
//!     +-- RelayHandler         (CallIdentityApplicationService, SendMessage)
//!
//! ClientRegistry   – Offene Verbindungen, eingecheckte Identitaeten
//! CallRelayManager – Anruf-Sitzungen, Token-Bindung, Weiterleitung
//! LivenessMonitor  – Schliesst inaktive Verbindungen
//! ```

pub mod connection;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod relay;
pub mod role_server;
pub mod state;
pub mod validation;

// Bequeme Re-Exporte
pub use connection::Connection;
pub use conversation::{AuthStatus, Conversation, ConversationState};
pub use dispatcher::MessageDispatcher;
pub use error::{NodeError, NodeResult};
pub use liveness::LivenessMonitor;
pub use registry::ClientRegistry;
pub use relay::{CallRelayManager, CallState, CallToken};
pub use role_server::{RoleServerInfo, RoleServerManager};
pub use state::{NodeConfig, NodeState, RoleServerConfig};
pub use validation::ProfilGrenzen;

#[cfg(test)]
pub(crate) mod testutil {
    //! Verbindungen ueber In-Memory-Pipes fuer Unit-Tests

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::Duration;

    use homenet_core::{InMemoryProfileStore, ProtocolVersion, ServerRole};
    use homenet_crypto::{challenge_erzeugen, Identity};
    use homenet_protocol::message::StartConversationRequest;
    use tokio::io::DuplexStream;

    use crate::connection::Connection;
    use crate::conversation::AuthStatus;
    use crate::state::{NodeConfig, NodeState};

    /// Verbindung auf der Kunden-Rolle; die Gegenstelle liest, was der Node sendet
    pub fn test_verbindung() -> (Arc<Connection>, DuplexStream) {
        test_verbindung_mit_rollen(vec![ServerRole::ClCustomer])
    }

    pub fn test_verbindung_mit_rollen(rollen: Vec<ServerRole>) -> (Arc<Connection>, DuplexStream) {
        let (node_seite, gegenstelle) = tokio::io::duplex(64 * 1024);
        let (_leser, schreiber) = tokio::io::split(node_seite);
        let conn = Connection::neu(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000),
            rollen,
            Box::new(schreiber),
            1024 * 1024,
            Duration::from_secs(60),
        );
        (conn, gegenstelle)
    }

    /// Verbindung, deren Konversation fuer `identitaet` eingecheckt ist
    pub fn eingecheckt(identitaet: &Identity) -> (Arc<Connection>, DuplexStream) {
        let (conn, gegenstelle) = test_verbindung();
        let node = Identity::generate();
        let anfrage = StartConversationRequest {
            public_key: identitaet.public_key_bytes().to_vec(),
            challenge: challenge_erzeugen().to_vec(),
            supported_versions: vec![ProtocolVersion::V1_0_0],
        };
        conn.mit_gespraech(|g| {
            g.starten(&node, &anfrage)?;
            g.authentifizieren(AuthStatus::CheckedIn)
        })
        .unwrap();
        (conn, gegenstelle)
    }

    pub fn test_state() -> Arc<NodeState> {
        NodeState::neu(
            NodeConfig::default(),
            Identity::generate(),
            Arc::new(InMemoryProfileStore::new()),
        )
    }
}
