//! Message-Dispatcher – Routet Requests an die richtigen Handler
//!
//! Der Dispatcher empfaengt Nachrichten einer Verbindung, prueft ob der
//! Request auf den Rollen dieses Ports erlaubt ist, und leitet ihn an den
//! Handler weiter. Responses des Clients sind Bestaetigungen fuer
//! Node-Pushes und werden dem wartenden Push zugestellt.
//!
//! ## Rollenpruefung
//! Ein Request, der auf keiner Rolle der Verbindung erlaubt ist, wird mit
//! `ErrorBadRole` beantwortet; danach wird die Verbindung geschlossen.

use std::sync::Arc;

use homenet_core::ServerRole;
use homenet_protocol::message::RequestPayload;
use homenet_protocol::{Message, MessageBody};

use crate::connection::Connection;
use crate::error::{NodeError, NodeResult};
use crate::handlers::{conversation_handler, node_handler, profile_handler, relay_handler};
use crate::state::NodeState;

/// Was die Lese-Schleife nach dem Dispatch tun soll
#[derive(Debug)]
pub enum Antwort {
    /// Antwort senden, Verbindung bleibt offen
    Sofort(Message),
    /// Antwort senden, dann Verbindung schliessen
    Schliessen(Message),
    /// Ein gestarteter Task antwortet selbst
    Spaeter,
    /// Keine Antwort (Bestaetigung eines Node-Pushes)
    Keine,
}

impl Antwort {
    /// Fehler-Antwort, schliesst die Verbindung falls die Kategorie es verlangt
    pub fn fehler(id: u32, fehler: &NodeError) -> Self {
        if fehler.schliesst_verbindung() {
            Antwort::Schliessen(fehler.als_antwort(id))
        } else {
            Antwort::Sofort(fehler.als_antwort(id))
        }
    }
}

const KLIENT_ROLLEN: &[ServerRole] = &[ServerRole::ClNonCustomer, ServerRole::ClCustomer];

/// Rollen, auf denen ein Request erlaubt ist
pub fn erlaubte_rollen(payload: &RequestPayload) -> &'static [ServerRole] {
    match payload {
        RequestPayload::Ping(_) => &ServerRole::ALLE,
        RequestPayload::ListRoles => &[ServerRole::Primary],
        RequestPayload::StartConversation(_) => &[
            ServerRole::ClNonCustomer,
            ServerRole::ClCustomer,
            ServerRole::NdNeighbor,
            ServerRole::NdColleague,
        ],
        RequestPayload::HomeNodeRequest => &[ServerRole::ClNonCustomer],
        RequestPayload::CheckIn(_)
        | RequestPayload::UpdateProfile(_)
        | RequestPayload::ApplicationServiceAdd(_)
        | RequestPayload::ApplicationServiceRemove(_) => &[ServerRole::ClCustomer],
        RequestPayload::VerifyIdentity(_)
        | RequestPayload::GetIdentityInformation(_)
        | RequestPayload::CallIdentityApplicationService(_) => KLIENT_ROLLEN,
        RequestPayload::ApplicationServiceSendMessage(_) => &[ServerRole::ClAppService],
        // Nur der Node selbst sendet diese
        RequestPayload::IncomingCallNotification(_)
        | RequestPayload::ApplicationServiceReceiveMessageNotification(_) => &[],
    }
}

fn rolle_pruefen(conn: &Connection, payload: &RequestPayload) -> NodeResult<()> {
    if erlaubte_rollen(payload).iter().any(|r| conn.hat_rolle(*r)) {
        Ok(())
    } else {
        Err(NodeError::FalscheRolle(format!(
            "{} auf {:?} nicht erlaubt",
            payload.name(),
            conn.rollen()
        )))
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<NodeState>,
}

impl MessageDispatcher {
    pub fn neu(state: Arc<NodeState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende Nachricht
    pub async fn dispatch(&self, conn: &Arc<Connection>, nachricht: Message) -> Antwort {
        let id = nachricht.id;
        let anfrage = match nachricht.body {
            MessageBody::Response(antwort) => {
                if !conn.antwort_zustellen(id, antwort) {
                    tracing::debug!(verbindung = %conn.id(), id, "Antwort ohne wartenden Push verworfen");
                }
                return Antwort::Keine;
            }
            MessageBody::Request(anfrage) => anfrage,
        };

        tracing::debug!(
            verbindung = %conn.id(),
            id,
            art = anfrage.payload.name(),
            "Request empfangen"
        );

        let eingecheckt = conn.mit_gespraech(|g| g.ist_eingecheckt());
        conn.keepalive_erneuern(self.state.keepalive_fuer(eingecheckt));

        if let Err(e) = rolle_pruefen(conn, &anfrage.payload) {
            tracing::warn!(verbindung = %conn.id(), fehler = %e, "Request auf falscher Rolle");
            return Antwort::Schliessen(e.als_antwort(id));
        }

        let state = &self.state;
        let signatur = anfrage.signature;
        let ergebnis = match anfrage.payload {
            RequestPayload::Ping(req) => Ok(node_handler::handle_ping(req, id)),
            RequestPayload::ListRoles => Ok(node_handler::handle_list_roles(id, state)),
            RequestPayload::StartConversation(req) => {
                conversation_handler::handle_start_conversation(req, id, conn, state)
            }
            RequestPayload::HomeNodeRequest => {
                conversation_handler::handle_home_node_request(id, conn, state).await
            }
            RequestPayload::CheckIn(nachweis) => {
                conversation_handler::handle_check_in(nachweis, signatur, id, conn, state).await
            }
            RequestPayload::VerifyIdentity(nachweis) => {
                conversation_handler::handle_verify_identity(nachweis, signatur, id, conn)
            }
            RequestPayload::UpdateProfile(req) => {
                profile_handler::handle_update_profile(req, id, conn, state).await
            }
            RequestPayload::GetIdentityInformation(req) => {
                profile_handler::handle_get_identity_information(req, id, state).await
            }
            RequestPayload::ApplicationServiceAdd(req) => {
                profile_handler::handle_application_service_add(req, id, conn)
            }
            RequestPayload::ApplicationServiceRemove(req) => {
                profile_handler::handle_application_service_remove(req, id, conn)
            }
            RequestPayload::CallIdentityApplicationService(req) => {
                return relay_handler::handle_call(req, id, conn, state);
            }
            RequestPayload::ApplicationServiceSendMessage(req) => {
                return relay_handler::handle_send_message(req, id, conn, state);
            }
            RequestPayload::IncomingCallNotification(_)
            | RequestPayload::ApplicationServiceReceiveMessageNotification(_) => {
                Err(NodeError::FalscheRolle("Node-Benachrichtigung vom Client".into()))
            }
        };

        match ergebnis {
            Ok(antwort) => Antwort::Sofort(antwort),
            Err(e) => {
                fehler_loggen(conn, &e);
                Antwort::fehler(id, &e)
            }
        }
    }
}

/// Interne Fehler als `error`, abgelehnte Client-Operationen als `warn`
pub(crate) fn fehler_loggen(conn: &Connection, fehler: &NodeError) {
    match fehler {
        NodeError::Intern(_) | NodeError::Io(_) | NodeError::Crypto(_) => {
            tracing::error!(verbindung = %conn.id(), fehler = %fehler, "Request fehlgeschlagen");
        }
        _ => {
            tracing::warn!(verbindung = %conn.id(), fehler = %fehler, "Request abgelehnt");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
