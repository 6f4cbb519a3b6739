//! Relay-Handler – CallIdentityApplicationService, ApplicationServiceSendMessage
//!
//! Beide Antworten entstehen in eigenen Tasks: die Lese-Schleife des
//! Absenders muss weiterlaufen, um Bestaetigungen fuer Pushes in die
//! Gegenrichtung anzunehmen.

use std::sync::Arc;

use homenet_core::IdentityId;
use homenet_protocol::message::{
    ApplicationServiceSendMessageRequest, CallIdentityApplicationServiceRequest,
    CallIdentityApplicationServiceResponse, ResponsePayload,
};
use homenet_protocol::Message;

use crate::connection::Connection;
use crate::conversation::{AuthStatus, ConversationState};
use crate::dispatcher::{fehler_loggen, Antwort};
use crate::error::{NodeError, NodeResult};
use crate::state::NodeState;
use crate::validation;

/// Startet einen Anruf; geantwortet wird nach der Bestaetigung des Angerufenen
pub fn handle_call(
    request: CallIdentityApplicationServiceRequest,
    request_id: u32,
    conn: &Arc<Connection>,
    state: &Arc<NodeState>,
) -> Antwort {
    let vorbereitet = anrufer_pruefen(conn).and_then(|anrufer| {
        let ziel = IdentityId::from_slice(&request.identity_id)
            .map_err(|_| NodeError::validierung("identityId"))?;
        validation::dienstname_pruefen(&request.service_name)?;
        Ok((anrufer, ziel))
    });
    let ((anrufer_id, anrufer_key), ziel) = match vorbereitet {
        Ok(v) => v,
        Err(e) => {
            fehler_loggen(conn, &e);
            return Antwort::fehler(request_id, &e);
        }
    };

    let conn = Arc::clone(conn);
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let ergebnis = state
            .relay
            .anruf_anbieten(
                state.profile.as_ref(),
                &state.registry,
                &anrufer_key,
                anrufer_id,
                ziel,
                &request.service_name,
            )
            .await;
        let antwort = match ergebnis {
            Ok(token) => Message::ok(
                request_id,
                ResponsePayload::CallIdentityApplicationService(
                    CallIdentityApplicationServiceResponse {
                        caller_token: token.as_bytes().to_vec(),
                    },
                ),
            ),
            Err(e) => {
                fehler_loggen(&conn, &e);
                e.als_antwort(request_id)
            }
        };
        if let Err(e) = conn.senden(&antwort).await {
            tracing::debug!(verbindung = %conn.id(), fehler = %e, "Anruf-Antwort nicht zustellbar");
        }
    });
    Antwort::Spaeter
}

/// Identitaet und Schluessel eines verifizierten oder eingecheckten Anrufers
fn anrufer_pruefen(conn: &Connection) -> NodeResult<(IdentityId, Vec<u8>)> {
    conn.mit_gespraech(|g| {
        let berechtigt = matches!(
            g.zustand(),
            ConversationState::Authenticated(AuthStatus::Verified | AuthStatus::CheckedIn)
        );
        match (berechtigt, g.identity_id(), g.client_public_key()) {
            (true, Some(id), Some(key)) => Ok((id, key.to_vec())),
            _ => Err(NodeError::Autorisierung("Identitaet nicht verifiziert".into())),
        }
    })
}

/// Bindet das Token und leitet die Nachricht an das andere Leg weiter
pub fn handle_send_message(
    request: ApplicationServiceSendMessageRequest,
    request_id: u32,
    conn: &Arc<Connection>,
    state: &Arc<NodeState>,
) -> Antwort {
    let leg = match state.relay.leg_binden(conn, &request.token) {
        Ok(leg) => leg,
        Err(e) => {
            fehler_loggen(conn, &e);
            return Antwort::fehler(request_id, &e);
        }
    };

    // Leere Nachrichten binden nur das Leg
    if request.message.is_empty() {
        return Antwort::Sofort(Message::ok(request_id, ResponsePayload::Empty));
    }

    let sendeplatz = match state.relay.sendeplatz_reservieren(&leg) {
        Ok(platz) => platz,
        Err(e) => {
            fehler_loggen(conn, &e);
            return Antwort::fehler(request_id, &e);
        }
    };

    let conn = Arc::clone(conn);
    let relay = state.relay.clone();
    tokio::spawn(async move {
        let antwort = match relay.weiterleiten(leg, sendeplatz, request.message).await {
            Ok(()) => Message::ok(request_id, ResponsePayload::Empty),
            Err(e) => {
                fehler_loggen(&conn, &e);
                e.als_antwort(request_id)
            }
        };
        if let Err(e) = conn.senden(&antwort).await {
            tracing::debug!(verbindung = %conn.id(), fehler = %e, "Relay-Antwort nicht zustellbar");
        }
    });
    Antwort::Spaeter
}
