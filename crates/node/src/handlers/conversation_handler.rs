//! Conversation-Handler – Handshake, HomeNodeRequest, CheckIn, VerifyIdentity
//!
//! Alle Fortsetzungen nach dem Handshake verwenden die Node-Challenge aus
//! StartConversation. CheckIn und VerifyIdentity verlangen zusaetzlich die
//! Signatur des Clients ueber diese Challenge.

use std::sync::Arc;

use homenet_core::IdentityRecord;
use homenet_crypto::PUBLIC_KEY_LEN;
use homenet_protocol::message::{ChallengeProof, ResponsePayload, StartConversationRequest};
use homenet_protocol::Message;

use crate::connection::Connection;
use crate::conversation::AuthStatus;
use crate::error::{NodeError, NodeResult};
use crate::state::NodeState;

/// Beantwortet den Handshake und signiert die Client-Challenge
pub fn handle_start_conversation(
    request: StartConversationRequest,
    request_id: u32,
    conn: &Connection,
    state: &Arc<NodeState>,
) -> NodeResult<Message> {
    let (antwort, signatur) = conn.mit_gespraech(|g| g.starten(&state.identitaet, &request))?;
    tracing::debug!(
        verbindung = %conn.id(),
        version = ?antwort.version,
        "Handshake gestartet"
    );
    Ok(Message::ok(request_id, ResponsePayload::StartConversation(antwort)).mit_signatur(signatur))
}

/// Registriert diesen Node als Home-Node der Identitaet
pub async fn handle_home_node_request(
    request_id: u32,
    conn: &Connection,
    state: &Arc<NodeState>,
) -> NodeResult<Message> {
    let (identitaet, schluessel) = conn.mit_gespraech(|g| {
        match (g.handshake_gestartet(), g.identity_id(), g.client_public_key()) {
            (true, Some(id), Some(key)) => Ok((id, key.to_vec())),
            _ => Err(NodeError::Autorisierung("Handshake nicht gestartet".into())),
        }
    })?;
    let schluessel: [u8; PUBLIC_KEY_LEN] = schluessel
        .as_slice()
        .try_into()
        .map_err(|_| NodeError::intern("Schluessellaenge nach Handshake ungueltig"))?;

    state
        .profile
        .create(IdentityRecord::neu(identitaet, schluessel))
        .await?;
    conn.mit_gespraech(|g| g.authentifizieren(AuthStatus::HomeEstablished))?;

    tracing::info!(verbindung = %conn.id(), identitaet = %identitaet, "Identitaet wird gehostet");
    Ok(Message::ok(request_id, ResponsePayload::Empty))
}

/// Kunde checkt sich ein; eine aeltere Verbindung derselben Identitaet wird
/// geschlossen
pub async fn handle_check_in(
    nachweis: ChallengeProof,
    signatur: Option<Vec<u8>>,
    request_id: u32,
    conn: &Connection,
    state: &Arc<NodeState>,
) -> NodeResult<Message> {
    let (identitaet, _) =
        conn.mit_gespraech(|g| g.challenge_pruefen(&nachweis.challenge, signatur.as_deref()))?;

    if state.profile.get(&identitaet).await?.is_none() {
        return Err(NodeError::NichtGefunden(format!(
            "Identitaet {} wird nicht gehostet",
            identitaet
        )));
    }

    conn.mit_gespraech(|g| g.authentifizieren(AuthStatus::CheckedIn))?;
    if let Some(alt) = state.registry.identitaet_eintragen(identitaet, conn.id()) {
        tracing::info!(
            verbindung = %alt.id(),
            identitaet = %identitaet,
            "Neuer Check-In – alte Verbindung wird geschlossen"
        );
        alt.schliessen();
    }
    conn.keepalive_erneuern(state.config.keepalive_kunde);

    tracing::info!(verbindung = %conn.id(), identitaet = %identitaet, "Kunde eingecheckt");
    Ok(Message::ok(request_id, ResponsePayload::Empty))
}

/// Nachweis des Schluesselbesitzes ohne Check-In
pub fn handle_verify_identity(
    nachweis: ChallengeProof,
    signatur: Option<Vec<u8>>,
    request_id: u32,
    conn: &Connection,
) -> NodeResult<Message> {
    let identitaet = conn.mit_gespraech(|g| {
        let (id, _) = g.challenge_pruefen(&nachweis.challenge, signatur.as_deref())?;
        g.authentifizieren(AuthStatus::Verified)?;
        Ok::<_, NodeError>(id)
    })?;
    tracing::debug!(verbindung = %conn.id(), identitaet = %identitaet, "Identitaet verifiziert");
    Ok(Message::ok(request_id, ResponsePayload::Empty))
}
