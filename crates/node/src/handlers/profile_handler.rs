//! Profil-Handler – UpdateProfile, GetIdentityInformation, Application Services

use std::sync::Arc;

use homenet_core::IdentityId;
use homenet_protocol::message::{
    ApplicationServiceAddRequest, ApplicationServiceRemoveRequest, GetIdentityInformationRequest,
    GetIdentityInformationResponse, ResponsePayload, UpdateProfileRequest,
};
use homenet_protocol::Message;

use crate::connection::Connection;
use crate::error::{NodeError, NodeResult};
use crate::state::NodeState;
use crate::validation;

/// Aktualisiert das Profil der eingecheckten Identitaet
pub async fn handle_update_profile(
    request: UpdateProfileRequest,
    request_id: u32,
    conn: &Connection,
    state: &Arc<NodeState>,
) -> NodeResult<Message> {
    let identitaet = conn
        .mit_gespraech(|g| g.eingecheckte_identitaet())
        .ok_or_else(|| NodeError::Autorisierung("Profil-Update ohne Check-In".into()))?;

    let record = state
        .profile
        .get(&identitaet)
        .await?
        .ok_or_else(|| NodeError::NichtGefunden(format!("Identitaet {}", identitaet)))?;

    let update =
        validation::profil_update_pruefen(&request, record.ist_initialisiert(), &state.config.profil)?;
    state.profile.update(&identitaet, update).await?;

    tracing::debug!(verbindung = %conn.id(), identitaet = %identitaet, "Profil aktualisiert");
    Ok(Message::ok(request_id, ResponsePayload::Empty))
}

/// Oeffentliche Profildaten einer gehosteten Identitaet
pub async fn handle_get_identity_information(
    request: GetIdentityInformationRequest,
    request_id: u32,
    state: &Arc<NodeState>,
) -> NodeResult<Message> {
    let identitaet = IdentityId::from_slice(&request.identity_id)
        .map_err(|_| NodeError::validierung("identityId"))?;

    let record = state
        .profile
        .get(&identitaet)
        .await?
        .ok_or_else(|| NodeError::NichtGefunden(format!("Identitaet {}", identitaet)))?;
    if !record.ist_initialisiert() {
        return Err(NodeError::NichtInitialisiert(format!("Identitaet {}", identitaet)));
    }

    let online = state.registry.nach_identitaet(&identitaet);
    let application_services = match (&online, request.include_application_services) {
        (Some(conn), true) => conn.mit_gespraech(|g| g.dienste()),
        _ => Vec::new(),
    };

    let antwort = GetIdentityInformationResponse {
        is_hosted: true,
        is_online: online.is_some(),
        public_key: record.public_key.to_vec(),
        name: record.name,
        location: record.location,
        extra_data: record.extra_data,
        profile_image: record
            .profile_image
            .filter(|_| request.include_profile_image),
        thumbnail_image: record
            .thumbnail_image
            .filter(|_| request.include_thumbnail_image),
        application_services,
    };
    Ok(Message::ok(
        request_id,
        ResponsePayload::GetIdentityInformation(antwort),
    ))
}

pub fn handle_application_service_add(
    request: ApplicationServiceAddRequest,
    request_id: u32,
    conn: &Connection,
) -> NodeResult<Message> {
    conn.mit_gespraech(|g| g.dienste_hinzufuegen(&request.service_names))?;
    tracing::debug!(verbindung = %conn.id(), dienste = ?request.service_names, "Dienste angeboten");
    Ok(Message::ok(request_id, ResponsePayload::Empty))
}

pub fn handle_application_service_remove(
    request: ApplicationServiceRemoveRequest,
    request_id: u32,
    conn: &Connection,
) -> NodeResult<Message> {
    conn.mit_gespraech(|g| g.dienst_entfernen(&request.service_name))?;
    Ok(Message::ok(request_id, ResponsePayload::Empty))
}
