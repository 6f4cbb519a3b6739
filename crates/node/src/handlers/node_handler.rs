//! Node-Handler – Ping, ListRoles

use std::sync::Arc;

use chrono::Utc;
use homenet_protocol::message::{ListRolesResponse, PingRequest, PingResponse, ResponsePayload};
use homenet_protocol::Message;

use crate::state::NodeState;

/// Echo des Payloads plus Uhrzeit des Nodes
pub fn handle_ping(request: PingRequest, request_id: u32) -> Message {
    Message::ok(
        request_id,
        ResponsePayload::Ping(PingResponse {
            payload: request.payload,
            clock: Utc::now().timestamp_millis(),
        }),
    )
}

/// Live-Zuordnung Rolle -> Port
pub fn handle_list_roles(request_id: u32, state: &Arc<NodeState>) -> Message {
    Message::ok(
        request_id,
        ResponsePayload::ListRoles(ListRolesResponse {
            roles: state.rollen_eintraege(),
        }),
    )
}
