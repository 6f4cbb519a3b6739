//! Nachrichtenmodell des HomeNet-Protokolls
//!
//! Jede Nachricht traegt eine 32-Bit-ID zur Request/Response-Zuordnung und
//! entweder einen Request oder eine Response. Vom Node selbst ausgeloeste
//! Requests (Anruf- und Relay-Benachrichtigungen) verwenden eine eigene
//! ID-Sequenz; der Client beantwortet sie mit derselben ID.

use homenet_core::{ProtocolVersion, ServerRole};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Ergebnis-Status einer Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    ErrorInvalidValue,
    ErrorInvalidSignature,
    ErrorUnauthorized,
    ErrorNotFound,
    ErrorUninitialized,
    ErrorInternal,
    /// Keine gemeinsame Protokollversion
    ErrorUnsupported,
    /// Request auf dieser Rolle nicht erlaubt
    ErrorBadRole,
    /// Identitaet wird bereits gehostet
    ErrorAlreadyExists,
    /// Zustandsfehler (Token bereits gebunden, Nachricht noch unterwegs, Anruf abgelehnt)
    ErrorRejected,
    /// Gegenueber hat nicht rechtzeitig bestaetigt
    ErrorNotAvailable,
}

impl Status {
    pub fn ist_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

// ---------------------------------------------------------------------------
// Request-Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(with = "crate::b64")]
    pub payload: Vec<u8>,
}

/// Beginn des Handshakes: Client-Schluessel, Client-Challenge, Versionen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConversationRequest {
    #[serde(with = "crate::b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::b64")]
    pub challenge: Vec<u8>,
    pub supported_versions: Vec<ProtocolVersion>,
}

/// Nachweis des Schluesselbesitzes; die Signatur ueber `challenge` liegt in
/// [`Request::signature`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeProof {
    #[serde(with = "crate::b64")]
    pub challenge: Vec<u8>,
}

/// Profil-Update: jedes Feld optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ProtocolVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::b64::option"
    )]
    pub image: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
}

impl UpdateProfileRequest {
    /// Setzt der Request ueberhaupt ein Feld?
    pub fn ist_leer(&self) -> bool {
        self.version.is_none()
            && self.name.is_none()
            && self.image.is_none()
            && self.location.is_none()
            && self.extra_data.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetIdentityInformationRequest {
    #[serde(with = "crate::b64")]
    pub identity_id: Vec<u8>,
    #[serde(default)]
    pub include_profile_image: bool,
    #[serde(default)]
    pub include_thumbnail_image: bool,
    #[serde(default)]
    pub include_application_services: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationServiceAddRequest {
    pub service_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationServiceRemoveRequest {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallIdentityApplicationServiceRequest {
    #[serde(with = "crate::b64")]
    pub identity_id: Vec<u8>,
    pub service_name: String,
}

/// Vom Node an den Angerufenen gepusht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallNotificationRequest {
    #[serde(with = "crate::b64")]
    pub caller_public_key: Vec<u8>,
    pub service_name: String,
    #[serde(with = "crate::b64")]
    pub callee_token: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationServiceSendMessageRequest {
    #[serde(with = "crate::b64")]
    pub token: Vec<u8>,
    #[serde(with = "crate::b64")]
    pub message: Vec<u8>,
}

/// Vom Node an das jeweils andere Leg gepusht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationServiceReceiveMessageNotificationRequest {
    #[serde(with = "crate::b64")]
    pub message: Vec<u8>,
}

/// Alle Request-Arten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    Ping(PingRequest),
    ListRoles,
    StartConversation(StartConversationRequest),
    HomeNodeRequest,
    CheckIn(ChallengeProof),
    VerifyIdentity(ChallengeProof),
    UpdateProfile(UpdateProfileRequest),
    GetIdentityInformation(GetIdentityInformationRequest),
    ApplicationServiceAdd(ApplicationServiceAddRequest),
    ApplicationServiceRemove(ApplicationServiceRemoveRequest),
    CallIdentityApplicationService(CallIdentityApplicationServiceRequest),
    IncomingCallNotification(IncomingCallNotificationRequest),
    ApplicationServiceSendMessage(ApplicationServiceSendMessageRequest),
    ApplicationServiceReceiveMessageNotification(
        ApplicationServiceReceiveMessageNotificationRequest,
    ),
}

impl RequestPayload {
    /// Kurzname fuer Logs
    pub fn name(&self) -> &'static str {
        match self {
            RequestPayload::Ping(_) => "ping",
            RequestPayload::ListRoles => "list_roles",
            RequestPayload::StartConversation(_) => "start_conversation",
            RequestPayload::HomeNodeRequest => "home_node_request",
            RequestPayload::CheckIn(_) => "check_in",
            RequestPayload::VerifyIdentity(_) => "verify_identity",
            RequestPayload::UpdateProfile(_) => "update_profile",
            RequestPayload::GetIdentityInformation(_) => "get_identity_information",
            RequestPayload::ApplicationServiceAdd(_) => "application_service_add",
            RequestPayload::ApplicationServiceRemove(_) => "application_service_remove",
            RequestPayload::CallIdentityApplicationService(_) => {
                "call_identity_application_service"
            }
            RequestPayload::IncomingCallNotification(_) => "incoming_call_notification",
            RequestPayload::ApplicationServiceSendMessage(_) => "application_service_send_message",
            RequestPayload::ApplicationServiceReceiveMessageNotification(_) => {
                "application_service_receive_message_notification"
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response-Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(with = "crate::b64")]
    pub payload: Vec<u8>,
    /// Uhrzeit des Nodes (Unix-Millisekunden)
    pub clock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub role: ServerRole,
    pub port: u16,
    pub is_tcp: bool,
    pub is_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRolesResponse {
    pub roles: Vec<RoleEntry>,
}

/// Antwort des Nodes auf den Handshake; die Signatur ueber die
/// Client-Challenge liegt in [`Response::signature`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConversationResponse {
    #[serde(with = "crate::b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::b64")]
    pub challenge: Vec<u8>,
    #[serde(with = "crate::b64")]
    pub client_challenge: Vec<u8>,
    pub version: ProtocolVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetIdentityInformationResponse {
    pub is_hosted: bool,
    pub is_online: bool,
    #[serde(with = "crate::b64")]
    pub public_key: Vec<u8>,
    pub name: String,
    pub location: u32,
    pub extra_data: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::b64::option"
    )]
    pub profile_image: Option<Vec<u8>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::b64::option"
    )]
    pub thumbnail_image: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallIdentityApplicationServiceResponse {
    #[serde(with = "crate::b64")]
    pub caller_token: Vec<u8>,
}

/// Alle Response-Arten; `Empty` fuer Requests ohne Nutzdaten in der Antwort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Empty,
    Ping(PingResponse),
    ListRoles(ListRolesResponse),
    StartConversation(StartConversationResponse),
    GetIdentityInformation(GetIdentityInformationResponse),
    CallIdentityApplicationService(CallIdentityApplicationServiceResponse),
}

// ---------------------------------------------------------------------------
// Request / Response / Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub version: ProtocolVersion,
    pub payload: RequestPayload,
    /// Ed25519-Signatur ueber die Challenge-Bytes (CheckIn, VerifyIdentity)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::b64::option"
    )]
    pub signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub version: ProtocolVersion,
    pub status: Status,
    /// Bei Validierungsfehlern: Name des ungueltigen Feldes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub payload: ResponsePayload,
    /// Ed25519-Signatur des Nodes ueber die Client-Challenge (StartConversation)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::b64::option"
    )]
    pub signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageBody {
    Request(Request),
    Response(Response),
}

/// Eine Protokollnachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Korrelations-ID, von der Response unveraendert uebernommen
    pub id: u32,
    pub body: MessageBody,
}

impl Message {
    /// Erstellt einen Request in der aktuellen Protokollversion
    pub fn request(id: u32, payload: RequestPayload) -> Self {
        Self {
            id,
            body: MessageBody::Request(Request {
                version: ProtocolVersion::V1_0_0,
                payload,
                signature: None,
            }),
        }
    }

    /// Erstellt einen signierten Request
    pub fn signed_request(id: u32, payload: RequestPayload, signature: Vec<u8>) -> Self {
        let mut msg = Self::request(id, payload);
        if let MessageBody::Request(req) = &mut msg.body {
            req.signature = Some(signature);
        }
        msg
    }

    pub fn response(id: u32, status: Status, payload: ResponsePayload) -> Self {
        Self {
            id,
            body: MessageBody::Response(Response {
                version: ProtocolVersion::V1_0_0,
                status,
                details: None,
                payload,
                signature: None,
            }),
        }
    }

    /// Erfolgreiche Antwort
    pub fn ok(id: u32, payload: ResponsePayload) -> Self {
        Self::response(id, Status::Ok, payload)
    }

    /// Fehler-Antwort mit optionalen Details
    pub fn error(id: u32, status: Status, details: Option<String>) -> Self {
        let mut msg = Self::response(id, status, ResponsePayload::Empty);
        if let MessageBody::Response(resp) = &mut msg.body {
            resp.details = details;
        }
        msg
    }

    /// Setzt die Signatur einer Response (Handshake)
    pub fn mit_signatur(mut self, signature: Vec<u8>) -> Self {
        match &mut self.body {
            MessageBody::Request(req) => req.signature = Some(signature),
            MessageBody::Response(resp) => resp.signature = Some(signature),
        }
        self
    }

    pub fn as_request(&self) -> Option<&Request> {
        match &self.body {
            MessageBody::Request(req) => Some(req),
            MessageBody::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match &self.body {
            MessageBody::Response(resp) => Some(resp),
            MessageBody::Request(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self.body {
            MessageBody::Response(resp) => Some(resp),
            MessageBody::Request(_) => None,
        }
    }

    /// Serialisiert die Nachricht als JSON-Body
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialisiert eine Nachricht aus einem JSON-Body
    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_antwort_traegt_details() {
        let msg = Message::error(7, Status::ErrorInvalidValue, Some("name".into()));
        let resp = msg.as_response().unwrap();
        assert_eq!(msg.id, 7);
        assert_eq!(resp.status, Status::ErrorInvalidValue);
        assert_eq!(resp.details.as_deref(), Some("name"));
        assert_eq!(resp.payload, ResponsePayload::Empty);
    }

    #[test]
    fn status_json_format() {
        let json = serde_json::to_string(&Status::ErrorUninitialized).unwrap();
        assert_eq!(json, "\"ERROR_UNINITIALIZED\"");
    }

    #[test]
    fn bytes_werden_base64_kodiert() {
        let msg = Message::request(
            1,
            RequestPayload::ApplicationServiceSendMessage(ApplicationServiceSendMessageRequest {
                token: vec![0xFF; 4],
                message: b"hallo".to_vec(),
            }),
        );
        let json = String::from_utf8(msg.to_json().unwrap()).unwrap();
        assert!(json.contains("\"token\":\"/////w==\""));
        assert!(json.contains("\"type\":\"application_service_send_message\""));

        let zurueck = Message::from_json(json.as_bytes()).unwrap();
        assert_eq!(zurueck, msg);
    }

    #[test]
    fn update_profile_ohne_felder_ist_leer() {
        let json = r#"{"id":3,"body":{"request":{"version":[1,0,0],"payload":{"type":"update_profile"}}}}"#;
        let msg = Message::from_json(json.as_bytes()).unwrap();
        match &msg.as_request().unwrap().payload {
            RequestPayload::UpdateProfile(req) => assert!(req.ist_leer()),
            andere => panic!("Unerwarteter Payload: {:?}", andere),
        }
    }

    #[test]
    fn signatur_wird_an_response_gehaengt() {
        let msg = Message::ok(1, ResponsePayload::Empty).mit_signatur(vec![1, 2, 3]);
        assert_eq!(msg.as_response().unwrap().signature, Some(vec![1, 2, 3]));
        assert!(msg.as_request().is_none());
    }

    #[test]
    fn unbekannter_typ_ist_parse_fehler() {
        let json = r#"{"id":3,"body":{"request":{"version":[1,0,0],"payload":{"type":"login"}}}}"#;
        assert!(Message::from_json(json.as_bytes()).is_err());
    }
}
