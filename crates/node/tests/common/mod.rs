//! Gemeinsame Helfer fuer die Integration-Tests: Node auf freien Ports
//! starten und mit einem Protokoll-Client ansprechen

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use homenet_core::{InMemoryProfileStore, ProtocolVersion, ServerRole};
use homenet_crypto::{challenge_erzeugen, unsicherer_connector, Identity, SelbstsigniertesZertifikat};
use homenet_node::{NodeConfig, NodeState, RoleServerConfig, RoleServerManager};
use homenet_protocol::message::{
    ApplicationServiceAddRequest, ChallengeProof, RequestPayload, ResponsePayload,
    StartConversationRequest, StartConversationResponse, UpdateProfileRequest,
};
use homenet_protocol::{FrameCodec, Message, MessageBody, Request, Response, Status};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const LESE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drei Listener wie im Produktivbetrieb, aber ohne TLS und auf freien Ports
pub fn test_config() -> NodeConfig {
    NodeConfig {
        bind_adresse: IpAddr::V4(Ipv4Addr::LOCALHOST),
        rollen_server: vec![
            RoleServerConfig {
                port: 0,
                rollen: vec![ServerRole::Primary, ServerRole::NdNeighbor, ServerRole::NdColleague],
                tls: false,
            },
            RoleServerConfig {
                port: 0,
                rollen: vec![ServerRole::ClNonCustomer, ServerRole::ClCustomer],
                tls: false,
            },
            RoleServerConfig {
                port: 0,
                rollen: vec![ServerRole::ClAppService],
                tls: false,
            },
        ],
        benachrichtigung_ack_timeout: Duration::from_secs(2),
        token_bindung_timeout: Duration::from_secs(5),
        ..NodeConfig::default()
    }
}

pub async fn node_starten(config: NodeConfig) -> RoleServerManager {
    let state = NodeState::neu(config, Identity::generate(), Arc::new(InMemoryProfileStore::new()));
    RoleServerManager::starten(state, &SelbstsigniertesZertifikat::new("homenet-test"))
        .await
        .expect("Node konnte nicht gestartet werden")
}

pub async fn test_node() -> RoleServerManager {
    node_starten(test_config()).await
}

pub fn adresse(node: &RoleServerManager, rolle: ServerRole) -> SocketAddr {
    let port = node.port_fuer(rolle).expect("Rolle nicht gebunden");
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

pub trait Strom: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Strom for T {}

/// Protokoll-Client mit eigener Identitaet
pub struct TestClient {
    framed: Framed<Box<dyn Strom>, FrameCodec>,
    pub identitaet: Identity,
    naechste_id: u32,
    node_challenge: Vec<u8>,
}

impl TestClient {
    pub async fn verbinden(adresse: SocketAddr) -> Self {
        Self::verbinden_als(adresse, Identity::generate()).await
    }

    pub async fn verbinden_als(adresse: SocketAddr, identitaet: Identity) -> Self {
        let stream = TcpStream::connect(adresse).await.expect("TCP-Verbindung fehlgeschlagen");
        Self::mit_strom(Box::new(stream), identitaet)
    }

    /// TLS ohne Zertifikatspruefung
    pub async fn verbinden_tls(adresse: SocketAddr) -> Self {
        let stream = TcpStream::connect(adresse).await.expect("TCP-Verbindung fehlgeschlagen");
        let connector = unsicherer_connector().unwrap();
        let name = tokio_rustls::rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let tls = connector.connect(name, stream).await.expect("TLS-Handshake fehlgeschlagen");
        Self::mit_strom(Box::new(tls), Identity::generate())
    }

    fn mit_strom(strom: Box<dyn Strom>, identitaet: Identity) -> Self {
        Self {
            framed: Framed::new(strom, FrameCodec::new()),
            identitaet,
            naechste_id: 1,
            node_challenge: Vec::new(),
        }
    }

    pub async fn senden(&mut self, nachricht: Message) {
        self.framed.send(nachricht).await.expect("Senden fehlgeschlagen");
    }

    pub async fn empfangen(&mut self) -> Message {
        tokio::time::timeout(LESE_TIMEOUT, self.framed.next())
            .await
            .expect("Keine Nachricht innerhalb des Timeouts")
            .expect("Verbindung geschlossen")
            .expect("Ungueltiger Frame")
    }

    /// Naechster vom Node gepushter Request
    pub async fn push_empfangen(&mut self) -> (u32, Request) {
        let nachricht = self.empfangen().await;
        match nachricht.body {
            MessageBody::Request(anfrage) => (nachricht.id, anfrage),
            andere => panic!("Push erwartet, erhalten: {:?}", andere),
        }
    }

    pub async fn bestaetigen(&mut self, id: u32, status: Status) {
        let antwort = if status.ist_ok() {
            Message::ok(id, ResponsePayload::Empty)
        } else {
            Message::error(id, status, None)
        };
        self.senden(antwort).await;
    }

    pub fn naechste_id(&mut self) -> u32 {
        let id = self.naechste_id;
        self.naechste_id += 1;
        id
    }

    /// Sendet einen Request und wartet auf die zugehoerige Response
    pub async fn anfrage(&mut self, payload: RequestPayload) -> Response {
        let id = self.naechste_id();
        self.senden(Message::request(id, payload)).await;
        self.antwort_fuer(id).await
    }

    pub async fn antwort_fuer(&mut self, id: u32) -> Response {
        let nachricht = self.empfangen().await;
        assert_eq!(nachricht.id, id, "Antwort mit falscher ID");
        nachricht.into_response().expect("Response erwartet")
    }

    /// true, wenn der Node die Verbindung schliesst
    pub async fn wird_geschlossen(&mut self) -> bool {
        loop {
            match tokio::time::timeout(LESE_TIMEOUT, self.framed.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) => return true,
                // Ausstehende Nachrichten ueberspringen
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Handshake und Authentifizierung
    // -----------------------------------------------------------------------

    pub async fn start_conversation(&mut self) -> (Response, Vec<u8>) {
        let client_challenge = challenge_erzeugen().to_vec();
        let antwort = self
            .anfrage(RequestPayload::StartConversation(StartConversationRequest {
                public_key: self.identitaet.public_key_bytes().to_vec(),
                challenge: client_challenge.clone(),
                supported_versions: vec![ProtocolVersion::V1_0_0],
            }))
            .await;
        if let ResponsePayload::StartConversation(StartConversationResponse { challenge, .. }) =
            &antwort.payload
        {
            self.node_challenge = challenge.clone();
        }
        (antwort, client_challenge)
    }

    pub async fn handshake(&mut self) {
        let (antwort, _) = self.start_conversation().await;
        assert_eq!(antwort.status, Status::Ok, "Handshake fehlgeschlagen");
    }

    fn nachweis(&self) -> (RequestPayload, Vec<u8>) {
        let signatur = self.identitaet.sign(&self.node_challenge);
        (
            RequestPayload::CheckIn(ChallengeProof {
                challenge: self.node_challenge.clone(),
            }),
            signatur,
        )
    }

    pub async fn check_in(&mut self) -> Response {
        let (payload, signatur) = self.nachweis();
        let id = self.naechste_id();
        self.senden(Message::signed_request(id, payload, signatur)).await;
        self.antwort_fuer(id).await
    }

    pub async fn verify_identity(&mut self) -> Response {
        let signatur = self.identitaet.sign(&self.node_challenge);
        let id = self.naechste_id();
        self.senden(Message::signed_request(
            id,
            RequestPayload::VerifyIdentity(ChallengeProof {
                challenge: self.node_challenge.clone(),
            }),
            signatur,
        ))
        .await;
        self.antwort_fuer(id).await
    }

    pub async fn home_node_request(&mut self) -> Response {
        self.anfrage(RequestPayload::HomeNodeRequest).await
    }

    pub async fn profil_aktualisieren(&mut self, update: UpdateProfileRequest) -> Response {
        self.anfrage(RequestPayload::UpdateProfile(update)).await
    }

    pub async fn dienst_anbieten(&mut self, name: &str) -> Response {
        self.anfrage(RequestPayload::ApplicationServiceAdd(ApplicationServiceAddRequest {
            service_names: vec![name.to_string()],
        }))
        .await
    }
}

/// Minimales gueltiges Profil
pub fn initiales_profil(name: &str) -> UpdateProfileRequest {
    UpdateProfileRequest {
        version: Some(ProtocolVersion::V1_0_0),
        name: Some(name.to_string()),
        location: Some(0x1234_5678),
        ..Default::default()
    }
}

/// Laesst die Identitaet hosten, ohne das Profil zu initialisieren
pub async fn hosten(node: &RoleServerManager, identitaet: &Identity) {
    let mut client = TestClient::verbinden_als(
        adresse(node, ServerRole::ClNonCustomer),
        identitaet.clone(),
    )
    .await;
    client.handshake().await;
    let antwort = client.home_node_request().await;
    assert_eq!(antwort.status, Status::Ok, "HomeNodeRequest fehlgeschlagen");
}

/// Eingecheckter Kunde auf dem Kunden-Port
pub async fn eingecheckter_kunde(node: &RoleServerManager, identitaet: &Identity) -> TestClient {
    let mut client =
        TestClient::verbinden_als(adresse(node, ServerRole::ClCustomer), identitaet.clone()).await;
    client.handshake().await;
    let antwort = client.check_in().await;
    assert_eq!(antwort.status, Status::Ok, "CheckIn fehlgeschlagen");
    client
}

/// Gehostet, initialisiert und eingecheckt
pub async fn kunde_anlegen(node: &RoleServerManager, name: &str) -> TestClient {
    let identitaet = Identity::generate();
    hosten(node, &identitaet).await;
    let mut kunde = eingecheckter_kunde(node, &identitaet).await;
    let antwort = kunde.profil_aktualisieren(initiales_profil(name)).await;
    assert_eq!(antwort.status, Status::Ok, "Profil-Initialisierung fehlgeschlagen");
    kunde
}
