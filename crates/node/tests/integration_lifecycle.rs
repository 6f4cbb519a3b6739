//! Integration-Tests fuer Start, TLS, Liveness und Herunterfahren

mod common;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use common::{adresse, node_starten, test_config, test_node, TestClient};
use homenet_core::{InMemoryProfileStore, ServerRole};
use homenet_crypto::{Identity, SelbstsigniertesZertifikat};
use homenet_node::{NodeError, NodeState, RoleServerConfig, RoleServerManager};
use homenet_protocol::message::{PingRequest, RequestPayload};
use homenet_protocol::Status;
use tokio::net::TcpListener;

#[tokio::test]
async fn belegter_port_bricht_start_ab() {
    let belegt = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let belegter_port = belegt.local_addr().unwrap().port();
    let frei = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let freier_port = frei.local_addr().unwrap().port();
    drop(frei);

    let mut config = test_config();
    config.rollen_server = vec![
        RoleServerConfig {
            port: freier_port,
            rollen: vec![ServerRole::Primary],
            tls: false,
        },
        RoleServerConfig {
            port: belegter_port,
            rollen: vec![ServerRole::ClCustomer],
            tls: false,
        },
    ];
    let state = NodeState::neu(config, Identity::generate(), Arc::new(InMemoryProfileStore::new()));
    let result = RoleServerManager::starten(state, &SelbstsigniertesZertifikat::new("test")).await;
    match result {
        Err(NodeError::Bind { port, .. }) => assert_eq!(port, belegter_port),
        Err(e) => panic!("Bind-Fehler erwartet: {}", e),
        Ok(_) => panic!("Start haette fehlschlagen muessen"),
    }

    // Der zuerst gebundene Port ist wieder frei
    let wieder = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), freier_port)).await;
    assert!(wieder.is_ok());
}

#[tokio::test]
async fn tls_listener() {
    let mut config = test_config();
    config.rollen_server = vec![
        RoleServerConfig {
            port: 0,
            rollen: vec![ServerRole::Primary],
            tls: false,
        },
        RoleServerConfig {
            port: 0,
            rollen: vec![ServerRole::ClAppService],
            tls: true,
        },
    ];
    let node = node_starten(config).await;

    let mut client = TestClient::verbinden_tls(adresse(&node, ServerRole::ClAppService)).await;
    let antwort = client
        .anfrage(RequestPayload::Ping(PingRequest {
            payload: vec![1, 2, 3],
        }))
        .await;
    assert_eq!(antwort.status, Status::Ok);

    let tls_eintraege: Vec<_> = node
        .state()
        .rollen_eintraege()
        .into_iter()
        .filter(|e| e.is_tls)
        .collect();
    assert_eq!(tls_eintraege.len(), 1);
    assert_eq!(tls_eintraege[0].role, ServerRole::ClAppService);

    node.herunterfahren().await;
}

#[tokio::test]
async fn inaktive_verbindung_wird_geschlossen() {
    let mut config = test_config();
    config.keepalive = Duration::from_millis(300);
    config.liveness_intervall = Duration::from_millis(100);
    let node = node_starten(config).await;

    let mut client = TestClient::verbinden(adresse(&node, ServerRole::Primary)).await;
    assert!(client.wird_geschlossen().await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(node.registry().anzahl(), 0);

    node.herunterfahren().await;
}

#[tokio::test]
async fn herunterfahren_schliesst_alle_verbindungen() {
    let node = test_node().await;
    let primary = adresse(&node, ServerRole::Primary);

    let mut a = TestClient::verbinden(primary).await;
    let mut b = TestClient::verbinden(adresse(&node, ServerRole::ClAppService)).await;
    assert_eq!(a.anfrage(RequestPayload::ListRoles).await.status, Status::Ok);

    assert!(node.herunterfahren().await);
    assert!(a.wird_geschlossen().await);
    assert!(b.wird_geschlossen().await);

    // Listener sind freigegeben
    assert!(tokio::net::TcpStream::connect(primary).await.is_err());
}
