//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Node ohne Konfigurationsdatei
//! lauffaehig ist.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use homenet_core::ServerRole;
use homenet_node::{NodeConfig, RoleServerConfig};
use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Node-Einstellungen
    pub node: NodeEinstellungen,
    /// Listener; mehrere Rollen duerfen sich einen Port teilen
    pub rollen_server: Vec<RollenServerEinstellungen>,
    pub tls: TlsEinstellungen,
    pub zeitlimits: Zeitlimits,
    pub logging: LoggingEinstellungen,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let standard = NodeConfig::default();
        Self {
            node: NodeEinstellungen::default(),
            rollen_server: standard
                .rollen_server
                .into_iter()
                .map(|s| RollenServerEinstellungen {
                    port: s.port,
                    rollen: s.rollen,
                    tls: s.tls,
                })
                .collect(),
            tls: TlsEinstellungen::default(),
            zeitlimits: Zeitlimits::default(),
            logging: LoggingEinstellungen::default(),
        }
    }
}

/// Allgemeine Node-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeEinstellungen {
    /// Bind-Adresse aller Rollen-Listener
    pub bind_adresse: String,
    /// Base64-kodierter privater Ed25519-Schluessel (leer = bei jedem Start neu)
    pub identitaets_schluessel: Option<String>,
    /// Maximale Body-Groesse eines Frames in Bytes
    pub max_nachrichtengroesse: usize,
}

impl Default for NodeEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            identitaets_schluessel: None,
            max_nachrichtengroesse: NodeConfig::default().max_nachrichtengroesse,
        }
    }
}

/// Ein Listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollenServerEinstellungen {
    pub port: u16,
    pub rollen: Vec<ServerRole>,
    #[serde(default)]
    pub tls: bool,
}

/// TLS-Einstellungen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsEinstellungen {
    /// PEM-Zertifikat (leer = selbstsigniertes Zertifikat)
    pub zertifikat_pfad: Option<PathBuf>,
    pub schluessel_pfad: Option<PathBuf>,
}

/// Zeitlimits in Sekunden
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Zeitlimits {
    pub handshake_sekunden: u64,
    pub keepalive_sekunden: u64,
    pub keepalive_kunde_sekunden: u64,
    pub benachrichtigung_ack_sekunden: u64,
    pub token_bindung_sekunden: u64,
    pub liveness_intervall_sekunden: u64,
    pub monitor_stopp_sekunden: u64,
}

impl Default for Zeitlimits {
    fn default() -> Self {
        let standard = NodeConfig::default();
        Self {
            handshake_sekunden: standard.handshake_timeout.as_secs(),
            keepalive_sekunden: standard.keepalive.as_secs(),
            keepalive_kunde_sekunden: standard.keepalive_kunde.as_secs(),
            benachrichtigung_ack_sekunden: standard.benachrichtigung_ack_timeout.as_secs(),
            token_bindung_sekunden: standard.token_bindung_timeout.as_secs(),
            liveness_intervall_sekunden: standard.liveness_intervall.as_secs(),
            monitor_stopp_sekunden: standard.monitor_stopp_timeout.as_secs(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Uebersetzt die Datei-Konfiguration in die Laufzeit-Konfiguration des Nodes
    pub fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let bind_adresse: IpAddr = self.node.bind_adresse.parse().map_err(|e| {
            anyhow::anyhow!("Ungueltige Bind-Adresse '{}': {e}", self.node.bind_adresse)
        })?;
        let z = &self.zeitlimits;

        Ok(NodeConfig {
            bind_adresse,
            rollen_server: self
                .rollen_server
                .iter()
                .map(|s| RoleServerConfig {
                    port: s.port,
                    rollen: s.rollen.clone(),
                    tls: s.tls,
                })
                .collect(),
            max_nachrichtengroesse: self.node.max_nachrichtengroesse,
            handshake_timeout: Duration::from_secs(z.handshake_sekunden),
            keepalive: Duration::from_secs(z.keepalive_sekunden),
            keepalive_kunde: Duration::from_secs(z.keepalive_kunde_sekunden),
            benachrichtigung_ack_timeout: Duration::from_secs(z.benachrichtigung_ack_sekunden),
            token_bindung_timeout: Duration::from_secs(z.token_bindung_sekunden),
            liveness_intervall: Duration::from_secs(z.liveness_intervall_sekunden),
            monitor_stopp_timeout: Duration::from_secs(z.monitor_stopp_sekunden),
            ..NodeConfig::default()
        })
    }
}
