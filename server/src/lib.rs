//! homenet-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Node-Identitaet, Zertifikatslieferant und
//! Profil-Store mit den Rollen-Servern des Nodes.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use config::ServerConfig;
use homenet_core::InMemoryProfileStore;
use homenet_crypto::{CertificateSupplier, Identity, PemZertifikat, SelbstsigniertesZertifikat};
use homenet_node::{NodeState, RoleServerManager};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet die Rollen-Server und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Node-Identitaet laden oder erzeugen
    /// 2. Zertifikatslieferant waehlen
    /// 3. Alle Listener binden (alles oder nichts)
    /// 4. Auf Ctrl-C warten, dann begrenzt herunterfahren
    pub async fn starten(self) -> Result<()> {
        let node_config = self.config.node_config()?;
        let identitaet = self.identitaet_laden()?;
        let zertifikate = self.zertifikatslieferant();

        tracing::info!(
            identitaet = %identitaet.id(),
            listener = node_config.rollen_server.len(),
            "Node startet"
        );

        let state = NodeState::neu(node_config, identitaet, Arc::new(InMemoryProfileStore::new()));
        let manager = RoleServerManager::starten(state, zertifikate.as_ref()).await?;

        tracing::info!("Node laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Node wird beendet");

        if !manager.herunterfahren().await {
            tracing::warn!("Herunterfahren nicht vollstaendig abgeschlossen");
        }
        Ok(())
    }

    fn identitaet_laden(&self) -> Result<Identity> {
        match &self.config.node.identitaets_schluessel {
            Some(kodiert) => Identity::from_base64(kodiert)
                .map_err(|e| anyhow::anyhow!("Identitaets-Schluessel ungueltig: {e}")),
            None => {
                tracing::warn!(
                    "Kein Identitaets-Schluessel konfiguriert, Node erhaelt eine neue Identitaet"
                );
                Ok(Identity::generate())
            }
        }
    }

    fn zertifikatslieferant(&self) -> Box<dyn CertificateSupplier> {
        match (&self.config.tls.zertifikat_pfad, &self.config.tls.schluessel_pfad) {
            (Some(zertifikat_pfad), Some(schluessel_pfad)) => Box::new(PemZertifikat {
                zertifikat_pfad: zertifikat_pfad.clone(),
                schluessel_pfad: schluessel_pfad.clone(),
            }),
            _ => {
                tracing::info!("Kein TLS-Zertifikat konfiguriert, verwende selbstsigniertes");
                Box::new(SelbstsigniertesZertifikat::new("homenet-node"))
            }
        }
    }
}
