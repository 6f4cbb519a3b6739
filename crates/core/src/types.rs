//! Gemeinsame Identifikationstypen fuer HomeNet
//!
//! IDs verwenden das Newtype-Pattern, damit Verbindungs- und
//! Identitaets-IDs zur Compilezeit nicht verwechselt werden koennen.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{HomeNetError, HomeNetResult};

/// Laenge einer Identitaets-ID in Bytes
pub const IDENTITY_ID_LEN: usize = 20;

/// Identitaets-ID: Hash ueber den 32-Byte Ed25519 Public Key
///
/// Auf dem Draht als Base64-String kodiert.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub [u8; IDENTITY_ID_LEN]);

impl IdentityId {
    /// Erstellt eine IdentityId aus einem beliebigen Slice, prueft die Laenge
    pub fn from_slice(bytes: &[u8]) -> HomeNetResult<Self> {
        let arr: [u8; IDENTITY_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| HomeNetError::UngueltigeLaenge {
                    feld: "identityId",
                    erwartet: IDENTITY_ID_LEN,
                    erhalten: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self)
    }
}

impl Serialize for IdentityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for IdentityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Eindeutige Verbindungs-ID (pro angenommenem Socket)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Logische Rolle eines Listening-Ports
///
/// Mehrere Rollen koennen sich einen physischen Port teilen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    /// Primaerer Port (ListRoles, Ping)
    Primary,
    /// Nachbar-Nodes
    NdNeighbor,
    /// Kollegen-Nodes
    NdColleague,
    /// Clients ohne Hosting-Vertrag
    ClNonCustomer,
    /// Kunden dieses Nodes (Check-In)
    ClCustomer,
    /// Application-Service-Verbindungen (Relay-Legs)
    ClAppService,
}

impl ServerRole {
    /// Alle bekannten Rollen in kanonischer Reihenfolge
    pub const ALLE: [ServerRole; 6] = [
        ServerRole::Primary,
        ServerRole::NdNeighbor,
        ServerRole::NdColleague,
        ServerRole::ClNonCustomer,
        ServerRole::ClCustomer,
        ServerRole::ClAppService,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServerRole::Primary => "primary",
            ServerRole::NdNeighbor => "nd_neighbor",
            ServerRole::NdColleague => "nd_colleague",
            ServerRole::ClNonCustomer => "cl_non_customer",
            ServerRole::ClCustomer => "cl_customer",
            ServerRole::ClAppService => "cl_app_service",
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ServerRole {
    type Err = HomeNetError;

    fn from_str(s: &str) -> HomeNetResult<Self> {
        ServerRole::ALLE
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| HomeNetError::UnbekannteRolle(s.to_string()))
    }
}

/// Semantische Protokollversion (major, minor, patch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u8; 3]);

impl ProtocolVersion {
    pub const V1_0_0: ProtocolVersion = ProtocolVersion([1, 0, 0]);

    /// Vom Node unterstuetzte Versionen
    pub const UNTERSTUETZT: [ProtocolVersion; 1] = [ProtocolVersion::V1_0_0];

    pub fn ist_null(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    /// Nicht-null und in der Liste der unterstuetzten Versionen
    pub fn ist_unterstuetzt(&self) -> bool {
        !self.ist_null() && Self::UNTERSTUETZT.contains(self)
    }

    /// Hoechste Version aus der Schnittmenge mit den angebotenen Versionen
    pub fn hoechste_gemeinsame(angeboten: &[ProtocolVersion]) -> Option<ProtocolVersion> {
        angeboten
            .iter()
            .filter(|v| v.ist_unterstuetzt())
            .max()
            .copied()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0[0], self.0[1], self.0[2])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
