//! Konversations-Zustandsmaschine pro Verbindung
//!
//! ```text
//! New -> HandshakeStarted -> Authenticated{Verified | HomeEstablished | CheckedIn} -> Closed
//! ```
//!
//! Der Zustand schreitet nur voran. Ein schwaecherer Authentifizierungs-
//! nachweis nach einem staerkeren laesst den Zustand unveraendert; nur
//! `schliessen` fuehrt aus jedem Zustand nach `Closed`.

use std::collections::BTreeSet;

use homenet_core::{IdentityId, ProtocolVersion};
use homenet_crypto::{challenge_erzeugen, identity_id, Identity, CHALLENGE_LEN, PUBLIC_KEY_LEN};
use homenet_protocol::message::{StartConversationRequest, StartConversationResponse};

use crate::error::{NodeError, NodeResult};
use crate::validation;

/// Art der abgeschlossenen Authentifizierung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Schluesselbesitz nachgewiesen (VerifyIdentity)
    Verified,
    /// Hosting-Vertrag mit diesem Node abgeschlossen
    HomeEstablished,
    /// Kunde hat sich eingecheckt
    CheckedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    New,
    HandshakeStarted,
    Authenticated(AuthStatus),
    Closed,
}

impl ConversationState {
    fn rang(&self) -> u8 {
        match self {
            ConversationState::New => 0,
            ConversationState::HandshakeStarted => 1,
            ConversationState::Authenticated(AuthStatus::Verified) => 2,
            ConversationState::Authenticated(AuthStatus::HomeEstablished) => 3,
            ConversationState::Authenticated(AuthStatus::CheckedIn) => 4,
            ConversationState::Closed => u8::MAX,
        }
    }
}

/// Gespraechszustand einer Verbindung
#[derive(Debug)]
pub struct Conversation {
    zustand: ConversationState,
    client_public_key: Option<Vec<u8>>,
    identity_id: Option<IdentityId>,
    node_challenge: Option<[u8; CHALLENGE_LEN]>,
    version: Option<ProtocolVersion>,
    /// Vom eingecheckten Kunden angebotene Application Services
    dienste: BTreeSet<String>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::neu()
    }
}

impl Conversation {
    pub fn neu() -> Self {
        Self {
            zustand: ConversationState::New,
            client_public_key: None,
            identity_id: None,
            node_challenge: None,
            version: None,
            dienste: BTreeSet::new(),
        }
    }

    pub fn zustand(&self) -> ConversationState {
        self.zustand
    }

    pub fn identity_id(&self) -> Option<IdentityId> {
        self.identity_id
    }

    pub fn client_public_key(&self) -> Option<&[u8]> {
        self.client_public_key.as_deref()
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    pub fn handshake_gestartet(&self) -> bool {
        matches!(
            self.zustand,
            ConversationState::HandshakeStarted | ConversationState::Authenticated(_)
        )
    }

    pub fn ist_authentifiziert(&self) -> bool {
        matches!(self.zustand, ConversationState::Authenticated(_))
    }

    pub fn ist_eingecheckt(&self) -> bool {
        self.zustand == ConversationState::Authenticated(AuthStatus::CheckedIn)
    }

    /// Identitaet, falls eingecheckt
    pub fn eingecheckte_identitaet(&self) -> Option<IdentityId> {
        if self.ist_eingecheckt() {
            self.identity_id
        } else {
            None
        }
    }

    /// Beantwortet die Client-Challenge (Handshake)
    ///
    /// Gibt die Antwort und die Signatur des Nodes ueber die Client-Challenge
    /// zurueck.
    pub fn starten(
        &mut self,
        node: &Identity,
        anfrage: &StartConversationRequest,
    ) -> NodeResult<(StartConversationResponse, Vec<u8>)> {
        if self.zustand != ConversationState::New {
            return Err(NodeError::Zustand("Konversation bereits gestartet".into()));
        }
        if anfrage.public_key.len() != PUBLIC_KEY_LEN {
            return Err(NodeError::validierung("publicKey"));
        }
        if anfrage.challenge.len() != CHALLENGE_LEN {
            return Err(NodeError::validierung("challenge"));
        }
        let version = ProtocolVersion::hoechste_gemeinsame(&anfrage.supported_versions)
            .ok_or_else(|| NodeError::NichtUnterstuetzt("keine gemeinsame Version".into()))?;

        let node_challenge = challenge_erzeugen();
        let signatur = node.sign(&anfrage.challenge);

        self.client_public_key = Some(anfrage.public_key.clone());
        self.identity_id = Some(identity_id(&anfrage.public_key));
        self.node_challenge = Some(node_challenge);
        self.version = Some(version);
        self.zustand = ConversationState::HandshakeStarted;

        let antwort = StartConversationResponse {
            public_key: node.public_key_bytes().to_vec(),
            challenge: node_challenge.to_vec(),
            client_challenge: anfrage.challenge.clone(),
            version,
        };
        Ok((antwort, signatur))
    }

    /// Prueft, ob der Client die Node-Challenge mit seinem Schluessel signiert hat
    ///
    /// Gibt die Identitaets-ID und den Public Key des Clients zurueck.
    pub fn challenge_pruefen(
        &self,
        challenge: &[u8],
        signatur: Option<&[u8]>,
    ) -> NodeResult<(IdentityId, Vec<u8>)> {
        let (Some(erwartet), Some(key), Some(id)) = (
            self.node_challenge.as_ref(),
            self.client_public_key.as_ref(),
            self.identity_id,
        ) else {
            return Err(NodeError::Autorisierung("Handshake nicht gestartet".into()));
        };
        if self.zustand == ConversationState::Closed {
            return Err(NodeError::Autorisierung("Konversation geschlossen".into()));
        }
        if challenge != erwartet.as_slice() {
            return Err(NodeError::Authentifizierung("Challenge stimmt nicht".into()));
        }
        let signatur = signatur
            .ok_or_else(|| NodeError::Authentifizierung("Signatur fehlt".into()))?;
        if !Identity::verify(challenge, signatur, key) {
            return Err(NodeError::Authentifizierung("Signatur ungueltig".into()));
        }
        Ok((id, key.clone()))
    }

    /// Schliesst eine Authentifizierung ab; der Zustand sinkt nie
    pub fn authentifizieren(&mut self, status: AuthStatus) -> NodeResult<()> {
        if !self.handshake_gestartet() {
            return Err(NodeError::Autorisierung("Handshake nicht gestartet".into()));
        }
        let neu = ConversationState::Authenticated(status);
        if neu.rang() > self.zustand.rang() {
            self.zustand = neu;
        }
        Ok(())
    }

    pub fn schliessen(&mut self) {
        self.zustand = ConversationState::Closed;
    }

    // -----------------------------------------------------------------------
    // Application Services
    // -----------------------------------------------------------------------

    pub fn dienste_hinzufuegen(&mut self, namen: &[String]) -> NodeResult<()> {
        if !self.ist_eingecheckt() {
            return Err(NodeError::Autorisierung("Kein Check-In".into()));
        }
        for name in namen {
            validation::dienstname_pruefen(name)?;
        }
        let neue = namen.iter().filter(|n| !self.dienste.contains(*n)).count();
        if self.dienste.len() + neue > validation::MAX_DIENSTE {
            return Err(NodeError::validierung("serviceNames"));
        }
        self.dienste.extend(namen.iter().cloned());
        Ok(())
    }

    pub fn dienst_entfernen(&mut self, name: &str) -> NodeResult<()> {
        if !self.ist_eingecheckt() {
            return Err(NodeError::Autorisierung("Kein Check-In".into()));
        }
        if self.dienste.remove(name) {
            Ok(())
        } else {
            Err(NodeError::NichtGefunden(format!("Dienst '{}'", name)))
        }
    }

    pub fn bietet_dienst(&self, name: &str) -> bool {
        self.dienste.contains(name)
    }

    pub fn dienste(&self) -> Vec<String> {
        self.dienste.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
