//! Ed25519-Identitaeten
//!
//! Node und Clients besitzen je ein Ed25519-Schluesselpaar. Die
//! Identitaets-ID ist der SHA-1 (20 Bytes) des oeffentlichen Schluessels.
//! Beim Handshake signieren beide Seiten die rohen Challenge-Bytes der
//! jeweils anderen Seite.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use homenet_core::types::IDENTITY_ID_LEN;
use homenet_core::IdentityId;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{CryptoError, CryptoResult};

/// Laenge eines Ed25519 Public Keys
pub const PUBLIC_KEY_LEN: usize = 32;

/// Laenge einer Handshake-Challenge
pub const CHALLENGE_LEN: usize = 32;

/// Ed25519-Schluesselpaar (Node oder Client)
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generiert ein neues Schluesselpaar
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Erstellt eine Identity aus einem privaten Schluessel (32 Bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Laedt einen Base64-kodierten privaten Schluessel (Konfiguration)
    pub fn from_base64(kodiert: &str) -> CryptoResult<Self> {
        let bytes = BASE64.decode(kodiert.trim().as_bytes())?;
        let arr: [u8; 32] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                    erwartet: 32,
                    erhalten: bytes.len(),
                })?;
        Ok(Self::from_bytes(&arr))
    }

    /// Privater Schluessel als Base64 (fuer Persistenz)
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Identitaets-ID dieses Schluesselpaars
    pub fn id(&self) -> IdentityId {
        identity_id(&self.public_key_bytes())
    }

    /// Signiert Daten mit dem privaten Schluessel (64 Bytes)
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Verifiziert eine Signatur mit einem oeffentlichen Schluessel
    ///
    /// Falsche Laengen fuehren zu `false`, nie zu einem Panic.
    pub fn verify(data: &[u8], signature_bytes: &[u8], public_key_bytes: &[u8]) -> bool {
        let Ok(key_array) = <&[u8; PUBLIC_KEY_LEN]>::try_from(public_key_bytes) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(key_array) else {
            return false;
        };
        let Ok(sig_array) = signature_bytes.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(sig_array);
        verifying_key.verify(data, &signature).is_ok()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity {{ id: {} }}", self.id())
    }
}

/// Identitaets-ID: SHA-1(public_key)
pub fn identity_id(public_key: &[u8]) -> IdentityId {
    let hash: [u8; IDENTITY_ID_LEN] = Sha1::digest(public_key).into();
    IdentityId(hash)
}

/// Frische Zufalls-Challenge aus dem OS-RNG
pub fn challenge_erzeugen() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signieren_und_verifizieren() {
        let identity = Identity::generate();
        let challenge = challenge_erzeugen();

        let signature = identity.sign(&challenge);
        assert_eq!(signature.len(), 64);
        assert!(Identity::verify(
            &challenge,
            &signature,
            &identity.public_key_bytes()
        ));
    }

    #[test]
    fn jede_bitmutation_der_signatur_schlaegt_fehl() {
        let identity = Identity::generate();
        let challenge = challenge_erzeugen();
        let signature = identity.sign(&challenge);
        let pub_key = identity.public_key_bytes();

        for byte in 0..signature.len() {
            for bit in 0..8 {
                let mut kaputt = signature.clone();
                kaputt[byte] ^= 1 << bit;
                assert!(
                    !Identity::verify(&challenge, &kaputt, &pub_key),
                    "Mutation an Byte {} Bit {} wurde akzeptiert",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn jede_bitmutation_des_schluessels_schlaegt_fehl() {
        let identity = Identity::generate();
        let challenge = challenge_erzeugen();
        let signature = identity.sign(&challenge);
        let pub_key = identity.public_key_bytes();

        for byte in 0..pub_key.len() {
            for bit in 0..8 {
                let mut kaputt = pub_key;
                kaputt[byte] ^= 1 << bit;
                assert!(!Identity::verify(&challenge, &signature, &kaputt));
            }
        }
    }

    #[test]
    fn fremder_schluessel_schlaegt_fehl() {
        let a = Identity::generate();
        let b = Identity::generate();
        let signature = a.sign(b"daten");
        assert!(!Identity::verify(b"daten", &signature, &b.public_key_bytes()));
    }

    #[test]
    fn falsche_laengen_fuehren_nicht_zu_panic() {
        let identity = Identity::generate();
        let signature = identity.sign(b"x");
        assert!(!Identity::verify(b"x", &signature[..10], &identity.public_key_bytes()));
        assert!(!Identity::verify(b"x", &signature, &[1, 2, 3]));
    }

    #[test]
    fn identity_id_ist_deterministisch() {
        let identity = Identity::generate();
        let id = identity_id(&identity.public_key_bytes());
        assert_eq!(id, identity.id());
        assert_ne!(id, Identity::generate().id());
    }

    #[test]
    fn identity_id_ist_sha1() {
        assert_eq!(
            identity_id(b"abc").to_string(),
            "A9993E364706816ABA3E25717850C26C9CD0D89D"
        );
    }

    #[test]
    fn base64_round_trip_behaelt_schluessel() {
        let identity = Identity::generate();
        let geladen = Identity::from_base64(&identity.to_base64()).unwrap();
        assert_eq!(geladen.public_key_bytes(), identity.public_key_bytes());
        assert!(Identity::from_base64("AAAA").is_err());
    }

    #[test]
    fn challenges_sind_zufaellig() {
        assert_ne!(challenge_erzeugen(), challenge_erzeugen());
    }
}
