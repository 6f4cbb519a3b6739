//! TLS-Transport fuer Rollen-Listener
//!
//! Der Node terminiert TLS mit einem Zertifikat aus einem
//! [`CertificateSupplier`]. Clients des HomeNet-Protokolls validieren
//! traditionell keine Zertifikatskette. Diese gelockerte Vertrauensstufe
//! bildet [`unsicherer_connector`] nach; er ist nur fuer Tests und
//! Interop gedacht. Fuer den Produktivbetrieb pinnt
//! [`fingerprint_connector`] den SHA-256-Fingerprint des Node-Zertifikats.

use std::path::PathBuf;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair as RcgenKeyPair};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use rustls_pemfile::{certs, private_key};
use sha2::{Digest, Sha256};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{CryptoError, CryptoResult};

// ---------------------------------------------------------------------------
// Zertifikate
// ---------------------------------------------------------------------------

/// PEM-kodiertes Server-Zertifikat samt Schluessel
#[derive(Clone)]
pub struct ServerCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// SHA-256 Fingerprint des Leaf-Zertifikats (`AA:BB:...`)
    pub fingerprint: String,
}

impl std::fmt::Debug for ServerCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCertificate")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Liefert das Zertifikat fuer TLS-terminierte Listener
pub trait CertificateSupplier: Send + Sync {
    fn zertifikat(&self) -> CryptoResult<ServerCertificate>;
}

/// Erzeugt bei jedem Aufruf ein frisches selbstsigniertes Zertifikat
#[derive(Debug, Clone)]
pub struct SelbstsigniertesZertifikat {
    common_name: String,
}

impl SelbstsigniertesZertifikat {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
        }
    }
}

impl CertificateSupplier for SelbstsigniertesZertifikat {
    fn zertifikat(&self) -> CryptoResult<ServerCertificate> {
        let mut params = CertificateParams::new(vec![self.common_name.clone()])
            .map_err(|e| CryptoError::ZertifikatGenerierung(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name.as_str());
        params.distinguished_name = dn;

        let key_pair = RcgenKeyPair::generate()
            .map_err(|e| CryptoError::ZertifikatGenerierung(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CryptoError::ZertifikatGenerierung(e.to_string()))?;

        Ok(ServerCertificate {
            certificate_pem: cert.pem(),
            private_key_pem: key_pair.serialize_pem(),
            fingerprint: fingerprint_berechnen(cert.der()),
        })
    }
}

/// Zertifikat und Schluessel aus PEM-Dateien
#[derive(Debug, Clone)]
pub struct PemZertifikat {
    pub zertifikat_pfad: PathBuf,
    pub schluessel_pfad: PathBuf,
}

impl CertificateSupplier for PemZertifikat {
    fn zertifikat(&self) -> CryptoResult<ServerCertificate> {
        let certificate_pem = std::fs::read_to_string(&self.zertifikat_pfad)?;
        let private_key_pem = std::fs::read_to_string(&self.schluessel_pfad)?;

        let kette = zertifikate_parsen(&certificate_pem)?;
        let leaf = kette
            .first()
            .ok_or_else(|| CryptoError::Tls("Zertifikatsdatei enthaelt kein Zertifikat".into()))?;

        Ok(ServerCertificate {
            fingerprint: fingerprint_berechnen(leaf.as_ref()),
            certificate_pem,
            private_key_pem,
        })
    }
}

/// SHA-256 Fingerprint eines DER-kodierten Zertifikats
pub fn fingerprint_berechnen(der_bytes: &[u8]) -> String {
    Sha256::digest(der_bytes)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn zertifikate_parsen(pem: &str) -> CryptoResult<Vec<CertificateDer<'static>>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CryptoError::Tls(format!("Zertifikat-Parsing fehlgeschlagen: {}", e)))
}

fn schluessel_parsen(pem: &str) -> CryptoResult<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    private_key(&mut cursor)
        .map_err(|e| CryptoError::Tls(format!("Schluessel-Parsing fehlgeschlagen: {}", e)))?
        .ok_or_else(|| CryptoError::Tls("Kein privater Schluessel gefunden".to_string()))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// TLS-Acceptor fuer einen Rollen-Listener
pub fn tls_acceptor(zertifikat: &ServerCertificate) -> CryptoResult<TlsAcceptor> {
    let kette = zertifikate_parsen(&zertifikat.certificate_pem)?;
    let schluessel = schluessel_parsen(&zertifikat.private_key_pem)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CryptoError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(kette, schluessel)
        .map_err(|e| CryptoError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

fn connector_mit(verifier: Arc<dyn ServerCertVerifier>) -> CryptoResult<TlsConnector> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CryptoError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connector ohne jede Zertifikatspruefung
///
/// Entspricht dem Verhalten bestehender HomeNet-Clients. Nicht fuer
/// Produktivverbindungen verwenden.
pub fn unsicherer_connector() -> CryptoResult<TlsConnector> {
    tracing::debug!("TLS-Connector ohne Zertifikatspruefung erstellt");
    connector_mit(Arc::new(OhnePruefung {
        provider: provider(),
    }))
}

/// Connector, der nur das Zertifikat mit dem erwarteten Fingerprint akzeptiert
pub fn fingerprint_connector(erwartet: impl Into<String>) -> CryptoResult<TlsConnector> {
    connector_mit(Arc::new(FingerprintPruefung {
        erwartet: erwartet.into().to_ascii_uppercase(),
        provider: provider(),
    }))
}

/// Akzeptiert jedes Zertifikat; Handshake-Signaturen werden trotzdem geprueft
#[derive(Debug)]
struct OhnePruefung {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for OhnePruefung {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Certificate Pinning ueber den SHA-256 Fingerprint
#[derive(Debug)]
struct FingerprintPruefung {
    erwartet: String,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for FingerprintPruefung {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let tatsaechlich = fingerprint_berechnen(end_entity.as_ref());
        if tatsaechlich == self.erwartet {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                erwartet = %self.erwartet,
                erhalten = %tatsaechlich,
                "Zertifikat-Fingerprint stimmt nicht"
            );
            Err(rustls::Error::General(
                "Zertifikat-Fingerprint stimmt nicht".into(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
