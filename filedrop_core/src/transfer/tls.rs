//! TLS over TCP: receiver identity, sender trust policy.
//!
//! The receiver presents a PEM certificate chain, or an ephemeral
//! self-signed one for `localhost` when none is configured. The sender
//! picks one of the [`TrustPolicy`] modes.

use crate::config::{TlsSettings, TrustPolicy};
use crate::error::{Result, TransferError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig,
    SignatureScheme,
};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Self-signed certificate in both DER (for rustls) and PEM (for disk)
pub struct GeneratedCert {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed certificate for the given host names
pub fn generate_self_signed_cert(hosts: &[String]) -> Result<GeneratedCert> {
    let certified_key = rcgen::generate_simple_self_signed(hosts.to_vec())
        .map_err(|e| TransferError::Tls(format!("certificate generation failed: {e}")))?;
    let key = PrivatePkcs8KeyDer::from(certified_key.signing_key.serialize_der());
    let cert_der = CertificateDer::from(certified_key.cert.der().to_vec());
    Ok(GeneratedCert {
        certs: vec![cert_der],
        key: key.into(),
        cert_pem: certified_key.cert.pem(),
        key_pem: certified_key.signing_key.serialize_pem(),
    })
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_error = |e: rustls::pki_types::pem::Error| {
        TransferError::Tls(format!("cannot read certificates from {}: {e}", path.display()))
    };
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if certs.is_empty() {
        return Err(TransferError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| {
        TransferError::Tls(format!("cannot read private key from {}: {e}", path.display()))
    })
}

/// Certificate and key for the receiver. Nothing configured means a fresh
/// self-signed certificate for this run.
pub fn load_server_identity(
    settings: &TlsSettings,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    match (&settings.cert_path, &settings.key_path) {
        (Some(cert), Some(key)) => Ok((load_certs(cert)?, load_private_key(key)?)),
        (None, None) => {
            let generated = generate_self_signed_cert(&["localhost".to_string()])?;
            tracing::info!(
                "No certificate configured, using ephemeral self-signed certificate {}",
                certificate_fingerprint(&generated.certs[0])
            );
            Ok((generated.certs, generated.key))
        }
        _ => Err(TransferError::Tls(
            "certificate and key paths must be given together".to_string(),
        )),
    }
}

/// Hex SHA-256 of a DER certificate, the form used for pinning
pub fn certificate_fingerprint(cert: &CertificateDer<'_>) -> String {
    hex::encode(Sha256::digest(cert.as_ref()))
}

/// Accepts `AB:CD:..` or plain hex in any case
fn normalize_fingerprint(fingerprint: &str) -> Result<String> {
    let hex: String = fingerprint
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TransferError::Tls(format!(
            "invalid SHA-256 fingerprint {fingerprint:?}"
        )));
    }
    Ok(hex)
}

pub fn make_acceptor(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor> {
    let config = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub fn make_connector(policy: &TrustPolicy) -> Result<TlsConnector> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(PROTOCOL_VERSIONS)?;

    let config = match policy {
        TrustPolicy::AcceptAny => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(RelaxedServerVerifier::new(
                &provider, None,
            )))
            .with_no_client_auth(),
        TrustPolicy::Pinned { sha256 } => {
            let pin = normalize_fingerprint(sha256)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(RelaxedServerVerifier::new(
                    &provider,
                    Some(pin),
                )))
                .with_no_client_auth()
        }
        TrustPolicy::CaFile { path } => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert)?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TransferError::Tls(format!("invalid server name {host:?}: {e}")))
}

/// Skips chain and name validation, optionally requiring a fingerprint
/// match. Handshake signatures are always verified.
#[derive(Debug)]
struct RelaxedServerVerifier {
    pin: Option<String>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl RelaxedServerVerifier {
    fn new(provider: &CryptoProvider, pin: Option<String>) -> Self {
        Self {
            pin,
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for RelaxedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Some(pin) = &self.pin {
            let actual = certificate_fingerprint(end_entity);
            if &actual != pin {
                tracing::warn!("Certificate fingerprint {} does not match pin", actual);
                return Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ));
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
