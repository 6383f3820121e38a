//! TLS client configuration for XMPP streams.

use std::{io::BufReader, path::Path, sync::Arc};

use {
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::{CryptoProvider, ring},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Certificate trust policy for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    /// Skip chain and hostname verification. Handshake signatures are still
    /// checked, so this only removes authentication of the server.
    pub accept_any_certificate: bool,
    /// PEM bundle trusted in addition to the platform roots.
    pub extra_ca_file: Option<std::path::PathBuf>,
}

pub fn client_config(policy: &TrustPolicy) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let config = if policy.accept_any_certificate {
        warn!("TLS certificate verification disabled for this server");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store(policy.extra_ca_file.as_deref())?)
            .with_no_client_auth()
    };
    Ok(Arc::new(config))
}

pub fn server_name(domain: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(domain.to_string()).map_err(|e| Error::Tls(format!("{domain}: {e}")))
}

fn root_store(extra_ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        debug!(error = %e, "skipping unreadable platform certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded platform trust roots");

    if let Some(path) = extra_ca_file {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Tls(format!("open {}: {e}", path.display())))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("read {}: {e}", path.display())))?;
        let (added, _) = roots.add_parsable_certificates(certs);
        debug!(path = %path.display(), added, "loaded extra trust roots");
    }

    if roots.is_empty() {
        return Err(Error::Tls("no trust roots available".into()));
    }
    Ok(roots)
}

/// Accepts any server certificate. Opt-in only; see [`TrustPolicy`].
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
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
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
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
