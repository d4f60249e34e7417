//! TLS context construction for `ldaps://` and StartTLS.
//!
//! A [`TlsConfig`] is compiled from [`TlsOptions`] once and cached by the
//! connection until a TLS option changes or `create_new_tls_context` is called.

use super::options::{CrlCheck, RequireCert, TlsOptions};
use crate::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, ServerName, UnixTime,
};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Compiled TLS client context
#[derive(Clone)]
pub struct TlsConfig {
    require_cert: RequireCert,
    crl_check: CrlCheck,
    client_auth: bool,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Build a context from TLS options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if:
    /// - a certificate, key, or CRL file cannot be read or holds no usable items
    /// - no cipher suite matches the configured allow list
    /// - CRL checking is requested without a CRL file
    pub fn from_options(opts: &TlsOptions) -> Result<TlsConfig> {
        let provider = Arc::new(select_provider(opts.cipher_suite.as_deref())?);

        if let Some(path) = &opts.random_file {
            tracing::debug!(path = %path, "random file is not used by rustls");
        }
        if let Some(path) = &opts.dh_file {
            tracing::debug!(path = %path, "DH parameter file is not used by rustls");
        }

        let versions: &[&'static rustls::SupportedProtocolVersion] = if opts.protocol_min >= 0x0304
        {
            &[&rustls::version::TLS13]
        } else {
            rustls::ALL_VERSIONS
        };

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)
            .map_err(|e| Error::Config(format!("unsupported TLS settings: {}", e)))?;

        let builder = if opts.require_cert.verifies() {
            let roots = Arc::new(load_roots(opts)?);
            let mut verifier = WebPkiServerVerifier::builder_with_provider(roots, provider.clone());
            match opts.crl_check {
                CrlCheck::None => {
                    if opts.crl_file.is_some() {
                        tracing::debug!("CRL file configured but CRL checking is disabled");
                    }
                }
                strategy => {
                    let path = opts.crl_file.as_deref().ok_or_else(|| {
                        Error::Config(format!("CRL check '{}' requires a CRL file", strategy))
                    })?;
                    verifier = verifier.with_crls(load_crls(path)?);
                    if strategy == CrlCheck::Peer {
                        verifier = verifier.only_check_end_entity_revocation();
                    }
                }
            }
            let verifier = verifier
                .build()
                .map_err(|e| Error::Config(format!("failed to build certificate verifier: {}", e)))?;
            builder.with_webpki_verifier(verifier)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate {
                    algorithms: provider.signature_verification_algorithms,
                }))
        };

        let (config, client_auth) = match (&opts.cert_file, &opts.key_file) {
            (Some(cert), Some(key)) => {
                let chain = load_certs(cert)?;
                let key = load_key(key)?;
                let config = builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| Error::Config(format!("invalid client certificate: {}", e)))?;
                (config, true)
            }
            (None, None) => (builder.with_no_client_auth(), false),
            _ => {
                return Err(Error::Config(
                    "client certificate and key must be configured together".into(),
                ))
            }
        };

        Ok(TlsConfig {
            require_cert: opts.require_cert,
            crl_check: opts.crl_check,
            client_auth,
            client_config: Arc::new(config),
        })
    }

    /// Get the rustls ClientConfig
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Certificate checking strategy this context was built with
    pub fn require_cert(&self) -> RequireCert {
        self.require_cert
    }

    /// Whether a client certificate is presented
    pub fn has_client_auth(&self) -> bool {
        self.client_auth
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("require_cert", &self.require_cert)
            .field("crl_check", &self.crl_check)
            .field("client_auth", &self.client_auth)
            .field("client_config", &"<ClientConfig>")
            .finish()
    }
}

/// aws-lc-rs provider, optionally narrowed to a colon-separated list of suites
fn select_provider(allow_list: Option<&str>) -> Result<CryptoProvider> {
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    let Some(list) = allow_list else {
        return Ok(provider);
    };

    let wanted: Vec<String> = list
        .split(':')
        .map(|s| s.trim().to_ascii_uppercase().replace('-', "_"))
        .filter(|s| !s.is_empty())
        .collect();
    provider
        .cipher_suites
        .retain(|s| wanted.iter().any(|w| format!("{:?}", s.suite()) == *w));

    if provider.cipher_suites.is_empty() {
        return Err(Error::Config(format!(
            "no supported cipher suite matches '{}'",
            list
        )));
    }
    Ok(provider)
}

fn load_roots(opts: &TlsOptions) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();

    if let Some(path) = &opts.ca_cert_file {
        let (added, _) = store.add_parsable_certificates(load_certs(path)?);
        if added == 0 {
            return Err(Error::Config(format!(
                "no valid certificates found in '{}'",
                path
            )));
        }
    }

    if let Some(dir) = &opts.ca_cert_dir {
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::Config(format!("failed to read CA directory '{}': {}", dir, e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match read_pem_certs(&path) {
                Ok(certs) => {
                    store.add_parsable_certificates(certs);
                }
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping CA file"),
            }
        }
    }

    if opts.ca_cert_file.is_some() || opts.ca_cert_dir.is_some() {
        if store.is_empty() {
            return Err(Error::Config("no trusted CA certificates loaded".into()));
        }
        return Ok(store);
    }

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!(error = %err, "error loading platform certificates");
    }
    store.add_parsable_certificates(native.certs);

    if store.is_empty() {
        tracing::debug!("no platform certificates, using bundled Mozilla roots");
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(store)
}

fn read_pem_certs(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = read_pem_certs(Path::new(path))
        .map_err(|e| Error::Config(format!("failed to read certificates from '{}': {}", path, e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no valid certificates found in '{}'",
            path
        )));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Config(format!("failed to read key file '{}': {}", path, e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Config(format!("failed to parse key file '{}': {}", path, e)))?
        .ok_or_else(|| Error::Config(format!("no private key found in '{}'", path)))
}

fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Config(format!("failed to read CRL file '{}': {}", path, e)))?;
    let crls = rustls_pemfile::crls(&mut BufReader::new(file))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Config(format!("failed to parse CRL file '{}': {}", path, e)))?;
    if crls.is_empty() {
        return Err(Error::Config(format!("no CRLs found in '{}'", path)));
    }
    Ok(crls)
}

/// Verifier for `never` / `allow`: chain and name are not checked, handshake
/// signatures still are.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Parse a URL host into a TLS server name (SNI / certificate name).
///
/// Accepts DNS names (a trailing dot is dropped) and IPv4 / IPv6 literals,
/// with or without brackets.
pub fn parse_server_name(hostname: &str) -> Result<ServerName<'static>> {
    let hostname = hostname
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Config(format!("invalid hostname for TLS: '{}'", hostname)))
}
