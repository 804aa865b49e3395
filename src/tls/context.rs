//! Role-tagged TLS contexts.
//!
//! # Responsibilities
//! - Pin each context to a single protocol version
//! - Hold the client trust store / server certificate and key
//! - Hand out tokio-rustls connectors and acceptors
//!
//! # Design Decisions
//! - No process-wide defaults: contexts are built at startup and injected
//! - Client and server are separate types, so a context can't be used in the
//!   wrong role
//! - ring is the only crypto provider compiled in

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{RootCertStore, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::TlsError;
use crate::tls::credentials::{self, PassphraseCallback};
use crate::tls::verifier::AcceptAnyCertificate;

/// The one protocol version a context negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    Tls12,
    #[default]
    Tls13,
}

impl TlsVersion {
    fn protocol(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "TLSv1.2"),
            TlsVersion::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client-role TLS context.
#[derive(Clone)]
pub struct ClientContext {
    version: TlsVersion,
    config: Arc<rustls::ClientConfig>,
    server_name: Option<ServerName<'static>>,
}

impl ClientContext {
    pub fn builder() -> ClientContextBuilder {
        ClientContextBuilder::default()
    }

    /// TLS 1.3 context trusting the webpki root set.
    pub fn with_default_roots() -> Result<Self, TlsError> {
        Self::builder().with_webpki_roots().build()
    }

    pub fn version(&self) -> TlsVersion {
        self.version
    }

    pub(crate) fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.config))
    }

    /// Name presented for SNI and checked against the certificate: the
    /// configured override, otherwise the destination IP.
    pub(crate) fn server_name_for(&self, destination: &SocketAddr) -> ServerName<'static> {
        match &self.server_name {
            Some(name) => name.clone(),
            None => ServerName::IpAddress(destination.ip().into()),
        }
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("version", &self.version)
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Builder for [`ClientContext`].
pub struct ClientContextBuilder {
    version: TlsVersion,
    roots: RootCertStore,
    verify: bool,
    server_name: Option<String>,
}

impl Default for ClientContextBuilder {
    fn default() -> Self {
        Self {
            version: TlsVersion::default(),
            roots: RootCertStore::empty(),
            verify: true,
            server_name: None,
        }
    }
}

impl ClientContextBuilder {
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_webpki_roots(mut self) -> Self {
        self.roots
            .extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        self
    }

    /// Trust every certificate in a PEM bundle.
    pub fn add_ca_pem(mut self, pem: &[u8], origin: &Path) -> Result<Self, TlsError> {
        for cert in credentials::parse_certificates(pem, origin)? {
            self.roots.add(cert)?;
        }
        Ok(self)
    }

    pub fn add_ca_file(self, path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_ca_pem(&pem, path)
    }

    /// Name to verify the server certificate against, instead of its IP.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Skip certificate verification entirely.
    pub fn dangerous_disable_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    pub fn build(self) -> Result<ClientContext, TlsError> {
        let provider = provider();
        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[self.version.protocol()])?;

        let config = if self.verify {
            builder
                .with_root_certificates(self.roots)
                .with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new(provider)))
                .with_no_client_auth()
        };

        let server_name = self
            .server_name
            .map(|name| {
                ServerName::try_from(name.clone()).map_err(|_| TlsError::InvalidServerName(name))
            })
            .transpose()?;

        Ok(ClientContext {
            version: self.version,
            config: Arc::new(config),
            server_name,
        })
    }
}

/// Server-role TLS context.
#[derive(Clone)]
pub struct ServerContext {
    version: TlsVersion,
    passphrase: Option<PassphraseCallback>,
    config: Option<Arc<rustls::ServerConfig>>,
}

impl ServerContext {
    pub fn new(version: TlsVersion) -> Self {
        Self {
            version,
            passphrase: None,
            config: None,
        }
    }

    pub fn version(&self) -> TlsVersion {
        self.version
    }

    /// Install the callback consulted when the private key is encrypted.
    pub fn set_passphrase_callback(&mut self, callback: PassphraseCallback) {
        self.passphrase = Some(callback);
    }

    /// Load a PEM certificate chain and private key into the context.
    pub async fn load_cert_chain(&mut self, cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
        let cert_pem = credentials::read_file(cert_path).await?;
        let key_pem = credentials::read_file(key_path).await?;

        let certs = credentials::parse_certificates(&cert_pem, cert_path)?;
        let key = credentials::parse_private_key(&key_pem, key_path, self.passphrase.as_ref())?;

        let config = rustls::ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[self.version.protocol()])?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        tracing::debug!(
            cert = ?cert_path,
            key = ?key_path,
            version = %self.version,
            "Server credentials loaded"
        );
        self.config = Some(Arc::new(config));
        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.config.is_some()
    }

    pub(crate) fn acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        self.config
            .as_ref()
            .map(|config| TlsAcceptor::from(Arc::clone(config)))
            .ok_or(TlsError::MissingCredentials)
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new(TlsVersion::default())
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("version", &self.version)
            .field("passphrase", &self.passphrase.is_some())
            .field("credentials", &self.config.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::tls::credentials::testing::{encrypt_key, self_signed};

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn server_context_loads_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed();
        let cert_path = write(&dir, "cert.pem", &cert.cert_pem);
        let key_path = write(&dir, "key.pem", &cert.key_pem);

        let mut context = ServerContext::new(TlsVersion::Tls12);
        assert!(context.acceptor().is_err());

        context.load_cert_chain(&cert_path, &key_path).await.unwrap();
        assert!(context.has_credentials());
        assert!(context.acceptor().is_ok());
    }

    #[tokio::test]
    async fn server_context_uses_passphrase_callback() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed();
        let cert_path = write(&dir, "cert.pem", &cert.cert_pem);
        let key_path = write(&dir, "key.pem", &encrypt_key(&cert.key_der, "open sesame"));

        let mut context = ServerContext::default();
        let err = context.load_cert_chain(&cert_path, &key_path).await.unwrap_err();
        assert!(matches!(err, TlsError::PassphraseRequired(_)));

        context.set_passphrase_callback(Arc::new(|| "open sesame".to_string()));
        context.load_cert_chain(&cert_path, &key_path).await.unwrap();
        assert!(context.has_credentials());
    }

    #[tokio::test]
    async fn missing_certificate_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = ServerContext::default();
        let missing = dir.path().join("missing.pem");

        let err = context.load_cert_chain(&missing, &missing).await.unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }

    #[test]
    fn client_server_name_defaults_to_destination_ip() {
        let context = ClientContext::builder().build().unwrap();
        let dest: SocketAddr = "10.1.2.3:443".parse().unwrap();
        assert_eq!(
            context.server_name_for(&dest),
            ServerName::IpAddress(dest.ip().into())
        );

        let context = ClientContext::builder()
            .server_name("example.test")
            .build()
            .unwrap();
        assert_eq!(
            context.server_name_for(&dest).to_str(),
            "example.test"
        );
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        let err = ClientContext::builder()
            .server_name("not a hostname!")
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::InvalidServerName(_)));
    }

    #[test]
    fn version_parses_from_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            version: TlsVersion,
        }
        let parsed: Wrapper = toml::from_str("version = \"tls12\"").unwrap();
        assert_eq!(parsed.version, TlsVersion::Tls12);
        assert_eq!(TlsVersion::default().to_string(), "TLSv1.3");
    }
}
