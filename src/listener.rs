//! Listener bootstrap: wires relay sessions to the SMTP engine

use crate::config::{Config, TlsFiles};
use crate::message::MailParser;
use crate::notify::Dispatcher;
use crate::session::RelayBackend;
use crate::smtp::{ServerOptions, SmtpError, SmtpServer};

use rustls::ServerConfig;
use rustls::pki_types::pem::{self, PemObject};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_RECIPIENTS: usize = 10;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("failed to read certificates from {}: {source}", path.display())]
    Certificate { path: PathBuf, source: pem::Error },

    #[error("failed to read private key from {}: {source}", path.display())]
    PrivateKey { path: PathBuf, source: pem::Error },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Smtp(#[from] SmtpError),
}

/// Build a server TLS configuration from PEM encoded certificate chain and key
pub fn load_tls_config(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>, ListenerError> {
    let certificates = CertificateDer::pem_file_iter(cert_file)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|source| ListenerError::Certificate {
            path: cert_file.to_path_buf(),
            source,
        })?;
    if certificates.is_empty() {
        return Err(ListenerError::NoCertificates(cert_file.to_path_buf()));
    }

    let private_key =
        PrivateKeyDer::from_pem_file(key_file).map_err(|source| ListenerError::PrivateKey {
            path: key_file.to_path_buf(),
            source,
        })?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certificates, private_key)?;

    Ok(Arc::new(config))
}

/// The SMTP listener for the relay, plaintext or TLS-mandatory
pub struct Listener {
    server: SmtpServer<RelayBackend>,
    bind_address: String,
}

impl Listener {
    /// Decides the TLS mode once. Certificates are loaded here so that a bad
    /// path stops startup before any port is bound.
    pub fn new(config: Arc<Config>, dispatcher: Arc<dyn Dispatcher>) -> Result<Self, ListenerError> {
        let tls = config
            .smtp
            .tls
            .as_ref()
            .map(|TlsFiles { cert_file, key_file }| load_tls_config(cert_file, key_file))
            .transpose()?;

        let options = ServerOptions {
            domain: config.smtp.hostname.clone(),
            read_timeout: Some(IO_TIMEOUT),
            write_timeout: Some(IO_TIMEOUT),
            max_message_bytes: MAX_MESSAGE_BYTES,
            max_recipients: MAX_RECIPIENTS,
            allow_insecure_auth: tls.is_none(),
        };

        let bind_address = config.smtp.bind_address();
        let backend = RelayBackend::new(config, dispatcher, Arc::new(MailParser));
        let mut server = SmtpServer::new(options, backend);

        match tls {
            Some(tls) => {
                info!("SMTP server will require TLS on {bind_address}");
                server = server.with_tls(tls);
            }
            None => warn!("SMTP server listening without TLS! DO NOT USE IN PRODUCTION!"),
        }

        Ok(Self {
            server,
            bind_address,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.server.is_tls()
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Bind the configured address and serve forever
    pub fn run(&self) -> Result<(), ListenerError> {
        info!("Starting SMTP server on {}", self.bind_address);
        self.server.start(&self.bind_address)?;
        Ok(())
    }

    /// Serve on an already bound socket
    pub fn serve(&self, listener: TcpListener) -> Result<(), ListenerError> {
        self.server.start_with_listener(listener)?;
        Ok(())
    }
}
