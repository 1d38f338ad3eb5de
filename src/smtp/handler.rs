//! Callback contract between the SMTP engine and the application

use crate::smtp::response::SmtpResponse;
use std::net::SocketAddr;

/// What the engine knows about a freshly accepted connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_addr: Option<SocketAddr>,
    /// True when the connection was accepted over TLS
    pub tls: bool,
}

/// Converts an application error into the reply sent to the client
pub trait ToResponse {
    fn to_response(&self) -> SmtpResponse;
}

/// Per-connection callbacks, invoked one at a time in protocol order.
pub trait SessionHandler: Send {
    type Error: std::error::Error + ToResponse;

    /// AUTH PLAIN with decoded credentials
    fn auth_plain(&mut self, username: &str, password: &str) -> Result<(), Self::Error>;

    /// MAIL FROM
    fn mail(&mut self, from: &str) -> Result<(), Self::Error>;

    /// RCPT TO
    fn rcpt(&mut self, to: &str) -> Result<(), Self::Error>;

    /// Complete message as received after DATA, dot-unstuffed, CRLF line endings
    fn data(&mut self, message: &[u8]) -> Result<(), Self::Error>;

    /// Called on RSET, HELO/EHLO and after every DATA
    fn reset(&mut self);

    /// Called once when the connection ends
    fn logout(&mut self);
}

/// Creates one handler per accepted connection
pub trait SessionFactory: Send + Sync + 'static {
    type Handler: SessionHandler;

    fn new_session(&self, info: &ConnectionInfo) -> Self::Handler;
}
