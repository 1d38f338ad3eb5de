//! Plain or TLS byte stream underneath a connection

use crate::smtp::error::SmtpError;
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

pub enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Transport {
    /// Wrap an accepted socket, starting a server-side TLS session when a
    /// config is supplied. The handshake completes on first read or write.
    pub fn accept(stream: TcpStream, tls: Option<&Arc<ServerConfig>>) -> Result<Self, SmtpError> {
        match tls {
            Some(config) => {
                let connection = ServerConnection::new(Arc::clone(config))?;
                Ok(Transport::Tls(Box::new(StreamOwned::new(connection, stream))))
            }
            None => Ok(Transport::Plain(stream)),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}
