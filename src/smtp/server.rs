//! SMTP server implementation

use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::handler::{ConnectionInfo, SessionFactory, SessionHandler, ToResponse};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;
use crate::smtp::transport::Transport;

use rustls::ServerConfig;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables applied to every connection
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Name announced in the greeting and HELO/EHLO replies
    pub domain: String,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub max_message_bytes: usize,
    pub max_recipients: usize,
    /// Permit AUTH over connections that are not encrypted
    pub allow_insecure_auth: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            read_timeout: Some(Duration::from_secs(10)),
            write_timeout: Some(Duration::from_secs(10)),
            max_message_bytes: 10 * 1024 * 1024,
            max_recipients: 10,
            allow_insecure_auth: false,
        }
    }
}

/// SMTP server that hands every connection to a handler built by `F`
pub struct SmtpServer<F: SessionFactory> {
    options: Arc<ServerOptions>,
    factory: Arc<F>,
    tls: Option<Arc<ServerConfig>>,
}

impl<F: SessionFactory> SmtpServer<F> {
    pub fn new(options: ServerOptions, factory: F) -> Self {
        Self {
            options: Arc::new(options),
            factory: Arc::new(factory),
            tls: None,
        }
    }

    /// Accept every connection over TLS using `config`
    pub fn with_tls(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Bind to `addr` and serve connections (blocking)
    pub fn start(&self, addr: &str) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener)
    }

    /// Serve connections from an existing listener (blocking).
    /// Each connection runs on its own thread.
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<(), SmtpError> {
        info!("SMTP server listening on {}", listener.local_addr()?);

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let connection = Connection {
                        options: Arc::clone(&self.options),
                        factory: Arc::clone(&self.factory),
                        tls: self.tls.clone(),
                    };
                    thread::spawn(move || {
                        if let Err(e) = connection.handle_client(stream) {
                            warn!("Error handling client: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }
}

/// Everything one connection thread needs
struct Connection<F: SessionFactory> {
    options: Arc<ServerOptions>,
    factory: Arc<F>,
    tls: Option<Arc<ServerConfig>>,
}

impl<F: SessionFactory> Connection<F> {
    fn handle_client(&self, stream: TcpStream) -> Result<(), SmtpError> {
        stream.set_read_timeout(self.options.read_timeout)?;
        stream.set_write_timeout(self.options.write_timeout)?;

        let peer_addr = stream.peer_addr().ok();
        let transport = Transport::accept(stream, self.tls.as_ref())?;
        let info = ConnectionInfo {
            peer_addr,
            tls: transport.is_tls(),
        };
        debug!(peer = ?info.peer_addr, tls = info.tls, "connection accepted");

        let mut handler = self.factory.new_session(&info);
        let mut session = SmtpSession::new(
            info.tls,
            self.options.max_recipients,
            self.options.max_message_bytes,
        );

        let mut conn = BufReader::new(transport);
        let result = self.converse(&mut conn, &mut session, &mut handler);
        handler.logout();

        debug!(peer = ?info.peer_addr, "connection closed");
        result
    }

    fn converse(
        &self,
        conn: &mut BufReader<Transport>,
        session: &mut SmtpSession,
        handler: &mut F::Handler,
    ) -> Result<(), SmtpError> {
        let command_handler = SmtpCommandHandler::new(&self.options);

        send_response(conn.get_mut(), &SmtpResponse::greeting(&self.options.domain))?;

        let mut line_buffer = Vec::new();
        loop {
            line_buffer.clear();

            let limit = if session.in_data_mode() {
                self.options.max_message_bytes
            } else {
                SmtpLimits::COMMAND_LINE_MAX_LENGTH
            };

            match read_line(conn, &mut line_buffer, limit) {
                Ok(LineRead::Closed) => break,
                Ok(LineRead::Complete) => {}
                Ok(LineRead::TooLong) => {
                    if session.in_data_mode() {
                        // Answered with 552 once the terminating dot arrives
                        session.discard_data();
                    } else {
                        let err = SmtpError::LineTooLong {
                            max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                        };
                        debug!(error = %err, "command line discarded");
                        send_response(conn.get_mut(), &err.to_response())?;
                    }
                    continue;
                }
                Err(e) if is_timeout(&e) => {
                    debug!("client idle too long, closing connection");
                    let response = SmtpResponse::error("421", "4.4.2 Idle timeout, bye bye");
                    // The peer may already be gone.
                    let _ = send_response(conn.get_mut(), &response);
                    break;
                }
                Err(e) => {
                    warn!("Error reading from client: {e}");
                    break;
                }
            }

            let raw = strip_line_ending(&line_buffer);

            if session.in_data_mode() {
                if let Some(response) = self.handle_data_line(raw, session, handler) {
                    send_response(conn.get_mut(), &response)?;
                }
                continue;
            }

            let line = String::from_utf8_lossy(raw);
            let command = line.trim();

            let result = if session.awaiting_auth_response() {
                command_handler.process_auth_response(command, session, handler)
            } else if command.is_empty() {
                continue;
            } else {
                command_handler.process_command(command, session, handler)
            };

            match result {
                Ok(response) => {
                    send_response(conn.get_mut(), &response)?;
                    if response.code == "221" {
                        break; // QUIT command
                    }
                }
                Err(e) => {
                    debug!(error = %e, "command failed");
                    send_response(conn.get_mut(), &e.to_response())?;
                }
            }
        }

        Ok(())
    }

    /// Handle a line of data during DATA mode; returns the final reply once
    /// the terminating dot arrives.
    fn handle_data_line(
        &self,
        line: &[u8],
        session: &mut SmtpSession,
        handler: &mut F::Handler,
    ) -> Option<SmtpResponse> {
        if line == b"." {
            let response = match session.finish_data_collection() {
                Ok(message) => match handler.data(&message) {
                    Ok(()) => SmtpResponse::ok(),
                    Err(e) => {
                        warn!(error = %e, "message not relayed");
                        e.to_response()
                    }
                },
                Err(e) => {
                    warn!(error = %e, "message discarded");
                    e.to_response()
                }
            };
            session.reset();
            handler.reset();
            return Some(response);
        }

        // Transparency: a leading dot was doubled by the client.
        let line = line.strip_prefix(b".").unwrap_or(line);
        session.add_data_line(line);
        None
    }
}

enum LineRead {
    Complete,
    /// Longer than the limit; the remainder was read and dropped
    TooLong,
    Closed,
}

/// Read one line of at most `limit` bytes plus CRLF into `buf`. Anything
/// beyond that is consumed up to the next newline without being stored.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<LineRead> {
    let max = limit as u64 + 2;
    let read = reader.by_ref().take(max).read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(LineRead::Closed);
    }
    if buf.ends_with(b"\n") || (read as u64) < max {
        return Ok(LineRead::Complete);
    }

    buf.clear();
    discard_line(reader)?;
    Ok(LineRead::TooLong)
}

fn discard_line<R: BufRead>(reader: &mut R) -> io::Result<()> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Send a response to the client
fn send_response<W: Write>(stream: &mut W, response: &SmtpResponse) -> Result<(), SmtpError> {
    let formatted = response.format();
    if response.multiline.is_none() && formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
        let truncated_response = SmtpResponse::new(&response.code, "Response too long (truncated)");
        stream.write_all(truncated_response.format().as_bytes())?;
    } else {
        stream.write_all(formatted.as_bytes())?;
    }
    stream.flush()?;
    Ok(())
}
