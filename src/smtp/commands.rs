//! Implementation of SMTP commands

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::handler::{SessionHandler, ToResponse};
use crate::smtp::response::SmtpResponse;
use crate::smtp::server::ServerOptions;
use crate::smtp::session::SmtpSession;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    options: &'a ServerOptions,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(options: &'a ServerOptions) -> Self {
        Self { options }
    }

    /// Process a command line and return a response
    pub fn process_command<H: SessionHandler>(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if command_line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let parts: Vec<&str> = command_line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(SmtpError::InvalidCommand);
        }

        let cmd = parts[0].to_uppercase();

        match cmd.as_str() {
            "HELO" => self.handle_helo(parts, session, handler),
            "EHLO" => self.handle_ehlo(parts, session, handler),
            "AUTH" => self.handle_auth(parts, session, handler),
            "MAIL" => self.handle_mail(parts, session, handler),
            "RCPT" => self.handle_rcpt(parts, session, handler),
            "DATA" => self.handle_data(parts, session),
            "RSET" => self.handle_rset(session, handler),
            "NOOP" => Ok(SmtpResponse::ok()),
            "QUIT" => Ok(SmtpResponse::quit()),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    /// Process the client's answer to an empty AUTH PLAIN challenge
    pub fn process_auth_response<H: SessionHandler>(
        &self,
        line: &str,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        session.end_auth();

        let line = line.trim();
        if line == "*" {
            return Err(SmtpError::AuthCancelled);
        }
        self.complete_auth(line, handler)
    }

    fn handle_helo<H: SessionHandler>(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if parts.len() < 2 {
            return Err(SmtpError::InvalidSyntax(
                "HELO requires domain argument".to_string(),
            ));
        }

        let client_domain = parts[1].to_string();
        session.set_client_domain(client_domain.clone())?;
        handler.reset();

        Ok(SmtpResponse::helo(&self.options.domain, &client_domain))
    }

    fn handle_ehlo<H: SessionHandler>(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if parts.len() < 2 {
            return Err(SmtpError::InvalidSyntax(
                "EHLO requires domain argument".to_string(),
            ));
        }

        let client_domain = parts[1].to_string();
        session.set_client_domain(client_domain.clone())?;
        handler.reset();

        Ok(SmtpResponse::ehlo(
            &self.options.domain,
            &client_domain,
            self.capabilities(session),
        ))
    }

    /// Extensions advertised in the EHLO reply
    fn capabilities(&self, session: &SmtpSession) -> Vec<String> {
        let mut capabilities = vec![
            "PIPELINING".to_owned(),
            "8BITMIME".to_owned(),
            format!("SIZE {}", self.options.max_message_bytes),
        ];
        if self.auth_permitted(session) {
            capabilities.push("AUTH PLAIN".to_owned());
        }
        capabilities
    }

    fn auth_permitted(&self, session: &SmtpSession) -> bool {
        session.tls || self.options.allow_insecure_auth
    }

    fn handle_auth<H: SessionHandler>(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("AUTH") {
            return Err(SmtpError::InvalidState(
                "AUTH requires HELO first and is not allowed during a mail transaction"
                    .to_string(),
            ));
        }

        if !self.auth_permitted(session) {
            return Err(SmtpError::EncryptionRequired);
        }

        let Some(mechanism) = parts.get(1) else {
            return Err(SmtpError::InvalidSyntax(
                "AUTH requires a mechanism".to_string(),
            ));
        };
        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return Err(SmtpError::UnsupportedMechanism(mechanism.to_string()));
        }

        match parts.get(2) {
            Some(initial_response) => self.complete_auth(initial_response, handler),
            None => {
                session.begin_auth();
                Ok(SmtpResponse::auth_challenge())
            }
        }
    }

    fn complete_auth<H: SessionHandler>(
        &self,
        encoded: &str,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        let (username, password) = decode_plain(encoded)?;
        handler.auth_plain(&username, &password).map_err(reject)?;
        Ok(SmtpResponse::auth_success())
    }

    fn handle_mail<H: SessionHandler>(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("MAIL") {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }

        // An empty reverse-path (`MAIL FROM:<>`) is legal
        let addr = parse_path(&parts, "FROM:", "MAIL")?;
        if !addr.is_empty() {
            self.validate_email_address(&addr)?;
        }

        handler.mail(&addr).map_err(reject)?;
        session.set_sender(addr)?;

        Ok(SmtpResponse::ok())
    }

    fn handle_rcpt<H: SessionHandler>(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RCPT") {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        session.check_recipient_capacity()?;

        let addr = parse_path(&parts, "TO:", "RCPT")?;
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "recipient address cannot be empty".to_string(),
            ));
        }
        self.validate_email_address(&addr)?;

        handler.rcpt(&addr).map_err(reject)?;
        session.add_recipient(addr)?;

        Ok(SmtpResponse::ok())
    }

    fn handle_data(
        &self,
        parts: Vec<&str>,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("DATA") {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        if parts.len() > 1 {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        session.start_data_mode()?;

        Ok(SmtpResponse::data_start())
    }

    fn handle_rset<H: SessionHandler>(
        &self,
        session: &mut SmtpSession,
        handler: &mut H,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RSET") {
            return Err(SmtpError::InvalidState(
                "RSET command requires HELO first".to_string(),
            ));
        }

        session.reset();
        handler.reset();
        Ok(SmtpResponse::ok())
    }

    /// Validate email address format and size limits
    fn validate_email_address(&self, addr: &str) -> Result<(), SmtpError> {
        let Some((user_part, domain_part)) = addr.rsplit_once('@') else {
            return Err(SmtpError::InvalidSyntax(
                "Email address must contain @ symbol".to_string(),
            ));
        };

        if user_part.len() > SmtpLimits::USER_MAX_LENGTH {
            return Err(SmtpError::UserTooLong {
                max: SmtpLimits::USER_MAX_LENGTH,
            });
        }

        if domain_part.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        if user_part.is_empty() || domain_part.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "Invalid email address format".to_string(),
            ));
        }

        Ok(())
    }
}

fn reject<E: ToResponse + std::fmt::Display>(err: E) -> SmtpError {
    debug!(error = %err, "command rejected by session");
    SmtpError::Rejected(err.to_response())
}

/// Extract `<address>` from `MAIL FROM:<address> [params]` style arguments.
/// ESMTP parameters after the closing bracket are accepted and ignored.
/// `<>` yields an empty address; callers decide whether that is allowed.
fn parse_path(parts: &[&str], prefix: &str, command: &str) -> Result<String, SmtpError> {
    if parts.len() < 2 {
        return Err(SmtpError::InvalidSyntax(format!(
            "{command} requires {} argument",
            prefix.trim_end_matches(':')
        )));
    }

    let argument = parts[1..].join(" ");
    let has_prefix = argument
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
    if !has_prefix {
        return Err(SmtpError::InvalidSyntax(format!(
            "{command} command must be '{command} {prefix}<address>'"
        )));
    }

    let path = argument[prefix.len()..].trim_start();
    let Some(end) = path.find('>').filter(|_| path.starts_with('<')) else {
        return Err(SmtpError::InvalidSyntax(
            "address must be enclosed in angle brackets".to_string(),
        ));
    };

    let addr = &path[1..end];
    if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    let params = path[end + 1..].trim();
    if !params.is_empty() {
        debug!(%params, "ignoring ESMTP parameters");
    }

    Ok(addr.to_string())
}

/// Decode a SASL PLAIN response: base64 of `authzid NUL authcid NUL passwd`.
fn decode_plain(encoded: &str) -> Result<(String, String), SmtpError> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|_| SmtpError::InvalidAuthResponse)?;

    let fields: Vec<&[u8]> = raw.split(|byte| *byte == 0).collect();
    let [identity, username, password] = fields.as_slice() else {
        return Err(SmtpError::InvalidAuthResponse);
    };

    let identity = std::str::from_utf8(identity).map_err(|_| SmtpError::InvalidAuthResponse)?;
    let username = std::str::from_utf8(username).map_err(|_| SmtpError::InvalidAuthResponse)?;
    let password = std::str::from_utf8(password).map_err(|_| SmtpError::InvalidAuthResponse)?;

    if !identity.is_empty() && identity != username {
        warn!("rejecting AUTH PLAIN with a distinct authorization identity");
        return Err(SmtpError::InvalidAuthResponse);
    }

    Ok((username.to_string(), password.to_string()))
}
