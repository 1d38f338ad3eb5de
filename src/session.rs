//! Relay session: authentication, envelope accumulation and dispatch

use crate::config::Config;
use crate::error::SessionError;
use crate::message::MessageParser;
use crate::notify::{Attachment, Dispatcher, NotificationRequest};
use crate::smtp::{ConnectionInfo, SessionFactory, SessionHandler};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Hands out a [`RelaySession`] for every accepted connection
#[derive(Clone)]
pub struct RelayBackend {
    config: Arc<Config>,
    dispatcher: Arc<dyn Dispatcher>,
    parser: Arc<dyn MessageParser>,
}

impl RelayBackend {
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<dyn Dispatcher>,
        parser: Arc<dyn MessageParser>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            parser,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl SessionFactory for RelayBackend {
    type Handler = RelaySession;

    fn new_session(&self, info: &ConnectionInfo) -> RelaySession {
        debug!(peer = ?info.peer_addr, tls = info.tls, "new session");
        RelaySession::new(
            Arc::clone(&self.config),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.parser),
        )
    }
}

/// State of one SMTP conversation
pub struct RelaySession {
    config: Arc<Config>,
    dispatcher: Arc<dyn Dispatcher>,
    parser: Arc<dyn MessageParser>,
    authenticated: bool,
    pending: NotificationRequest,
}

impl RelaySession {
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<dyn Dispatcher>,
        parser: Arc<dyn MessageParser>,
    ) -> Self {
        let pending = NotificationRequest::new(config.notify.template_id.clone());
        Self {
            config,
            dispatcher,
            parser,
            authenticated: false,
            pending,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Request being accumulated for the current transaction
    pub fn pending(&self) -> &NotificationRequest {
        &self.pending
    }

    fn require_auth(&mut self) -> Result<(), SessionError> {
        if self.authenticated {
            return Ok(());
        }
        self.logout();
        Err(SessionError::NotAuthenticated)
    }
}

impl SessionHandler for RelaySession {
    type Error = SessionError;

    fn auth_plain(&mut self, username: &str, password: &str) -> Result<(), SessionError> {
        if !self.config.smtp.credentials_match(username, password) {
            warn!("Invalid username or password");
            self.authenticated = false;
            self.logout();
            return Err(SessionError::Authentication);
        }

        self.authenticated = true;
        Ok(())
    }

    fn mail(&mut self, from: &str) -> Result<(), SessionError> {
        self.require_auth()?;
        info!("Mail from: {from}");
        Ok(())
    }

    fn rcpt(&mut self, to: &str) -> Result<(), SessionError> {
        self.require_auth()?;
        info!("Rcpt to: {to}");
        self.pending.email_addresses.push(to.to_string());
        Ok(())
    }

    fn data(&mut self, message: &[u8]) -> Result<(), SessionError> {
        // Unlike mail and rcpt, an unauthenticated DATA does not force a logout.
        if !self.authenticated {
            return Err(SessionError::NotAuthenticated);
        }

        let parsed = self
            .parser
            .parse(message)
            .inspect_err(|e| error!("Error parsing email: {e}"))?;

        self.pending.email_addresses.extend(parsed.cc);
        self.pending.email_addresses.extend(parsed.bcc);
        self.pending.personalisation.subject = parsed.subject;
        self.pending.personalisation.body = parsed.text_body;
        self.pending.attachments.extend(
            parsed
                .attachments
                .iter()
                .map(|a| Attachment::attach(a.filename.clone(), &a.content)),
        );

        self.dispatcher.dispatch(&self.pending)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.authenticated = false;
        self.pending = NotificationRequest::new(self.config.notify.template_id.clone());
    }

    fn logout(&mut self) {
        self.authenticated = false;
    }
}
