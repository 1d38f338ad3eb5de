//! SMTP session state management

use crate::smtp::error::{SmtpError, SmtpLimits};

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, PartialEq)]
pub enum SmtpState {
    /// Initial state - waiting for HELO/EHLO
    Initial,
    /// HELO/EHLO received - ready for AUTH or MAIL
    GreetingReceived,
    /// AUTH PLAIN sent without an initial response - waiting for credentials
    AuthPending,
    /// MAIL FROM received - ready for RCPT commands
    MailReceived,
    /// At least one RCPT TO received - ready for DATA or more RCPT commands
    RecipientsReceived,
    /// DATA command received - collecting message content
    DataMode,
}

/// Protocol-level state for a single SMTP connection
#[derive(Debug)]
pub struct SmtpSession {
    /// Current state of the session
    pub state: SmtpState,
    /// Sender address from MAIL FROM command
    pub from: Option<String>,
    /// Recipients accepted in the current transaction
    pub to: Vec<String>,
    /// Message content collected during DATA, CRLF line endings
    pub data: Vec<u8>,
    /// Set when the message outgrew `max_data_size`; the rest is discarded
    pub data_overflow: bool,
    /// Client domain from HELO/EHLO command
    pub client_domain: Option<String>,
    /// Whether the connection is encrypted
    pub tls: bool,
    max_recipients: usize,
    max_data_size: usize,
}

impl SmtpSession {
    pub fn new(tls: bool, max_recipients: usize, max_data_size: usize) -> Self {
        Self {
            state: SmtpState::Initial,
            from: None,
            to: Vec::new(),
            data: Vec::new(),
            data_overflow: false,
            client_domain: None,
            tls,
            max_recipients,
            max_data_size,
        }
    }

    /// Reset the session to post-HELO state (clears transaction data)
    pub fn reset(&mut self) {
        self.state = SmtpState::GreetingReceived;
        self.from = None;
        self.to.clear();
        self.data.clear();
        self.data_overflow = false;
        // Keep client_domain as it's set by HELO
    }

    /// Set the client domain from HELO/EHLO command
    pub fn set_client_domain(&mut self, domain: String) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain);
        self.reset(); // Clear any existing transaction
        Ok(())
    }

    pub fn begin_auth(&mut self) {
        self.state = SmtpState::AuthPending;
    }

    pub fn end_auth(&mut self) {
        self.state = SmtpState::GreetingReceived;
    }

    pub fn awaiting_auth_response(&self) -> bool {
        self.state == SmtpState::AuthPending
    }

    /// Set the sender address
    pub fn set_sender(&mut self, sender: String) -> Result<(), SmtpError> {
        if sender.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        self.from = Some(sender);
        self.to.clear();
        self.data.clear();
        self.state = SmtpState::MailReceived;
        Ok(())
    }

    /// Fails once the transaction holds the maximum number of recipients
    pub fn check_recipient_capacity(&self) -> Result<(), SmtpError> {
        if self.to.len() >= self.max_recipients {
            return Err(SmtpError::TooManyRecipients {
                max: self.max_recipients,
            });
        }
        Ok(())
    }

    /// Add a recipient address
    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        if recipient.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }
        self.check_recipient_capacity()?;

        self.to.push(recipient);
        self.state = SmtpState::RecipientsReceived;
        Ok(())
    }

    /// Start data collection mode
    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RecipientsReceived {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.data.clear();
        self.data_overflow = false;
        self.state = SmtpState::DataMode;
        Ok(())
    }

    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::DataMode
    }

    /// Append one already-unstuffed line of message content
    pub fn add_data_line(&mut self, line: &[u8]) {
        if self.data_overflow {
            return;
        }

        if self.data.len() + line.len() + 2 > self.max_data_size {
            self.discard_data();
            return;
        }

        self.data.extend_from_slice(line);
        self.data.extend_from_slice(b"\r\n");
    }

    /// Drop everything collected so far; the message will be refused
    pub fn discard_data(&mut self) {
        self.data_overflow = true;
        self.data = Vec::new();
    }

    /// Finish data collection and hand back the message content
    pub fn finish_data_collection(&mut self) -> Result<Vec<u8>, SmtpError> {
        if !self.in_data_mode() {
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        }

        let overflow = self.data_overflow;
        let data = std::mem::take(&mut self.data);
        self.data_overflow = false;
        self.state = SmtpState::GreetingReceived;

        if overflow {
            return Err(SmtpError::TooMuchData {
                max: self.max_data_size,
            });
        }
        Ok(data)
    }

    /// Check if the session is ready for a specific command
    pub fn can_execute_command(&self, command: &str) -> bool {
        match command.to_uppercase().as_str() {
            "EHLO" | "HELO" => true, // can be sent at any time
            "AUTH" => self.state == SmtpState::GreetingReceived,
            "MAIL" => self.state == SmtpState::GreetingReceived,
            "RCPT" => {
                self.state == SmtpState::MailReceived || self.state == SmtpState::RecipientsReceived
            }
            "DATA" => self.state == SmtpState::RecipientsReceived,
            "RSET" => self.state != SmtpState::Initial,
            "NOOP" => true,
            "QUIT" => true,
            _ => false,
        }
    }
}
