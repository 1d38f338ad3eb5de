//! Error types for the SMTP engine

use crate::smtp::response::SmtpResponse;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Invalid state for command: {0}")]
    InvalidState(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },

    #[error("Unsupported authentication mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("Malformed AUTH PLAIN response")]
    InvalidAuthResponse,

    #[error("Authentication cancelled")]
    AuthCancelled,

    #[error("Encryption required for authentication")]
    EncryptionRequired,

    /// The session handler refused the command.
    #[error("Rejected by session: {0}")]
    Rejected(SmtpResponse),
}

/// SMTP size limits as defined in RFC 5321
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a user name
    pub const USER_MAX_LENGTH: usize = 64;

    /// Maximum length of a domain name
    pub const DOMAIN_MAX_LENGTH: usize = 255;

    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;
}

/// Maps SMTP errors to appropriate response codes
impl SmtpError {
    pub fn to_response_code(&self) -> &str {
        match self {
            SmtpError::Io(_) => "421",
            SmtpError::Tls(_) => "421",
            SmtpError::InvalidCommand => "500",
            SmtpError::InvalidState(_) => "503",
            SmtpError::InvalidSyntax(_) => "501",
            SmtpError::LineTooLong { .. } => "500",
            SmtpError::PathTooLong { .. } => "501",
            SmtpError::TooManyRecipients { .. } => "452",
            SmtpError::TooMuchData { .. } => "552",
            SmtpError::DomainTooLong { .. } => "501",
            SmtpError::UserTooLong { .. } => "501",
            SmtpError::UnsupportedMechanism(_) => "504",
            SmtpError::InvalidAuthResponse => "501",
            SmtpError::AuthCancelled => "501",
            SmtpError::EncryptionRequired => "538",
            SmtpError::Rejected(response) => &response.code,
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) | SmtpError::Tls(_) => "4.3.0 Service not available".to_string(),
            SmtpError::InvalidCommand => "5.5.2 Syntax error, command unrecognized".to_string(),
            SmtpError::InvalidState(msg) => format!("5.5.1 Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("5.5.4 Syntax error: {msg}"),
            SmtpError::LineTooLong { max } => format!("5.5.2 Line too long (max {max} characters)"),
            SmtpError::PathTooLong { max } => format!("5.1.3 Path too long (max {max} characters)"),
            SmtpError::TooManyRecipients { max } => {
                format!("4.5.3 Maximum limit of {max} recipients reached")
            }
            SmtpError::TooMuchData { max } => {
                format!("5.3.4 Max message size exceeded (max {max} bytes)")
            }
            SmtpError::DomainTooLong { max } => {
                format!("5.1.2 Domain name too long (max {max} characters)")
            }
            SmtpError::UserTooLong { max } => {
                format!("5.1.3 User name too long (max {max} characters)")
            }
            SmtpError::UnsupportedMechanism(_) => {
                "5.5.4 Unrecognized authentication type".to_string()
            }
            SmtpError::InvalidAuthResponse => "5.5.2 Invalid AUTH PLAIN response".to_string(),
            SmtpError::AuthCancelled => "5.0.0 Authentication cancelled".to_string(),
            SmtpError::EncryptionRequired => {
                "5.7.11 Encryption required for requested authentication mechanism".to_string()
            }
            SmtpError::Rejected(response) => response.message.clone(),
        }
    }

    /// Build the reply sent to the client for this error
    pub fn to_response(&self) -> SmtpResponse {
        SmtpResponse::error(self.to_response_code(), &self.to_response_message())
    }
}
