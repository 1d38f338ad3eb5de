//! Error types for the relay

use crate::smtp::{SmtpResponse, ToResponse};
use thiserror::Error;

/// Startup configuration rejected. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("username must be at least three characters")]
    UsernameTooShort,

    #[error("password must be at least fourteen characters")]
    PasswordTooShort,

    #[error("API key must start with gcntfy and be at least 81 characters")]
    InvalidApiKey,

    #[error("notify template ID must be a UUIDv4")]
    InvalidTemplateId,

    #[error("TLS certificate file path must be specified")]
    MissingTlsCertFile,

    #[error("TLS key file path must be specified")]
    MissingTlsKeyFile,

    #[error("invalid value {value:?} for {key}")]
    Malformed { key: &'static str, value: String },
}

/// The submitted message could not be decoded as MIME
#[derive(Error, Debug)]
#[error("error parsing email: {0}")]
pub struct MessageParseError(#[from] pub mailparse::MailParseError);

/// Failure talking to the notification provider
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to serialize notification payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("error sending email: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status code: {status}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Errors returned from session callbacks; each aborts only the current command
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid username or password")]
    Authentication,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    MessageParse(#[from] MessageParseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ToResponse for SessionError {
    fn to_response(&self) -> SmtpResponse {
        match self {
            SessionError::Authentication => {
                SmtpResponse::new("535", "5.7.8 Authentication credentials invalid")
            }
            SessionError::NotAuthenticated => {
                SmtpResponse::new("530", "5.7.0 Authentication required")
            }
            SessionError::MessageParse(e) => SmtpResponse::new("554", &format!("5.6.0 {e}")),
            SessionError::Dispatch(DispatchError::Transport(_)) => SmtpResponse::new(
                "451",
                "4.4.1 Notification service unreachable, try again later",
            ),
            SessionError::Dispatch(e) => SmtpResponse::new("554", &format!("5.0.0 {e}")),
        }
    }
}
