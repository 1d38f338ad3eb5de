//! # smtp2notify
//!
//! An SMTP front door for an HTTP notification API.
//!
//! Applications that can only send email submit messages over SMTP with
//! `AUTH PLAIN`. Each accepted message becomes one `POST
//! /v2/notifications/email` per recipient (envelope recipients first, then
//! `Cc`, then `Bcc`), rendered through a single configured template. Delivery
//! failures are reported back to the SMTP client in the same conversation;
//! nothing is queued or retried.
//!
//! ## Quick Start
//!
//! ```rust
//! use smtp2notify::{Config, NotifyClient, Settings};
//!
//! let settings = Settings::from_pairs([
//!     ("SMTP_USERNAME", "relay"),
//!     ("SMTP_PASSWORD", "a-long-password"),
//!     ("NOTIFY_APIKEY", format!("gcntfy-{}", "0".repeat(75)).as_str()),
//!     ("NOTIFY_TEMPLATE_ID", "00000000-0000-4000-8000-000000000000"),
//! ]);
//! let config = Config::validate(&settings).unwrap();
//! assert_eq!(config.smtp.bind_address(), "localhost:1025");
//!
//! let client = NotifyClient::new(
//!     config.notify.api_key.clone(),
//!     &config.notify.hostname,
//! )
//! .unwrap();
//! assert_eq!(
//!     client.endpoint(),
//!     "https://api.notification.canada.ca/v2/notifications/email"
//! );
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client (`EHLO` advertises `AUTH PLAIN`)
//! - `AUTH PLAIN` - Authenticate; required again after every transaction
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify a recipient (up to 10 per message)
//! - `DATA` - Send the message (up to 10 MiB)
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! ## Configuration
//!
//! Settings are read from the environment, case-insensitively:
//! `NOTIFY_APIKEY`, `NOTIFY_HOSTNAME`, `NOTIFY_TEMPLATE_ID`, `SMTP_HOSTNAME`,
//! `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_USE_TLS`,
//! `SMTP_TLS_CERT_FILE`, `SMTP_TLS_KEY_FILE` and `LOGLEVEL`.
//!
//! ## Notes
//!
//! - With `SMTP_USE_TLS` set, the port speaks TLS from the first byte
//!   (implicit TLS). `STARTTLS` is not supported.
//! - Without TLS, credentials travel in clear text. Do not run that way in
//!   production.

pub mod config;
pub mod error;
pub mod listener;
pub mod logging;
pub mod message;
pub mod notify;
pub mod session;
pub mod smtp;

pub use config::{Config, Settings};
pub use error::{DispatchError, MessageParseError, SessionError, ValidationError};
pub use listener::{Listener, ListenerError, load_tls_config};
pub use message::{MailParser, MessageParser, ParsedMessage};
pub use notify::{Attachment, Dispatcher, NotificationRequest, NotifyClient, Personalisation};
pub use session::{RelayBackend, RelaySession};
pub use smtp::{SmtpError, SmtpResponse, SmtpServer};
