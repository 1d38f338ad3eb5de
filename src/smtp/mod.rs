//! SMTP protocol engine

pub mod commands;
pub mod error;
pub mod handler;
pub mod response;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{SmtpError, SmtpLimits};
pub use handler::{ConnectionInfo, SessionFactory, SessionHandler, ToResponse};
pub use response::SmtpResponse;
pub use server::{ServerOptions, SmtpServer};
pub use session::{SmtpSession, SmtpState};
