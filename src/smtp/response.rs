//! SMTP response handling

use std::fmt;

/// Represents an SMTP response that can be sent to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "530")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Optional continuation lines (EHLO capabilities)
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    /// Create a new multiline SMTP response
    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    pub fn ok() -> Self {
        Self::new("250", "2.0.0 OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", &format!("{hostname} ESMTP smtp2notify"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{hostname} Hello {client_domain}"))
    }

    /// EHLO reply listing the extensions offered on this connection
    pub fn ehlo(hostname: &str, client_domain: &str, capabilities: Vec<String>) -> Self {
        Self::new_multiline(
            "250",
            &format!("{hostname} Hello {client_domain}"),
            capabilities,
        )
    }

    /// Empty AUTH challenge asking for the PLAIN initial response
    pub fn auth_challenge() -> Self {
        Self::new("334", "")
    }

    pub fn auth_success() -> Self {
        Self::new("235", "2.7.0 Authentication successful")
    }

    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit() -> Self {
        Self::new("221", "2.0.0 Bye")
    }

    /// Create an error response from an error
    pub fn error(code: &str, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        if let Some(ref lines) = self.multiline {
            if lines.is_empty() {
                return format!("{} {}\r\n", self.code, self.message);
            }
            let mut result = format!("{}-{}\r\n", self.code, self.message);
            for (i, line) in lines.iter().enumerate() {
                if i == lines.len() - 1 {
                    // Last line uses space instead of dash
                    result.push_str(&format!("{} {}\r\n", self.code, line));
                } else {
                    result.push_str(&format!("{}-{}\r\n", self.code, line));
                }
            }
            result
        } else {
            format!("{} {}\r\n", self.code, self.message)
        }
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}
