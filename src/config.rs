//! Startup configuration
//!
//! Settings come from environment-style key/value pairs with case-insensitive
//! names. [`Config::validate`] either produces a complete, immutable [`Config`]
//! or reports the first rule it violates, in this order: username, password,
//! API key, template id, TLS certificate path, TLS key path.

use crate::error::ValidationError;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const API_KEY_PREFIX: &str = "gcntfy";
pub const API_KEY_MIN_LENGTH: usize = 81;
pub const USERNAME_MIN_LENGTH: usize = 3;
pub const PASSWORD_MIN_LENGTH: usize = 14;

pub const DEFAULT_NOTIFY_HOSTNAME: &str = "https://api.notification.canada.ca";
pub const DEFAULT_SMTP_HOSTNAME: &str = "localhost";
pub const DEFAULT_SMTP_PORT: u16 = 1025;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Recognised setting names, as they appear in the environment
pub mod keys {
    pub const NOTIFY_API_KEY: &str = "NOTIFY_APIKEY";
    pub const NOTIFY_HOSTNAME: &str = "NOTIFY_HOSTNAME";
    pub const NOTIFY_TEMPLATE_ID: &str = "NOTIFY_TEMPLATE_ID";
    pub const SMTP_HOSTNAME: &str = "SMTP_HOSTNAME";
    pub const SMTP_PORT: &str = "SMTP_PORT";
    pub const SMTP_USERNAME: &str = "SMTP_USERNAME";
    pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
    pub const SMTP_USE_TLS: &str = "SMTP_USE_TLS";
    pub const SMTP_TLS_CERT_FILE: &str = "SMTP_TLS_CERT_FILE";
    pub const SMTP_TLS_KEY_FILE: &str = "SMTP_TLS_KEY_FILE";
    pub const LOG_LEVEL: &str = "LOGLEVEL";
}

static TEMPLATE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-4[0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
    )
    .expect("template id pattern compiles")
});

/// Raw, unvalidated settings. Lookups ignore key case.
#[derive(Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    /// Snapshot of the process environment
    pub fn from_env() -> Self {
        Self::from_os_pairs(std::env::vars_os())
    }

    /// Entries whose name is not UTF-8 are skipped; values are converted lossily
    pub fn from_os_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self::from_pairs(pairs.into_iter().filter_map(|(key, value)| {
            let key = key.into_string().ok()?;
            Some((key, value.to_string_lossy().into_owned()))
        }))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(key, value)| (key.as_ref().to_ascii_lowercase(), value.into()))
            .collect();
        Self { values }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn port(&self) -> Result<u16, ValidationError> {
        match self.get(keys::SMTP_PORT) {
            None => Ok(DEFAULT_SMTP_PORT),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ValidationError::Malformed {
                    key: keys::SMTP_PORT,
                    value: value.to_string(),
                }),
        }
    }

    fn flag(&self, key: &'static str) -> Result<bool, ValidationError> {
        let Some(value) = self.get(key) else {
            return Ok(false);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" => Ok(true),
            "0" | "f" | "false" | "no" | "" => Ok(false),
            _ => Err(ValidationError::Malformed {
                key,
                value: value.to_string(),
            }),
        }
    }

    /// Log filter directive, defaulting to `info`
    pub fn log_level(&self) -> String {
        self.string_or(keys::LOG_LEVEL, DEFAULT_LOG_LEVEL)
    }
}

/// Notification provider settings
#[derive(Debug)]
pub struct NotifyConfig {
    pub api_key: SecretString,
    pub hostname: String,
    pub template_id: String,
}

/// Certificate and key used when TLS is mandatory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Listener settings
#[derive(Debug)]
pub struct SmtpConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Present only when TLS is mandatory
    pub tls: Option<TlsFiles>,
}

impl SmtpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Validated configuration, shared read-only by every session
#[derive(Debug)]
pub struct Config {
    pub notify: NotifyConfig,
    pub smtp: SmtpConfig,
    pub log_level: String,
}

impl Config {
    /// Load and validate settings from the process environment
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::validate(&Settings::from_env())
    }

    pub fn validate(settings: &Settings) -> Result<Self, ValidationError> {
        let port = settings.port()?;
        let use_tls = settings.flag(keys::SMTP_USE_TLS)?;

        let username = settings.string_or(keys::SMTP_USERNAME, "");
        let password = settings.string_or(keys::SMTP_PASSWORD, "");
        let api_key = settings.string_or(keys::NOTIFY_API_KEY, "");
        let template_id = settings.string_or(keys::NOTIFY_TEMPLATE_ID, "");
        let cert_file = settings.string_or(keys::SMTP_TLS_CERT_FILE, "");
        let key_file = settings.string_or(keys::SMTP_TLS_KEY_FILE, "");

        if username.len() < USERNAME_MIN_LENGTH {
            return Err(ValidationError::UsernameTooShort);
        }

        if password.len() < PASSWORD_MIN_LENGTH {
            return Err(ValidationError::PasswordTooShort);
        }

        if api_key.len() < API_KEY_MIN_LENGTH || !api_key.starts_with(API_KEY_PREFIX) {
            return Err(ValidationError::InvalidApiKey);
        }

        if !TEMPLATE_ID_PATTERN.is_match(&template_id) {
            return Err(ValidationError::InvalidTemplateId);
        }

        let tls = if use_tls {
            if cert_file.is_empty() {
                return Err(ValidationError::MissingTlsCertFile);
            }
            if key_file.is_empty() {
                return Err(ValidationError::MissingTlsKeyFile);
            }
            Some(TlsFiles {
                cert_file: PathBuf::from(cert_file),
                key_file: PathBuf::from(key_file),
            })
        } else {
            None
        };

        Ok(Self {
            notify: NotifyConfig {
                api_key: SecretString::new(api_key),
                hostname: settings.string_or(keys::NOTIFY_HOSTNAME, DEFAULT_NOTIFY_HOSTNAME),
                template_id,
            },
            smtp: SmtpConfig {
                hostname: settings.string_or(keys::SMTP_HOSTNAME, DEFAULT_SMTP_HOSTNAME),
                port,
                username,
                password: SecretString::new(password),
                tls,
            },
            log_level: settings.log_level(),
        })
    }
}

impl SmtpConfig {
    /// Exact, case-sensitive comparison against the configured credentials
    pub fn credentials_match(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password.expose_secret().as_str()
    }
}
