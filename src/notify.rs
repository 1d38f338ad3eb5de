//! Notification provider client
//!
//! A [`NotificationRequest`] carries the recipients collected during a
//! session. The [`Dispatcher`] fans it out as one `POST` per address, in
//! order, and stops at the first address the provider does not accept.

use crate::error::DispatchError;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{error, info};

pub const SENDING_METHOD_ATTACH: &str = "attach";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EMAIL_ENDPOINT: &str = "v2/notifications/email";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Base64 (standard alphabet, padded) file contents
    pub file: String,
    pub filename: String,
    pub sending_method: String,
}

impl Attachment {
    pub fn attach(filename: impl Into<String>, content: &[u8]) -> Self {
        Self {
            file: STANDARD.encode(content),
            filename: filename.into(),
            sending_method: SENDING_METHOD_ATTACH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Personalisation {
    pub subject: String,
    pub body: String,
}

/// One message to be delivered to every entry of `email_addresses`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRequest {
    pub template_id: String,
    /// Ordered and not deduplicated
    pub email_addresses: Vec<String>,
    pub personalisation: Personalisation,
    pub attachments: Vec<Attachment>,
}

impl NotificationRequest {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            ..Self::default()
        }
    }

    /// Request body shared by every recipient, without `email_address`.
    /// Attachments are flattened into the personalisation as `attachment_<i>`.
    pub fn payload(&self) -> Result<Map<String, Value>, DispatchError> {
        let mut personalisation = match serde_json::to_value(&self.personalisation)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (i, attachment) in self.attachments.iter().enumerate() {
            personalisation.insert(
                format!("attachment_{i}"),
                serde_json::to_value(attachment)?,
            );
        }

        let mut payload = Map::new();
        payload.insert(
            "template_id".to_string(),
            Value::String(self.template_id.clone()),
        );
        payload.insert(
            "personalisation".to_string(),
            Value::Object(personalisation),
        );
        Ok(payload)
    }
}

/// Delivers a completed request, one outbound call per address
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request: &NotificationRequest) -> Result<(), DispatchError>;
}

/// HTTP client for the notification API
pub struct NotifyClient {
    client: Client,
    api_key: SecretString,
    endpoint: String,
}

impl NotifyClient {
    pub fn new(api_key: SecretString, hostname: &str) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/{EMAIL_ENDPOINT}", hostname.trim_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, body: Vec<u8>) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("ApiKey-v1 {}", self.api_key.expose_secret()),
            )
            .body(body)
            .send()
            .inspect_err(|e| error!("Error sending email: {e}"))?;

        let status = response.status();
        if status == StatusCode::CREATED {
            return Ok(());
        }

        error!("Unexpected status code: {}", status.as_u16());
        let body = response
            .text()
            .inspect_err(|e| error!("Error reading response body: {e}"))?;
        error!("Response: {body}");

        Err(DispatchError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }
}

impl std::fmt::Debug for NotifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Dispatcher for NotifyClient {
    fn dispatch(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        let mut payload = request.payload()?;

        for address in &request.email_addresses {
            payload.insert(
                "email_address".to_string(),
                Value::String(address.clone()),
            );
            let body = serde_json::to_vec(&payload)?;

            info!("Sending email to: {address}");
            self.send(body)?;
        }

        Ok(())
    }
}
