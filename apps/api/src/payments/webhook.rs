//! Provider webhook verification and parsing.
//!
//! Signature header format: `t=<unix seconds>,v1=<hex hmac>[,v1=...]`.
//! The signed payload is `"{t}.{raw body}"`, HMAC-SHA256 keyed by the
//! endpoint secret. Events older than the tolerance are rejected.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("signature header is malformed")]
    MalformedHeader,

    #[error("signature does not match payload")]
    SignatureMismatch,

    #[error("timestamp outside tolerance")]
    Stale,

    #[error("invalid event payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    CheckoutSessionCompleted,
    CheckoutSessionAsyncPaymentSucceeded,
    CheckoutSessionAsyncPaymentFailed,
    CheckoutSessionExpired,
    Unknown(String),
}

impl From<&str> for WebhookEventType {
    fn from(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "checkout.session.async_payment_succeeded" => Self::CheckoutSessionAsyncPaymentSucceeded,
            "checkout.session.async_payment_failed" => Self::CheckoutSessionAsyncPaymentFailed,
            "checkout.session.expired" => Self::CheckoutSessionExpired,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// The checkout session carried by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionData {
    pub session_id: String,
    pub payment_status: Option<String>,
    pub analysis_id: Option<String>,
}

impl CheckoutSessionData {
    /// Money has actually moved (or none was owed).
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid" | "no_payment_required")
        )
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: WebhookEventType,
    /// Present for checkout session events.
    pub session: Option<CheckoutSessionData>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    payment_status: Option<String>,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    analysis_id: Option<String>,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<(), WebhookError> {
        self.verify_signature_at(payload, header, Utc::now().timestamp())
    }

    /// Verifies against an explicit clock.
    pub fn verify_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<(), WebhookError> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| WebhookError::MalformedHeader)?;
        if (now - ts).abs() > self.tolerance_secs {
            warn!(timestamp = ts, now, "Webhook timestamp outside tolerance");
            return Err(WebhookError::Stale);
        }

        // `verify_slice` compares in constant time.
        let matches = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            self.mac_for(timestamp, payload)
                .map(|mac| mac.verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });
        if !matches {
            warn!("Webhook signature verification failed");
            return Err(WebhookError::SignatureMismatch);
        }
        Ok(())
    }

    fn mac_for(&self, timestamp: &str, payload: &[u8]) -> Option<Hmac<Sha256>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Some(mac)
    }

    /// Header value for `payload`, as the provider would send it.
    #[cfg(test)]
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let ts = timestamp.to_string();
        let mac = self.mac_for(&ts, payload).expect("hmac accepts any key length");
        format!("t={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
    }
}

/// Parses a verified payload.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))?;
    debug!(event_id = %raw.id, event_type = %raw.event_type, "Parsed webhook event");

    let event_type = WebhookEventType::from(raw.event_type.as_str());
    let session = match event_type {
        WebhookEventType::Unknown(_) => None,
        _ => {
            let session: RawCheckoutSession = serde_json::from_value(raw.data.object)
                .map_err(|e| WebhookError::Payload(e.to_string()))?;
            Some(CheckoutSessionData {
                session_id: session.id,
                payment_status: session.payment_status,
                analysis_id: session.metadata.analysis_id,
            })
        }
    };

    Ok(WebhookEvent {
        id: raw.id,
        event_type,
        session,
    })
}
