use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Provider notification envelope after parsing and structural checks.
/// Never persisted; only its derived `event_id` outlives handling.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub type_: String,
    pub date_created: DateTime<Utc>,
    pub live_mode: bool,
    pub action: Option<String>,
    pub data_id: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum WebhookParseError {
    #[error("payload is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("missing or mistyped field: {0}")]
    InvalidField(&'static str),
}

impl WebhookEvent {
    pub fn parse(raw: &[u8]) -> Result<Self, WebhookParseError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|err| WebhookParseError::MalformedJson(err.to_string()))?;

        let id = scalar_id(value.get("id")).ok_or(WebhookParseError::InvalidField("id"))?;
        let type_ = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WebhookParseError::InvalidField("type"))?
            .to_string();
        let date_created = value
            .get("date_created")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .ok_or(WebhookParseError::InvalidField("date_created"))?;
        let data_id = scalar_id(value.get("data").and_then(|data| data.get("id")))
            .ok_or(WebhookParseError::InvalidField("data.id"))?;

        Ok(Self {
            id,
            type_,
            date_created,
            live_mode: value.get("live_mode").and_then(Value::as_bool).unwrap_or(true),
            action: value
                .get("action")
                .and_then(Value::as_str)
                .map(str::to_string),
            data_id,
        })
    }

    /// Idempotency key: truncated hash of the fields that identify a
    /// notification regardless of provider redelivery.
    pub fn event_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.type_.as_bytes());
        hasher.update(self.data_id.as_bytes());
        hasher.update(self.date_created.to_rfc3339().as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

// Provider payloads carry ids as either strings or bare numbers.
fn scalar_id(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

/// HMAC-SHA256 over the raw payload, hex-encoded, compared against the
/// provider's `x-signature` header.
pub fn verify_signature(payload: &[u8], secret: &str, provided: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    match hex::decode(provided) {
        Ok(decoded) => decoded[..] == expected[..],
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Vec<u8> {
        json!({
            "id": 12345,
            "type": "payment",
            "date_created": "2026-01-10T12:00:00Z",
            "live_mode": true,
            "action": "payment.created",
            "data": {"id": "pay_789"}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn parses_numeric_and_string_ids() {
        let event = WebhookEvent::parse(&sample_payload()).unwrap();
        assert_eq!(event.id, "12345");
        assert_eq!(event.type_, "payment");
        assert_eq!(event.data_id, "pay_789");
        assert!(event.live_mode);
    }

    #[test]
    fn rejects_non_json_payload() {
        let err = WebhookEvent::parse(b"not json").unwrap_err();
        assert!(matches!(err, WebhookParseError::MalformedJson(_)));
    }

    #[test]
    fn rejects_missing_data_id() {
        let payload = json!({
            "id": 1,
            "type": "payment",
            "date_created": "2026-01-10T12:00:00Z",
            "data": {}
        })
        .to_string();
        let err = WebhookEvent::parse(payload.as_bytes()).unwrap_err();
        assert_eq!(err, WebhookParseError::InvalidField("data.id"));
    }

    #[test]
    fn rejects_mistyped_date_created() {
        let payload = json!({
            "id": 1,
            "type": "payment",
            "date_created": 1736510400,
            "data": {"id": "pay_789"}
        })
        .to_string();
        let err = WebhookEvent::parse(payload.as_bytes()).unwrap_err();
        assert_eq!(err, WebhookParseError::InvalidField("date_created"));
    }

    #[test]
    fn event_id_is_stable_and_sixteen_hex_chars() {
        let first = WebhookEvent::parse(&sample_payload()).unwrap().event_id();
        let second = WebhookEvent::parse(&sample_payload()).unwrap().event_id();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_roundtrip() {
        let payload = sample_payload();
        let mut mac = HmacSha256::new_from_slice(b"shhh").unwrap();
        mac.update(&payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(&payload, "shhh", &signature));
        assert!(!verify_signature(&payload, "wrong-secret", &signature));
        assert!(!verify_signature(&payload, "shhh", "deadbeef"));
    }
}
