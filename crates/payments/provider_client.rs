use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::retry::RetryExecutor;

const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];
// Transiently truncated bodies are absorbed by re-fetching once.
const DECODE_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
pub enum ProviderApiError {
    #[error("provider request failed: {context} (status {status}): {message}")]
    Api {
        context: &'static str,
        status: u16,
        message: String,
    },
    #[error("provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
}

impl ProviderApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderApiError::Api { status, .. } => RETRYABLE_STATUSES.contains(status),
            ProviderApiError::Transport(_) => true,
            ProviderApiError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorEnvelope {
    message: Option<String>,
    error: Option<String>,
    cause: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardInfo {
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<i32>,
    pub exp_year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetails {
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    /// Carries our user id; set when the checkout was created.
    pub external_reference: Option<String>,
    pub date_approved: Option<DateTime<Utc>>,
    pub payment_method_type: Option<String>,
    pub card: Option<CardInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreapprovalDetails {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
    pub reason: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub next_payment_date: Option<DateTime<Utc>>,
}

/// Provider-hosted checkout for a new recurring-billing mandate.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutPreapproval {
    pub id: String,
    pub init_point: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub plan_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub frequency: u32,
    pub frequency_type: String,
    pub payer_email: String,
    pub back_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub user_id: Uuid,
    pub preapproval_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeOutcome {
    pub id: String,
    pub status: String,
    pub status_detail: Option<String>,
}

impl ChargeOutcome {
    pub fn is_approved(&self) -> bool {
        self.status == "approved"
    }
}

/// Recurring-payment provider client built on reqwest. Every call goes
/// through the retry executor; only the statuses in RETRYABLE_STATUSES and
/// transport errors are retried.
pub struct PaymentProviderClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    retry: RetryExecutor,
}

impl PaymentProviderClient {
    pub fn new(base_url: String, access_token: String, retry: RetryExecutor) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            retry,
        }
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentDetails, ProviderApiError> {
        self.get_json(format!("/v1/payments/{}", payment_id), "get payment")
            .await
    }

    pub async fn get_preapproval(
        &self,
        preapproval_id: &str,
    ) -> Result<PreapprovalDetails, ProviderApiError> {
        self.get_json(format!("/preapproval/{}", preapproval_id), "get preapproval")
            .await
    }

    pub async fn create_preapproval(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutPreapproval, ProviderApiError> {
        let body = json!({
            "reason": request.plan_id,
            "external_reference": request.user_id.to_string(),
            "payer_email": request.payer_email,
            "back_url": request.back_url,
            "auto_recurring": {
                "frequency": request.frequency,
                "frequency_type": request.frequency_type,
                "amount_minor": request.amount_minor,
                "currency": request.currency,
            },
        });

        self.post_json("/preapproval".to_string(), &body, "create preapproval")
            .await
    }

    pub async fn cancel_preapproval(&self, preapproval_id: &str) -> Result<(), ProviderApiError> {
        let body = json!({"status": "cancelled"});
        let _: serde_json::Value = self
            .post_json(
                format!("/preapproval/{}", preapproval_id),
                &body,
                "cancel preapproval",
            )
            .await?;
        Ok(())
    }

    /// Dunning retry charge against an existing mandate.
    pub async fn charge_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, ProviderApiError> {
        let body = json!({
            "external_reference": request.user_id.to_string(),
            "preapproval_id": request.preapproval_id,
            "amount_minor": request.amount_minor,
            "currency": request.currency,
            "description": request.reference,
        });

        self.post_json("/v1/payments".to_string(), &body, "charge payment")
            .await
    }

    pub async fn refund_payment(
        &self,
        reference: &str,
        amount_minor: i64,
    ) -> Result<(), ProviderApiError> {
        let body = json!({"amount_minor": amount_minor});
        let _: serde_json::Value = self
            .post_json(
                format!("/v1/payments/{}/refunds", reference),
                &body,
                "refund payment",
            )
            .await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: String,
        context: &'static str,
    ) -> Result<T, ProviderApiError> {
        let mut attempt: u32 = 0;
        loop {
            let body = self
                .retry
                .call_classified(
                    || self.send(reqwest::Method::GET, &path, None, context),
                    ProviderApiError::is_retryable,
                )
                .await?;

            match serde_json::from_slice::<T>(&body) {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < DECODE_ATTEMPTS => {
                    warn!(context, error = %err, "provider: response decode failed, refetching");
                    attempt += 1;
                }
                Err(err) => return Err(ProviderApiError::Decode(err.to_string())),
            }
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: String,
        body: &serde_json::Value,
        context: &'static str,
    ) -> Result<T, ProviderApiError> {
        let raw = self
            .retry
            .call_classified(
                || self.send(reqwest::Method::POST, &path, Some(body), context),
                ProviderApiError::is_retryable,
            )
            .await?;

        serde_json::from_slice::<T>(&raw).map_err(|err| ProviderApiError::Decode(err.to_string()))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
        context: &'static str,
    ) -> Result<Vec<u8>, ProviderApiError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token));

        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").json(body);
        }

        let resp = request.send().await?;
        let resp = Self::ensure_success(resp, context).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &'static str,
    ) -> Result<reqwest::Response, ProviderApiError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let message = match serde_json::from_str::<ProviderErrorEnvelope>(&body) {
            Ok(envelope) => {
                error!(
                    status = %status,
                    provider_request_id = ?request_id,
                    provider_error = ?envelope.error,
                    provider_error_cause = ?envelope.cause,
                    response_body = %body,
                    context = %context,
                    "provider api request failed"
                );
                envelope
                    .message
                    .or(envelope.error)
                    .unwrap_or_else(|| body.clone())
            }
            Err(_) => {
                error!(
                    status = %status,
                    provider_request_id = ?request_id,
                    response_body = %body,
                    context = %context,
                    "provider api request failed"
                );
                body.clone()
            }
        };

        Err(ProviderApiError::Api {
            context,
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_match_transient_failures() {
        for status in [408, 429, 500, 502, 503, 504] {
            let err = ProviderApiError::Api {
                context: "test",
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "status {} should be retryable", status);
        }
    }

    #[test]
    fn client_errors_fail_fast() {
        for status in [400, 401, 403, 404, 422] {
            let err = ProviderApiError::Api {
                context: "test",
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "status {} should be fatal", status);
        }
    }

    #[test]
    fn decode_errors_are_not_retried_by_the_outer_executor() {
        let err = ProviderApiError::Decode("eof".to_string());
        assert!(!err.is_retryable());
    }
}
