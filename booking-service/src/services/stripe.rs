//! Stripe payment processor client.
//!
//! Talks to the PaymentIntents and PaymentMethods REST endpoints with
//! form-encoded requests and a bearer secret key.

use crate::config::StripeConfig;
use crate::services::gateway::{
    CreatedIntent, PaymentMethodSnapshot, PaymentProcessor, ProcessorError, RetrievedIntent,
    PAYMENT_INTENT_OBJECT,
};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Stripe API error response.
#[derive(Debug, Deserialize)]
pub struct StripeError {
    pub error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct StripeErrorDetail {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub decline_code: Option<String>,
    pub param: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Stripe is configured (secret key is set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn ensure_configured(&self) -> Result<(), ProcessorError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ProcessorError::NotConfigured)
        }
    }

    /// Resource URL below the API base. Each segment is percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Result<Url, ProcessorError> {
        let mut url = Url::parse(&self.config.api_base_url)
            .map_err(|e| ProcessorError::InvalidBaseUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ProcessorError::InvalidBaseUrl(self.config.api_base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Stripe object ids are `prefix_` plus alphanumerics; anything else never reaches a URL.
    fn object_id(id: &str) -> Result<&str, ProcessorError> {
        let valid = !id.is_empty()
            && id.len() <= 255
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(id)
        } else {
            Err(ProcessorError::InvalidId(id.to_string()))
        }
    }

    /// Form fields for intent creation.
    fn create_intent_form(
        amount_minor: i64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut form = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        form.extend(
            metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{}]", key), value.clone())),
        );
        form
    }

    async fn parse<T: DeserializeOwned>(
        response: Response,
        operation: &str,
    ) -> Result<T, ProcessorError> {
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, operation, "Stripe response received");

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let detail = serde_json::from_str::<StripeError>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| StripeErrorDetail {
                error_type: None,
                code: None,
                message: Some(body.clone()),
                decline_code: None,
                param: None,
            });

        tracing::error!(
            status = %status,
            operation,
            error_type = ?detail.error_type,
            code = ?detail.code,
            decline_code = ?detail.decline_code,
            param = ?detail.param,
            message = ?detail.message,
            "Stripe request failed"
        );

        Err(ProcessorError::Api {
            status: status.as_u16(),
            code: detail
                .code
                .or(detail.error_type)
                .unwrap_or_else(|| "unknown".to_string()),
            message: detail.message.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<CreatedIntent, ProcessorError> {
        self.ensure_configured()?;

        let response = self
            .client
            .post(self.url(&["payment_intents"])?)
            .bearer_auth(self.config.secret_key.expose_secret())
            .form(&Self::create_intent_form(amount_minor, currency, metadata))
            .send()
            .await?;

        let intent: CreatedIntent = Self::parse(response, "create_payment_intent").await?;
        tracing::info!(
            payment_intent_id = %intent.id,
            amount_minor,
            currency = %currency,
            status = %intent.status,
            "Stripe payment intent created"
        );
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<RetrievedIntent, ProcessorError> {
        self.ensure_configured()?;
        let id = Self::object_id(id)?;

        let response = self
            .client
            .get(self.url(&["payment_intents", id])?)
            .bearer_auth(self.config.secret_key.expose_secret())
            .query(&[("expand[]", "latest_charge")])
            .send()
            .await?;

        let intent: RetrievedIntent = Self::parse(response, "retrieve_payment_intent").await?;
        if intent.object.as_deref() != Some(PAYMENT_INTENT_OBJECT) || intent.id != id {
            tracing::error!(
                requested = %id,
                returned = %intent.id,
                object = ?intent.object,
                "Stripe returned a different object than the requested payment intent"
            );
            return Err(ProcessorError::UnexpectedObject {
                expected: PAYMENT_INTENT_OBJECT,
                found: intent.object.unwrap_or_else(|| "untagged object".to_string()),
                id: intent.id,
            });
        }
        Ok(intent)
    }

    async fn retrieve_payment_method(
        &self,
        id: &str,
    ) -> Result<PaymentMethodSnapshot, ProcessorError> {
        self.ensure_configured()?;
        let id = Self::object_id(id)?;

        let response = self
            .client
            .get(self.url(&["payment_methods", id])?)
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await?;

        Self::parse(response, "retrieve_payment_method").await
    }
}
