use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Money;

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Processor-side authorization in progress for a fixed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Handed to the client to confirm the card payment.
    pub client_secret: String,
    pub amount: Money,
    pub currency: String,
    pub status: String,
}

#[derive(Debug)]
pub enum PaymentError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
    Unavailable(String),
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentError::Http(e) => write!(f, "http error: {e}"),
            PaymentError::Api { status, body } => {
                write!(f, "processor api error status={status} body={body}")
            }
            PaymentError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
            PaymentError::Unavailable(e) => write!(f, "processor unavailable: {e}"),
        }
    }
}

impl std::error::Error for PaymentError {}

impl From<reqwest::Error> for PaymentError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// The slice of a payment processor the checkout flow depends on.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn update_payment_intent_amount(
        &self,
        id: &str,
        amount: Money,
    ) -> Result<PaymentIntent, PaymentError>;

    /// `Ok(None)` when the processor has no intent with this id.
    async fn retrieve_payment_intent(
        &self,
        id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError>;

    async fn cancel_payment_intent(&self, id: &str) -> Result<(), PaymentError>;
}

// ── Stripe ───────────────────────────────────────────────────────

/// Stripe REST client (form-encoded requests, bearer secret key).
pub struct StripeProcessor {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: String,
}

impl From<StripeIntent> for PaymentIntent {
    fn from(s: StripeIntent) -> Self {
        PaymentIntent {
            id: s.id,
            client_secret: s.client_secret.unwrap_or_default(),
            amount: s.amount,
            currency: s.currency,
            status: s.status,
        }
    }
}

impl StripeProcessor {
    pub fn new(secret_key: String, api_base: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            api_base: api_base.unwrap_or_else(|| STRIPE_API_BASE.to_string()),
        }
    }

    fn intent_url(&self, id: &str) -> String {
        format!("{}/v1/payment_intents/{id}", self.api_base)
    }

    async fn parse_intent(resp: reqwest::Response) -> Result<PaymentIntent, PaymentError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(PaymentError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str::<StripeIntent>(&body)
            .map(PaymentIntent::from)
            .map_err(|e| PaymentError::InvalidResponse(format!("{e}; body={body}")))
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        let amount = amount.to_string();
        let resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", currency),
                ("automatic_payment_methods[enabled]", "true"),
            ])
            .send()
            .await?;
        Self::parse_intent(resp).await
    }

    async fn update_payment_intent_amount(
        &self,
        id: &str,
        amount: Money,
    ) -> Result<PaymentIntent, PaymentError> {
        let amount = amount.to_string();
        let resp = self
            .client
            .post(self.intent_url(id))
            .bearer_auth(&self.secret_key)
            .form(&[("amount", amount.as_str())])
            .send()
            .await?;
        Self::parse_intent(resp).await
    }

    async fn retrieve_payment_intent(
        &self,
        id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        let resp = self
            .client
            .get(self.intent_url(id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        Self::parse_intent(resp).await.map(Some)
    }

    async fn cancel_payment_intent(&self, id: &str) -> Result<(), PaymentError> {
        let resp = self
            .client
            .post(format!("{}/cancel", self.intent_url(id)))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::parse_intent(resp).await.map(|_| ())
    }
}

// ── Sandbox ──────────────────────────────────────────────────────

/// In-process processor for tests and local runs. Intents live in memory.
#[derive(Default)]
pub struct SandboxProcessor {
    intents: DashMap<String, PaymentIntent>,
    failing: AtomicBool,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `PaymentError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.intents.get(id).map(|e| e.value().clone())
    }

    pub fn intent_count(&self) -> usize {
        self.intents.len()
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::Unavailable("sandbox set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
    ) -> Result<PaymentIntent, PaymentError> {
        self.check_available()?;
        let id = format!("pi_{}", Ulid::new());
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret_{}", Ulid::new()),
            id: id.clone(),
            amount,
            currency: currency.to_string(),
            status: "requires_payment_method".into(),
        };
        self.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn update_payment_intent_amount(
        &self,
        id: &str,
        amount: Money,
    ) -> Result<PaymentIntent, PaymentError> {
        self.check_available()?;
        let mut entry = self.intents.get_mut(id).ok_or_else(|| PaymentError::Api {
            status: 404,
            body: format!("no such payment_intent: {id}"),
        })?;
        entry.amount = amount;
        Ok(entry.value().clone())
    }

    async fn retrieve_payment_intent(
        &self,
        id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentError> {
        self.check_available()?;
        Ok(self.intent(id))
    }

    async fn cancel_payment_intent(&self, id: &str) -> Result<(), PaymentError> {
        self.check_available()?;
        if let Some(mut entry) = self.intents.get_mut(id) {
            entry.status = "canceled".into();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sandbox_create_update_retrieve() {
        let p = SandboxProcessor::new();
        let intent = p.create_payment_intent(36_000, "usd").await.unwrap();
        assert!(intent.id.starts_with("pi_"));
        assert!(intent.client_secret.starts_with(&intent.id));
        assert_eq!(intent.amount, 36_000);

        let updated = p.update_payment_intent_amount(&intent.id, 12_000).await.unwrap();
        assert_eq!(updated.amount, 12_000);

        let fetched = p.retrieve_payment_intent(&intent.id).await.unwrap().unwrap();
        assert_eq!(fetched.amount, 12_000);
        assert!(p.retrieve_payment_intent("pi_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sandbox_update_unknown_intent_is_api_error() {
        let p = SandboxProcessor::new();
        let err = p.update_payment_intent_amount("pi_missing", 100).await.unwrap_err();
        assert!(matches!(err, PaymentError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn sandbox_failing_mode() {
        let p = SandboxProcessor::new();
        p.set_failing(true);
        assert!(matches!(
            p.create_payment_intent(100, "usd").await,
            Err(PaymentError::Unavailable(_))
        ));
        assert_eq!(p.intent_count(), 0);
        p.set_failing(false);
        assert!(p.create_payment_intent(100, "usd").await.is_ok());
    }

    #[tokio::test]
    async fn sandbox_cancel_marks_intent() {
        let p = SandboxProcessor::new();
        let intent = p.create_payment_intent(100, "usd").await.unwrap();
        p.cancel_payment_intent(&intent.id).await.unwrap();
        assert_eq!(p.intent(&intent.id).unwrap().status, "canceled");
    }

    #[test]
    fn stripe_intent_maps_missing_secret_to_empty() {
        let raw = r#"{"id":"pi_1","amount":500,"currency":"usd","status":"succeeded","client_secret":null}"#;
        let parsed: StripeIntent = serde_json::from_str(raw).unwrap();
        let intent = PaymentIntent::from(parsed);
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.client_secret, "");
        assert_eq!(intent.amount, 500);
    }
}
