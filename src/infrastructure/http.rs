use crate::domain::money::{Currency, Money};
use crate::domain::ports::PaymentProcessor;
use crate::domain::processor::{OrderRequest, ProcessorOrder, ProcessorOrderStatus};
use crate::domain::session::{CaptureReceipt, OrderId};
use crate::error::{CheckoutError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ORDERS_PATH: &str = "/v2/checkout/orders";

#[derive(Debug, Serialize, Deserialize)]
struct WireAmount {
    currency_code: String,
    value: Decimal,
}

impl WireAmount {
    fn from_domain(amount: Money, currency: &Currency) -> Self {
        Self {
            currency_code: currency.code().to_string(),
            value: amount.to_decimal(),
        }
    }

    fn to_domain(&self) -> Result<(Money, Currency)> {
        let amount = Money::try_from(self.value)
            .map_err(|e| CheckoutError::provider(format!("Malformed amount: {e}"), false))?;
        let currency = Currency::new(&self.currency_code)
            .map_err(|e| CheckoutError::provider(format!("Malformed currency: {e}"), false))?;
        Ok((amount, currency))
    }
}

#[derive(Debug, Deserialize)]
struct WireCapture {
    id: String,
    status: String,
    amount: WireAmount,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct WirePayments {
    #[serde(default)]
    captures: Vec<WireCapture>,
}

#[derive(Debug, Serialize)]
struct CreatePurchaseUnit {
    reference_id: String,
    amount: WireAmount,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody {
    intent: &'static str,
    purchase_units: Vec<CreatePurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct WirePurchaseUnit {
    amount: WireAmount,
    #[serde(default)]
    payments: Option<WirePayments>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    id: String,
    status: String,
    purchase_units: Vec<WirePurchaseUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WireOrder {
    fn into_domain(self) -> Result<ProcessorOrder> {
        let unit = self.purchase_units.into_iter().next().ok_or_else(|| {
            CheckoutError::provider(format!("Order {} has no purchase units", self.id), false)
        })?;
        let (amount, currency) = unit.amount.to_domain()?;
        let capture = match unit
            .payments
            .unwrap_or_default()
            .captures
            .into_iter()
            .find(|c| c.status == "COMPLETED")
        {
            Some(capture) => {
                let (captured, captured_currency) = capture.amount.to_domain()?;
                Some(CaptureReceipt {
                    payment_id: capture.id,
                    amount: captured,
                    currency: captured_currency,
                    captured_at: capture.create_time.unwrap_or_else(Utc::now),
                })
            }
            None => None,
        };
        let status = match self.status.as_str() {
            "APPROVED" => ProcessorOrderStatus::Approved,
            "COMPLETED" => ProcessorOrderStatus::Completed,
            "VOIDED" => ProcessorOrderStatus::Voided,
            _ => ProcessorOrderStatus::Created,
        };
        Ok(ProcessorOrder {
            order_id: OrderId::new(self.id),
            status,
            amount,
            currency,
            capture,
        })
    }
}

/// Payment processor reached over an HTTP orders API.
///
/// Server errors and connection failures surface as retryable provider errors, client
/// errors as non-retryable ones, and request timeouts as `NetworkTimeout`.
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpPaymentProcessor {
    pub fn new(base_url: &str, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_order(response: Response) -> Result<ProcessorOrder> {
        let status = response.status();
        if status.is_success() {
            let order: WireOrder = response.json().await?;
            return order.into_domain();
        }

        let body: WireError = response.json().await.unwrap_or_default();
        let message = format!(
            "{} {}: {}",
            status.as_u16(),
            body.name.unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
            body.message.unwrap_or_default()
        );
        tracing::debug!(%message, "Processor returned an error");
        Err(CheckoutError::provider(message, status.is_server_error()))
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_order(&self, request: OrderRequest) -> Result<ProcessorOrder> {
        let body = CreateOrderBody {
            intent: "CAPTURE",
            purchase_units: vec![CreatePurchaseUnit {
                reference_id: request.registration_id,
                amount: WireAmount::from_domain(request.amount, &request.currency),
            }],
        };
        let response = self
            .authorized(self.client.post(format!("{}{ORDERS_PATH}", self.base_url)))
            .json(&body)
            .send()
            .await?;
        Self::read_order(response).await
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<ProcessorOrder> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}{ORDERS_PATH}/{order_id}", self.base_url)),
            )
            .send()
            .await?;
        Self::read_order(response).await
    }

    async fn capture_order(&self, order_id: &OrderId) -> Result<CaptureReceipt> {
        let response = self
            .authorized(
                self.client
                    .post(format!("{}{ORDERS_PATH}/{order_id}/capture", self.base_url)),
            )
            // Lets the processor deduplicate a capture we could not see the answer to.
            .header("Idempotency-Key", format!("capture-{order_id}"))
            .header("Content-Type", "application/json")
            .send()
            .await?;
        let order = Self::read_order(response).await?;
        order.capture.ok_or_else(|| {
            CheckoutError::provider(
                format!("Order {order_id} returned no completed capture"),
                false,
            )
        })
    }
}
