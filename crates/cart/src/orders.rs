//! Client side of the order service contracts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{MessageSink, Producer};
use common::{CREATE_ORDER_TOPIC, CreateOrderEvent};
use tracing::info;

use crate::error::{CartError, Result};

/// The order service as seen from a checkout.
#[async_trait]
pub trait OrderGateway: Send + Sync + 'static {
    /// Creates the order synchronously (`POST /orders`) and reports the outcome.
    async fn create_order(&self, request: &CreateOrderEvent) -> Result<()>;

    /// Publishes the create-order event. Delivery failures are only logged.
    async fn create_order_async(&self, request: &CreateOrderEvent) -> Result<()>;
}

/// Talks to the order service over HTTP and through the broker.
pub struct OrderServiceClient<S> {
    http: reqwest::Client,
    base_url: String,
    producer: Arc<Producer<S>>,
}

impl<S: MessageSink> OrderServiceClient<S> {
    pub fn new(base_url: impl Into<String>, producer: Arc<Producer<S>>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            producer,
        })
    }
}

#[async_trait]
impl<S: MessageSink> OrderGateway for OrderServiceClient<S> {
    #[tracing::instrument(skip(self, request), fields(cart_id = %request.cart_id))]
    async fn create_order(&self, request: &CreateOrderEvent) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CartError::OrderService(format!("{status}: {body}")));
        }
        info!(%status, "order created by order service");
        Ok(())
    }

    async fn create_order_async(&self, request: &CreateOrderEvent) -> Result<()> {
        self.producer
            .publish_json(CREATE_ORDER_TOPIC, request)
            .await?;
        Ok(())
    }
}
