//! Client side of the cart service contracts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker::{MessageSink, Producer};
use common::{CartId, CartUpdate, UPDATE_CART_TOPIC, UpdateCartEvent};

use crate::error::{OrderError, Result};

/// The cart service as seen from order creation.
#[async_trait]
pub trait CartGateway: Send + Sync + 'static {
    /// `PATCH /carts/{uuid}` with the update.
    async fn update_cart(&self, cart_id: CartId, update: &CartUpdate) -> Result<()>;

    /// Publishes the update-cart event. Delivery failures are only logged.
    async fn update_cart_async(&self, event: &UpdateCartEvent) -> Result<()>;
}

/// Talks to the cart service over HTTP and through the broker.
pub struct CartServiceClient<S> {
    http: reqwest::Client,
    base_url: String,
    producer: Arc<Producer<S>>,
}

impl<S: MessageSink> CartServiceClient<S> {
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
impl<S: MessageSink> CartGateway for CartServiceClient<S> {
    #[tracing::instrument(skip(self, update))]
    async fn update_cart(&self, cart_id: CartId, update: &CartUpdate) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/carts/{cart_id}", self.base_url))
            .json(update)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrderError::CartService(format!("{status}: {body}")));
        }
        Ok(())
    }

    async fn update_cart_async(&self, event: &UpdateCartEvent) -> Result<()> {
        self.producer.publish_json(UPDATE_CART_TOPIC, event).await?;
        Ok(())
    }
}
