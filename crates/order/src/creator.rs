//! Create-order saga step.
//!
//! [`OrderCreator::create_order`] turns a checkout request into exactly one
//! order per cart:
//!
//! ```text
//! price products ──► begin ──► existing order? ──yes──► commit ─┐
//!                                 │ no                          │
//!                                 ▼                             ▼
//!                      insert order + line items ──► commit ──► publish update-cart
//! ```
//!
//! Any failure before the commit rolls the transaction back and is returned,
//! so a redelivered event simply runs the step again. The update-cart event
//! is published only after the commit and outside the transaction; a
//! redelivery after a committed run republishes it with the stored order
//! number.

use std::collections::BTreeMap;
use std::time::Instant;

use common::{CartId, CreateOrderEvent, Money, OrderNumber, ProductId, UpdateCartEvent};
use tracing::{info, warn};

use crate::carts::CartGateway;
use crate::catalog::ProductCatalog;
use crate::error::{OrderError, Result, StoreError};
use crate::model::{NewOrder, Order, OrderLineItem};
use crate::store::OrderStore;

/// What [`OrderCreator::create_order`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// A new order was committed.
    Created(Order),
    /// The cart already had an order; nothing was written.
    AlreadyExists(Order),
}

impl OrderOutcome {
    pub fn order(&self) -> &Order {
        match self {
            OrderOutcome::Created(order) | OrderOutcome::AlreadyExists(order) => order,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, OrderOutcome::Created(_))
    }
}

/// A line priced at checkout time.
struct PricedLine {
    product_id: ProductId,
    quantity: u64,
    amount: Money,
}

/// Coordinates the order side of the checkout saga.
pub struct OrderCreator<S, C, G> {
    store: S,
    catalog: C,
    carts: G,
}

impl<S, C, G> OrderCreator<S, C, G>
where
    S: OrderStore,
    C: ProductCatalog,
    G: CartGateway,
{
    pub fn new(store: S, catalog: C, carts: G) -> Self {
        Self {
            store,
            catalog,
            carts,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the order for a checkout request, or finds the one a previous
    /// delivery already created, then tells the cart service.
    #[tracing::instrument(skip(self, request), fields(cart_id = %request.cart_id))]
    pub async fn create_order(&self, request: &CreateOrderEvent) -> Result<OrderOutcome> {
        let start = Instant::now();
        let lines = self.price(request).await?;

        let outcome = self.persist(request.cart_id, &lines).await?;
        match &outcome {
            OrderOutcome::Created(order) => {
                metrics::counter!("orders_created_total").increment(1);
                info!(
                    order_id = %order.id,
                    order_number = order.order_number.as_str(),
                    amount = %order.amount,
                    "order created"
                );
            }
            OrderOutcome::AlreadyExists(order) => {
                metrics::counter!("orders_deduplicated_total").increment(1);
                info!(
                    order_id = %order.id,
                    order_number = order.order_number.as_str(),
                    "order already exists for cart, skipping insert"
                );
            }
        }

        let order = outcome.order();
        self.carts
            .update_cart_async(&UpdateCartEvent::order_created(
                order.cart_id,
                order.order_number.clone(),
            ))
            .await?;

        metrics::histogram!("order_creation_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Resolves prices and computes the amount of every line.
    ///
    /// Repeated products collapse to one line and the last quantity wins.
    async fn price(&self, request: &CreateOrderEvent) -> Result<Vec<PricedLine>> {
        if request.products.is_empty() {
            return Err(OrderError::Validation("products must not be empty".to_string()));
        }

        let quantities: BTreeMap<ProductId, u64> = request
            .products
            .iter()
            .map(|p| (p.product_id, p.quantity))
            .collect();
        let ids: Vec<ProductId> = quantities.keys().copied().collect();

        let prices: BTreeMap<ProductId, Money> = self
            .catalog
            .list_products(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p.price))
            .collect();

        let missing: Vec<ProductId> = ids
            .iter()
            .filter(|id| !prices.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(OrderError::ProductNotFound(missing));
        }

        let mut total = Money::zero();
        let mut lines = Vec::with_capacity(quantities.len());
        for (product_id, quantity) in quantities {
            let amount = prices[&product_id]
                .checked_multiply(quantity)
                .ok_or_else(|| {
                    OrderError::Validation(format!(
                        "quantity {quantity} of product {product_id} is out of range"
                    ))
                })?;
            total = total.checked_add(amount).ok_or_else(|| {
                OrderError::Validation("order amount is out of range".to_string())
            })?;
            lines.push(PricedLine {
                product_id,
                quantity,
                amount,
            });
        }
        Ok(lines)
    }

    async fn persist(&self, cart_id: CartId, lines: &[PricedLine]) -> Result<OrderOutcome> {
        let mut tx = self.store.begin().await?;
        let written = self.write_order(&mut tx, cart_id, lines).await;

        let outcome = match written {
            Ok(outcome) => match self.store.commit(tx).await {
                Ok(()) => outcome,
                Err(StoreError::DuplicateOrder(_)) => self.existing_order(cart_id).await?,
                Err(e) => return Err(e.into()),
            },
            Err(e) => {
                if let Err(rollback) = self.store.rollback(tx).await {
                    warn!(error = %rollback, "failed to roll back order transaction");
                }
                match e {
                    // Lost a race against a concurrent delivery for the same cart.
                    OrderError::Store(StoreError::DuplicateOrder(_)) => {
                        self.existing_order(cart_id).await?
                    }
                    e => return Err(e),
                }
            }
        };
        Ok(outcome)
    }

    async fn write_order(
        &self,
        tx: &mut S::Tx,
        cart_id: CartId,
        lines: &[PricedLine],
    ) -> Result<OrderOutcome> {
        if let Some(existing) = self.store.find_by_cart(Some(&mut *tx), cart_id).await? {
            return Ok(OrderOutcome::AlreadyExists(existing));
        }

        let new_order = NewOrder {
            order_number: OrderNumber::generate(),
            cart_id,
            amount: lines.iter().map(|l| l.amount).sum(),
        };
        let order_id = self.store.create_order(Some(&mut *tx), &new_order).await?;

        let items: Vec<OrderLineItem> = lines
            .iter()
            .map(|l| OrderLineItem {
                order_id,
                product_id: l.product_id,
                quantity: l.quantity,
                amount: l.amount,
            })
            .collect();
        self.store
            .bulk_insert_line_items(Some(&mut *tx), &items)
            .await?;

        let order = self
            .store
            .find_by_cart(Some(&mut *tx), cart_id)
            .await?
            .ok_or(OrderError::Store(StoreError::UnknownOrder(order_id)))?;
        Ok(OrderOutcome::Created(order))
    }

    async fn existing_order(&self, cart_id: CartId) -> Result<OrderOutcome> {
        let order = self
            .store
            .find_by_cart(None, cart_id)
            .await?
            .ok_or_else(|| {
                OrderError::Store(StoreError::Database(sqlx::Error::RowNotFound))
            })?;
        Ok(OrderOutcome::AlreadyExists(order))
    }
}
