//! Cart persistence.

mod memory;
mod postgres;

pub use memory::InMemoryCartStore;
pub use postgres::PostgresCartStore;

use async_trait::async_trait;
use common::{CartId, CartUpdate};

use crate::error::Result;
use crate::model::{Cart, LineItem};

/// Storage for carts and their line items.
#[async_trait]
pub trait CartStore: Send + Sync + 'static {
    /// Creates an open cart.
    async fn create_cart(&self, cart_id: CartId) -> Result<()>;

    /// Loads a cart.
    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>>;

    /// Inserts a line item, or replaces its quantity when the product is
    /// already in the cart. Fails with `CartNotFound` for unknown carts.
    async fn upsert_line_item(&self, cart_id: CartId, item: LineItem) -> Result<()>;

    /// Lists the items of a cart that can still be checked out, ordered by
    /// product id.
    ///
    /// Returns an empty list when the cart does not exist, is empty, or has
    /// already been checked out; callers cannot tell these apart.
    async fn list_open_cart_items(&self, cart_id: CartId) -> Result<Vec<LineItem>>;

    /// Moves an open cart to `ORDER_PROCESSING` in one conditional write.
    ///
    /// Returns `false` when the cart is unknown or already left the open
    /// state, so of two concurrent checkouts only one gets `true`.
    async fn begin_checkout(&self, cart_id: CartId) -> Result<bool>;

    /// Writes status and order number unconditionally. Updating an unknown
    /// cart is a no-op, so repeating an update is harmless.
    async fn update_cart(&self, cart_id: CartId, update: &CartUpdate) -> Result<()>;
}
