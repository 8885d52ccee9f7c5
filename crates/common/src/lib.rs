//! Shared types for the checkout services.
//!
//! Identifiers, money, the cart status enumeration, order numbers and the
//! saga wire messages exchanged between the cart and order services.

pub mod events;
pub mod money;
pub mod order_number;
pub mod status;
pub mod types;

pub use events::{
    CREATE_ORDER_TOPIC, CartFilter, CartUpdate, CreateOrderEvent, OrderedProduct,
    UPDATE_CART_TOPIC, UpdateCartEvent, consumer_group_id,
};
pub use money::Money;
pub use order_number::OrderNumber;
pub use status::{CartStatus, UnknownCartStatus};
pub use types::{CartId, OrderId, ProductId};
