//! Per-message processing contract.

use async_trait::async_trait;

use crate::record::Record;

/// Error type returned by delivery handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered record.
///
/// Returning `Ok` lets the session mark the offset; returning an error
/// leaves it unmarked and cancels the session, so the record is delivered
/// again after the group rejoins. Handlers must therefore tolerate seeing
/// the same payload more than once.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn process(&self, record: &Record) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: DeliveryHandler> DeliveryHandler for std::sync::Arc<H> {
    async fn process(&self, record: &Record) -> Result<(), HandlerError> {
        (**self).process(record).await
    }
}
