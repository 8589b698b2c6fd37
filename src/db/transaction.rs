use crate::errors::ServiceError;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs `f` inside a database transaction.
///
/// The transaction commits when `f` returns `Ok` and rolls back otherwise. The
/// error produced inside the closure is returned unchanged, so a
/// `ServiceError::InsufficientStock` raised halfway through a transfer still
/// reaches the caller as a 422 after the rollback.
///
/// ```rust,ignore
/// let movement = with_transaction(&db, move |txn| {
///     Box::pin(async move {
///         let source = lock_item(txn, from_item_id).await?;
///         let destination = lock_item(txn, to_item_id).await?;
///         move_units(txn, source, destination, quantity).await
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, ServiceError>> + Send,
    T: Send,
{
    let result = db.transaction::<_, T, ServiceError>(f).await;
    match &result {
        Ok(_) => debug!("Transaction committed"),
        Err(err) => warn!(error = %err, "Transaction rolled back"),
    }
    result.map_err(ServiceError::from)
}
