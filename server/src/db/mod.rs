//! PostgreSQL implementations of the persistence collaborators.

mod audit;
mod carts;
mod devices;
mod pool;

pub use audit::PgAuditLog;
pub use carts::PgCartStore;
pub use devices::PgDeviceStore;
pub use pool::*;

use std::sync::Arc;

use crate::config::SyncSettings;
use crate::store::Stores;

/// Build the full store set on one pool.
///
/// Cart writes carry the commit deadline as a statement timeout, so a write
/// the coordinator gives up on is also abandoned by the database.
pub fn stores(pool: Pool, settings: &SyncSettings) -> Stores {
    Stores {
        carts: Arc::new(
            PgCartStore::new(pool.clone()).with_statement_timeout(settings.commit_timeout),
        ),
        devices: Arc::new(PgDeviceStore::new(pool.clone())),
        audit: Arc::new(PgAuditLog::new(pool)),
    }
}
