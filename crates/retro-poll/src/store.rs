use std::sync::Arc;

use tracing::error;

use retro_db::Database;
use retro_types::error::{AppError, AppResult};

/// Run a store call on the blocking pool. SQLite calls block, so they
/// never run on the async workers.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> AppResult<T>
where
    F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            AppError::Store(anyhow::anyhow!("store task failed: {}", e))
        })?
}
