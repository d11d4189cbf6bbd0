mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::email::EmailService;
use crate::notifier::StatusNotifier;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by all handlers and background workers.
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (orders, order items, webhook ledger)
    pub db: DbPool,
    /// Environment-derived configuration (provider credentials, admin token)
    pub config: Arc<Config>,
    /// Shared HTTP client for Mercado Pago and Montink calls
    pub http: reqwest::Client,
    /// Live order status broadcaster feeding SSE subscribers
    pub notifier: StatusNotifier,
    /// Transactional email sender (no-op when unconfigured)
    pub email: Arc<EmailService>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
