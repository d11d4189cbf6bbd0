//! Bravos - Order backend for the Bravos store
//!
//! This library provides the core functionality for the Bravos order pipeline,
//! including database operations, Mercado Pago webhook reconciliation, Montink
//! fulfillment, live order status streaming, and API handlers.

pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod fulfillment;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod pagination;
pub mod payments;
pub mod rate_limit;
pub mod util;
