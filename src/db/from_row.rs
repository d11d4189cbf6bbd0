//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! This module provides a `FromRow` trait that models can implement to
//! define how they are constructed from database rows, plus helper functions
//! for common query patterns.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// This provides graceful error handling instead of panicking when database
/// contains invalid enum values (from corruption, migration errors, etc.).
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
///
/// Implementing this trait allows using the `query_one` and `query_all`
/// helper functions, reducing repetitive row mapping closures.
pub trait FromRow: Sized {
    /// Construct an instance from a database row.
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ORDER_COLS: &str = "id, external_reference, status, payer_email, payer_name, mp_payment_id, mp_status, montink_order_id, montink_status, coupon_code, subtotal_cents, discount_cents, shipping_cents, total_cents, shipping_cep, shipping_address1, shipping_number, shipping_complement, shipping_district, shipping_city, shipping_state, shipping_service, shipping_deadline_days, created_at, updated_at";

pub const ORDER_ITEM_COLS: &str =
    "id, order_id, product_id, name, quantity, unit_price_cents, size, color";

pub const WEBHOOK_EVENT_COLS: &str =
    "id, provider, event_id, event_type, payload, status, error_message, processed_at, created_at";

// ============ FromRow Implementations ============

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            external_reference: row.get(1)?,
            status: parse_enum(row, 2, "status")?,
            payer_email: row.get(3)?,
            payer_name: row.get(4)?,
            mp_payment_id: row.get(5)?,
            mp_status: row.get(6)?,
            montink_order_id: row.get(7)?,
            montink_status: row.get(8)?,
            coupon_code: row.get(9)?,
            subtotal_cents: row.get(10)?,
            discount_cents: row.get(11)?,
            shipping_cents: row.get(12)?,
            total_cents: row.get(13)?,
            shipping_cep: row.get(14)?,
            shipping_address1: row.get(15)?,
            shipping_number: row.get(16)?,
            shipping_complement: row.get(17)?,
            shipping_district: row.get(18)?,
            shipping_city: row.get(19)?,
            shipping_state: row.get(20)?,
            shipping_service: row.get(21)?,
            shipping_deadline_days: row.get(22)?,
            created_at: row.get(23)?,
            updated_at: row.get(24)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            name: row.get(3)?,
            quantity: row.get(4)?,
            unit_price_cents: row.get(5)?,
            size: row.get(6)?,
            color: row.get(7)?,
        })
    }
}

impl FromRow for WebhookEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEvent {
            id: row.get(0)?,
            provider: row.get(1)?,
            event_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            error_message: row.get(6)?,
            processed_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}
