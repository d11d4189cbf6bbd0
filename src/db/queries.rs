use chrono::Utc;
use rusqlite::{params, types::Value, Connection};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{query_all, query_one, ORDER_COLS, ORDER_ITEM_COLS, WEBHOOK_EVENT_COLS};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a public order reference, e.g. `BRV-3F90A1C24B7D`.
fn gen_reference() -> String {
    let token = Uuid::new_v4().as_simple().to_string();
    format!("BRV-{}", token[..12].to_uppercase())
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query for efficiency.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Set a column to an explicit value (including NULL).
    /// Use this for Option<T> where Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }

    /// Execute the update and return the updated entity using RETURNING clause.
    /// Returns None if no rows matched (entity not found or no fields to update).
    fn execute_returning<T: super::from_row::FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        use rusqlite::OptionalExtension;
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

// ============ Webhook ledger ============

/// File a webhook delivery in the ledger.
///
/// Returns the new row id, or None when (provider, event_id) has already
/// been filed. INSERT OR IGNORE against the unique constraint makes
/// redeliveries and concurrent duplicates collapse to a single row.
pub fn try_record_webhook_event(
    conn: &Connection,
    provider: &str,
    event_id: &str,
    event_type: &str,
    payload: &str,
) -> Result<Option<String>> {
    let id = gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, event_type, payload, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            provider,
            event_id,
            event_type,
            payload,
            WebhookEventStatus::Received.as_str(),
            now()
        ],
    )?;
    Ok((affected > 0).then_some(id))
}

/// File a delivery that is terminal on arrival, such as one with no usable
/// event id. The caller supplies a synthesized event_id; a same-instant
/// collision is absorbed by INSERT OR IGNORE.
pub fn record_ignored_event(
    conn: &Connection,
    provider: &str,
    event_id: &str,
    event_type: &str,
    payload: &str,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, event_type, payload, status, processed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            gen_id(),
            provider,
            event_id,
            event_type,
            payload,
            WebhookEventStatus::Ignored.as_str(),
            ts,
            ts
        ],
    )?;
    Ok(())
}

/// Assign a terminal status to a ledger row.
///
/// processed_at records when the row reached its terminal status, whether
/// that outcome was processed, ignored or failed.
pub fn finish_webhook_event(
    conn: &Connection,
    id: &str,
    status: WebhookEventStatus,
    error_message: Option<&str>,
) -> Result<bool> {
    UpdateBuilder::new("webhook_events", id)
        .set("status", status.as_str().to_string())
        .set_nullable("error_message", error_message.map(|s| s.to_string()))
        .set("processed_at", now())
        .execute(conn)
}

pub fn get_webhook_event(conn: &Connection, id: &str) -> Result<Option<WebhookEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE id = ?1",
            WEBHOOK_EVENT_COLS
        ),
        &[&id],
    )
}

pub fn get_webhook_event_by_event_id(
    conn: &Connection,
    provider: &str,
    event_id: &str,
) -> Result<Option<WebhookEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE provider = ?1 AND event_id = ?2",
            WEBHOOK_EVENT_COLS
        ),
        &[&provider, &event_id],
    )
}

// ============ Orders ============

/// Create an order with its line items. The caller is expected to run this
/// inside a transaction so a failed item insert rolls back the order row.
pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = gen_id();
    let external_reference = gen_reference();
    let now = now();
    let email = input.payer_email.trim().to_lowercase();
    let shipping = input.shipping.clone().unwrap_or_default();

    conn.execute(
        "INSERT INTO orders (id, external_reference, status, payer_email, payer_name, coupon_code,
            subtotal_cents, discount_cents, shipping_cents, total_cents,
            shipping_cep, shipping_address1, shipping_number, shipping_complement,
            shipping_district, shipping_city, shipping_state, shipping_service,
            shipping_deadline_days, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
        params![
            id,
            external_reference,
            OrderStatus::Pending.as_str(),
            email,
            input.payer_name,
            input.coupon_code,
            input.subtotal_cents,
            input.discount_cents,
            input.shipping_cents,
            input.total_cents,
            shipping.cep,
            shipping.address1,
            shipping.number,
            shipping.complement,
            shipping.district,
            shipping.city,
            shipping.state,
            shipping.service,
            shipping.deadline_days,
            now,
            now
        ],
    )?;

    for item in &input.items {
        conn.execute(
            "INSERT INTO order_items (id, order_id, product_id, name, quantity, unit_price_cents, size, color)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                gen_id(),
                id,
                item.product_id,
                item.name,
                item.quantity,
                item.unit_price_cents,
                item.size,
                item.color
            ],
        )?;
    }

    Ok(Order {
        id,
        external_reference,
        status: OrderStatus::Pending,
        payer_email: email,
        payer_name: input.payer_name.clone(),
        mp_payment_id: None,
        mp_status: None,
        montink_order_id: None,
        montink_status: None,
        coupon_code: input.coupon_code.clone(),
        subtotal_cents: input.subtotal_cents,
        discount_cents: input.discount_cents,
        shipping_cents: input.shipping_cents,
        total_cents: input.total_cents,
        shipping_cep: shipping.cep,
        shipping_address1: shipping.address1,
        shipping_number: shipping.number,
        shipping_complement: shipping.complement,
        shipping_district: shipping.district,
        shipping_city: shipping.city,
        shipping_state: shipping.state,
        shipping_service: shipping.service,
        shipping_deadline_days: shipping.deadline_days,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_order(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_reference(
    conn: &Connection,
    external_reference: &str,
) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE external_reference = ?1",
            ORDER_COLS
        ),
        &[&external_reference],
    )
}

pub fn get_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY rowid",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

/// List orders newest first, optionally filtered by status.
/// Returns (orders, total matching the filter).
pub fn list_orders_paginated(
    conn: &Connection,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Order>, i64)> {
    match status {
        Some(status) => {
            let status = status.as_str();
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM orders WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            let items = query_all(
                conn,
                &format!(
                    "SELECT {} FROM orders WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    ORDER_COLS
                ),
                params![status, limit, offset],
            )?;
            Ok((items, total))
        }
        None => {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
            let items = query_all(
                conn,
                &format!(
                    "SELECT {} FROM orders ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    ORDER_COLS
                ),
                params![limit, offset],
            )?;
            Ok((items, total))
        }
    }
}

/// Persist the outcome of a payment fetch in one statement.
///
/// The provider's payment id and raw status are always written, even when
/// the status did not map to a lifecycle change, so the audit trail shows
/// what the provider last reported.
pub fn apply_payment_update(
    conn: &Connection,
    order_id: &str,
    mp_payment_id: Option<&str>,
    mp_status: Option<&str>,
    status: Option<OrderStatus>,
) -> Result<bool> {
    UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set_nullable("mp_payment_id", mp_payment_id.map(|s| s.to_string()))
        .set_nullable("mp_status", mp_status.map(|s| s.to_string()))
        .set_opt("status", status.map(|s| s.as_str().to_string()))
        .execute(conn)
}

/// Record the outcome of a fulfillment dispatch (or a manual override).
/// Returns the updated order, or None if the order id is unknown.
pub fn set_montink_result(
    conn: &Connection,
    order_id: &str,
    status: OrderStatus,
    montink_order_id: Option<&str>,
    montink_status: Option<&str>,
) -> Result<Option<Order>> {
    UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set("status", status.as_str().to_string())
        .set_opt("montink_order_id", montink_order_id.map(|s| s.to_string()))
        .set_opt("montink_status", montink_status.map(|s| s.to_string()))
        .execute_returning(conn, ORDER_COLS)
}
