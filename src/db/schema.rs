use rusqlite::Connection;

/// Initialize the database schema.
///
/// Safe to run on every startup; all statements are idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // WAL mode: webhook bursts write concurrently with reads from the API
    // synchronous=NORMAL: safe with WAL, faster than FULL
    // journal_size_limit: prevent WAL from growing indefinitely
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;

        -- Orders (one row per checkout; external_reference is the public handle)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            external_reference TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'PAID', 'READY_FOR_MONTINK', 'SENT_TO_MONTINK', 'FAILED_MONTINK', 'CANCELED', 'FAILED', 'REFUNDED')),
            payer_email TEXT NOT NULL,
            payer_name TEXT,
            mp_payment_id TEXT,
            mp_status TEXT,
            montink_order_id TEXT,
            montink_status TEXT,
            coupon_code TEXT,
            subtotal_cents INTEGER NOT NULL,
            discount_cents INTEGER NOT NULL DEFAULT 0,
            shipping_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            shipping_cep TEXT,
            shipping_address1 TEXT,
            shipping_number TEXT,
            shipping_complement TEXT,
            shipping_district TEXT,
            shipping_city TEXT,
            shipping_state TEXT,
            shipping_service TEXT,
            shipping_deadline_days INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_external_reference ON orders(external_reference);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_created ON orders(created_at DESC);

        -- Order line items
        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL,
            name TEXT,
            quantity INTEGER NOT NULL,
            unit_price_cents INTEGER NOT NULL,
            size TEXT,
            color TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        -- Webhook ledger (idempotency + audit; rows are never deleted)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('received', 'processed', 'ignored', 'failed')),
            error_message TEXT,
            processed_at INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_lookup ON webhook_events(provider, event_id);
        CREATE INDEX IF NOT EXISTS idx_webhook_events_status ON webhook_events(status);
        "#,
    )?;
    Ok(())
}
