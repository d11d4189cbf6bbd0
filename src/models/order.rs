use serde::{Deserialize, Serialize};

/// Lifecycle of a store order as payment and fulfillment progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    /// Accepted in filters and imports; reconciliation maps approved
    /// payments straight to ReadyForMontink.
    Paid,
    ReadyForMontink,
    SentToMontink,
    FailedMontink,
    Canceled,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::ReadyForMontink => "READY_FOR_MONTINK",
            Self::SentToMontink => "SENT_TO_MONTINK",
            Self::FailedMontink => "FAILED_MONTINK",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Statuses that represent a settled outcome. A late payment fetch that
    /// would move one of these back to PENDING gets logged as suspicious.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::SentToMontink | Self::FailedMontink | Self::Canceled | Self::Refunded
        )
    }

    /// Map a Mercado Pago payment status onto the order lifecycle.
    ///
    /// Unknown provider statuses return None: the order status is left
    /// untouched while the raw provider status is still recorded for audit.
    pub fn from_mp_status(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::ReadyForMontink),
            "cancelled" | "rejected" => Some(Self::Canceled),
            "refunded" | "charged_back" => Some(Self::Refunded),
            "pending" | "in_process" => Some(Self::Pending),
            _ => None,
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "READY_FOR_MONTINK" => Ok(Self::ReadyForMontink),
            "SENT_TO_MONTINK" => Ok(Self::SentToMontink),
            "FAILED_MONTINK" => Ok(Self::FailedMontink),
            "CANCELED" => Ok(Self::Canceled),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A store order. Mirrors the `orders` table; shipping fields stay flat
/// and get assembled into a nested shape at the API boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub external_reference: String,
    pub status: OrderStatus,
    pub payer_email: String,
    pub payer_name: Option<String>,

    // Provider audit trail
    pub mp_payment_id: Option<String>,
    pub mp_status: Option<String>,
    pub montink_order_id: Option<String>,
    pub montink_status: Option<String>,

    // Amounts (cents)
    pub coupon_code: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,

    // Shipping destination and quote
    pub shipping_cep: Option<String>,
    pub shipping_address1: Option<String>,
    pub shipping_number: Option<String>,
    pub shipping_complement: Option<String>,
    pub shipping_district: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_state: Option<String>,
    pub shipping_service: Option<String>,
    pub shipping_deadline_days: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

/// A line item on an order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub size: Option<String>,
    pub color: Option<String>,
}

/// Data required to create a new order at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub payer_email: String,
    pub payer_name: Option<String>,
    pub coupon_code: Option<String>,
    pub subtotal_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
    #[serde(default)]
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub shipping: Option<ShippingDetails>,
    pub items: Vec<CreateOrderItem>,
}

/// Shipping destination captured at checkout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingDetails {
    pub cep: Option<String>,
    pub address1: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub service: Option<String>,
    pub deadline_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderItem {
    pub product_id: String,
    pub name: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub size: Option<String>,
    pub color: Option<String>,
}
