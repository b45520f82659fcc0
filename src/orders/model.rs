//! Order data model: states, line items, transition history, commands.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::pipeline::types::PriorityTier;

/// Fulfillment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Created,
    Confirmed,
    Planned,
    InProduction,
    Produced,
    Packed,
    Shipped,
    Delivered,
    Invoiced,
    Closed,
    OnHold,
    Escalated,
    Cancelled,
}

/// The main fulfillment path, in order.
pub const MAIN_PATH: [OrderState; 10] = [
    OrderState::Created,
    OrderState::Confirmed,
    OrderState::Planned,
    OrderState::InProduction,
    OrderState::Produced,
    OrderState::Packed,
    OrderState::Shipped,
    OrderState::Delivered,
    OrderState::Invoiced,
    OrderState::Closed,
];

impl OrderState {
    /// Position on the main path, `None` for side states.
    pub fn path_index(&self) -> Option<usize> {
        MAIN_PATH.iter().position(|s| s == self)
    }

    /// The single forward edge on the main path.
    pub fn next(&self) -> Option<OrderState> {
        self.path_index().and_then(|i| MAIN_PATH.get(i + 1)).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// ON_HOLD and ESCALATED, which resume to the state held before entry.
    pub fn is_suspension(&self) -> bool {
        matches!(self, Self::OnHold | Self::Escalated)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Created | Self::Confirmed)
    }

    /// SHIPPED or any later main-path state.
    pub fn has_shipped(&self) -> bool {
        match (self.path_index(), OrderState::Shipped.path_index()) {
            (Some(i), Some(shipped)) => i >= shipped,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::Planned => "PLANNED",
            Self::InProduction => "IN_PRODUCTION",
            Self::Produced => "PRODUCED",
            Self::Packed => "PACKED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Invoiced => "INVOICED",
            Self::Closed => "CLOSED",
            Self::OnHold => "ON_HOLD",
            Self::Escalated => "ESCALATED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "CONFIRMED" => Ok(Self::Confirmed),
            "PLANNED" => Ok(Self::Planned),
            "IN_PRODUCTION" => Ok(Self::InProduction),
            "PRODUCED" => Ok(Self::Produced),
            "PACKED" => Ok(Self::Packed),
            "SHIPPED" => Ok(Self::Shipped),
            "DELIVERED" => Ok(Self::Delivered),
            "INVOICED" => Ok(Self::Invoiced),
            "CLOSED" => Ok(Self::Closed),
            "ON_HOLD" => Ok(Self::OnHold),
            "ESCALATED" => Ok(Self::Escalated),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown order state: {}", s)),
        }
    }
}

/// Sales channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderChannel {
    #[default]
    Retail,
    Oem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
}

impl LineItem {
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            unit_price: None,
        }
    }

    pub fn priced(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// One accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

/// Order creation request, from routing or directly from checkout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub message_id: Option<Uuid>,
    pub customer: String,
    #[serde(default)]
    pub channel: OrderChannel,
    #[serde(default)]
    pub priority: Option<PriorityTier>,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub expedite: bool,
    /// Ship-by to promise at confirmation instead of the standard lead time.
    #[serde(default)]
    pub ship_by: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub message_id: Option<Uuid>,
    pub customer: String,
    pub channel: OrderChannel,
    pub priority: PriorityTier,
    pub line_items: Vec<LineItem>,
    pub expedite: bool,
    pub state: OrderState,
    /// Fixed once, on entering CONFIRMED.
    pub promised_ship_by: Option<DateTime<Utc>>,
    /// Requested ship-by, applied at confirmation.
    pub requested_ship_by: Option<DateTime<Utc>>,
    /// Sticky: never cleared once set.
    pub sla_breached: bool,
    pub history: Vec<Transition>,
    /// States to return to on resume, innermost last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resume_stack: Vec<OrderState>,
}

impl Order {
    /// Validate a creation request and build the order in CREATED.
    pub fn new(request: NewOrder, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        if request.customer.trim().is_empty() {
            return Err(ValidationError::MissingField("customer"));
        }
        if request.line_items.is_empty() {
            return Err(ValidationError::EmptyLineItems);
        }
        for item in &request.line_items {
            if item.sku.trim().is_empty() {
                return Err(ValidationError::EmptySku);
            }
            if item.quantity == 0 {
                return Err(ValidationError::InvalidQuantity {
                    sku: item.sku.clone(),
                    quantity: item.quantity,
                });
            }
        }

        let default_priority = match request.channel {
            OrderChannel::Oem => PriorityTier::Oem,
            OrderChannel::Retail => PriorityTier::Normal,
        };

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: now,
            message_id: request.message_id,
            customer: request.customer,
            channel: request.channel,
            priority: request.priority.unwrap_or(default_priority),
            line_items: request.line_items,
            expedite: request.expedite,
            state: OrderState::Created,
            promised_ship_by: None,
            requested_ship_by: request.ship_by,
            sla_breached: false,
            history: Vec::new(),
            resume_stack: Vec::new(),
        })
    }

    /// State a suspended order returns to on resume.
    pub fn resume_target(&self) -> Option<OrderState> {
        if self.state.is_suspension() {
            self.resume_stack.last().copied()
        } else {
            None
        }
    }

    /// Sum of priced line items. Unpriced items count as zero.
    pub fn total(&self) -> Decimal {
        self.line_items
            .iter()
            .filter_map(|i| i.unit_price.map(|p| p * Decimal::from(i.quantity)))
            .sum()
    }

    /// Past its ship-by without having shipped.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal()
            && !self.state.has_shipped()
            && !self.shipped_before_suspension()
            && self.promised_ship_by.is_some_and(|d| now > d)
    }

    fn shipped_before_suspension(&self) -> bool {
        self.resume_stack.iter().any(OrderState::has_shipped)
    }
}

/// Commands the task dispatcher delivers to the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OrderCommand {
    Create(NewOrder),
    Transition {
        order_id: Uuid,
        target_state: OrderState,
        actor: String,
    },
}
