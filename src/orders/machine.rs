//! Order lifecycle state machine.
//!
//! Legal edges: the single next step on the main path, suspension into
//! ON_HOLD / ESCALATED from any non-terminal state, resume back to the
//! exact state held before suspension, and CANCELLED from CREATED or
//! CONFIRMED. Requesting the current state again is a successful no-op.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, TransitionError};
use crate::escalation::log::EscalationLog;
use crate::escalation::model::{EscalationKind, Subject};
use crate::orders::model::{NewOrder, Order, OrderCommand, OrderState, Transition};
use crate::store::Repository;

/// Kind of edge a legal transition follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Target equals the current state.
    Stay,
    Advance,
    Suspend,
    Resume,
    Cancel,
}

/// Classify `order.state -> target`, or explain why it is illegal.
pub fn edge(order: &Order, target: OrderState) -> Result<Edge, &'static str> {
    let current = order.state;
    if current == target {
        return Ok(Edge::Stay);
    }
    if current.is_terminal() {
        return Err("order is in a terminal state");
    }
    if current.is_suspension() && order.resume_target() == Some(target) {
        return Ok(Edge::Resume);
    }
    if target.is_suspension() {
        return Ok(Edge::Suspend);
    }
    if current.is_suspension() {
        return Err("a suspended order may only resume to the state it was suspended from");
    }
    if target == OrderState::Cancelled {
        return if current.is_cancellable() {
            Ok(Edge::Cancel)
        } else {
            Err("cancellation is only possible from CREATED or CONFIRMED")
        };
    }
    if current.next() == Some(target) {
        return Ok(Edge::Advance);
    }
    Err("target is not the next state on the fulfillment path")
}

pub struct OrderStateMachine {
    orders: Arc<dyn Repository<Order>>,
    escalations: Arc<EscalationLog>,
    lead_time: Duration,
}

impl OrderStateMachine {
    pub fn new(
        orders: Arc<dyn Repository<Order>>,
        escalations: Arc<EscalationLog>,
        lead_time_days: u32,
    ) -> Self {
        Self {
            orders,
            escalations,
            lead_time: Duration::days(i64::from(lead_time_days)),
        }
    }

    /// Validate and store a new order in CREATED.
    pub async fn create(&self, request: NewOrder) -> Result<Order, Error> {
        let order = Order::new(request, Utc::now())?;
        self.orders.insert(order.clone()).await?;
        info!(
            order_id = %order.id,
            customer = %order.customer,
            priority = %order.priority,
            items = order.line_items.len(),
            expedite = order.expedite,
            "Order created"
        );
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Option<Order> {
        self.orders.snapshot(order_id).await
    }

    /// Apply one transition under the order's lock.
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderState,
        actor: &str,
    ) -> Result<Order, TransitionError> {
        let handle = self
            .orders
            .get(order_id)
            .await
            .ok_or(TransitionError::NotFound { order_id })?;

        let (updated, breach) = {
            let mut order = handle.lock().await;
            let now = Utc::now();

            let edge = edge(&order, target).map_err(|reason| {
                warn!(
                    order_id = %order_id,
                    from = %order.state,
                    to = %target,
                    actor,
                    reason,
                    "Illegal transition rejected"
                );
                TransitionError::Illegal {
                    order_id,
                    from: order.state,
                    to: target,
                    reason,
                }
            })?;

            if edge == Edge::Stay {
                debug!(order_id = %order_id, state = %target, actor, "Repeated transition ignored");
                return Ok(order.clone());
            }

            let breach = self.apply(&mut order, edge, target, actor, now);
            (order.clone(), breach)
        };

        if let Some(deadline) = breach {
            self.escalations
                .raise(
                    Subject::Order(order_id),
                    EscalationKind::SlaBreach,
                    format!("shipped after promised ship-by {deadline}"),
                )
                .await;
        }

        Ok(updated)
    }

    /// Mutate the order for an already-validated edge. Returns the missed
    /// ship-by when this transition first breaches it.
    fn apply(
        &self,
        order: &mut Order,
        edge: Edge,
        target: OrderState,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let from = order.state;
        match edge {
            Edge::Suspend => order.resume_stack.push(from),
            Edge::Resume => {
                order.resume_stack.pop();
            }
            Edge::Advance | Edge::Cancel | Edge::Stay => {}
        }

        order.history.push(Transition {
            from_state: from,
            to_state: target,
            timestamp: now,
            actor: actor.to_string(),
        });
        order.state = target;

        if target == OrderState::Confirmed && order.promised_ship_by.is_none() {
            let lead = now.checked_add_signed(self.lead_time).unwrap_or(DateTime::<Utc>::MAX_UTC);
            let promised = order.requested_ship_by.unwrap_or(lead);
            order.promised_ship_by = Some(promised);
            debug!(order_id = %order.id, promised_ship_by = %promised, "Ship-by promised");
        }

        info!(
            order_id = %order.id,
            from = %from,
            to = %target,
            actor,
            "Order transitioned"
        );

        if edge == Edge::Advance && target == OrderState::Shipped && !order.sla_breached {
            if let Some(deadline) = order.promised_ship_by.filter(|d| now > *d) {
                order.sla_breached = true;
                warn!(order_id = %order.id, promised_ship_by = %deadline, "Order shipped late");
                return Some(deadline);
            }
        }
        None
    }

    /// Entry point for dispatcher commands. Rejected transitions raise a
    /// FAILED_TRANSITION escalation before the error is returned.
    pub async fn execute(&self, command: OrderCommand) -> Result<Order, Error> {
        match command {
            OrderCommand::Create(request) => {
                let message_id = request.message_id;
                match self.create(request).await {
                    Ok(order) => Ok(order),
                    Err(e) => {
                        if let Some(message_id) = message_id {
                            self.escalations
                                .raise(
                                    Subject::Message(message_id),
                                    EscalationKind::FailedTransition,
                                    format!("order creation failed: {e}"),
                                )
                                .await;
                        }
                        Err(e)
                    }
                }
            }
            OrderCommand::Transition {
                order_id,
                target_state,
                actor,
            } => match self.transition(order_id, target_state, &actor).await {
                Ok(order) => Ok(order),
                Err(e) => {
                    if let TransitionError::Illegal { from, to, .. } = &e {
                        self.escalations
                            .raise(
                                Subject::Order(order_id),
                                EscalationKind::FailedTransition,
                                format!("{actor} requested {from} -> {to}"),
                            )
                            .await;
                    }
                    Err(e.into())
                }
            },
        }
    }

    /// Snapshots of all orders, each read under its own lock.
    pub async fn list(&self) -> Vec<Order> {
        let mut out = Vec::new();
        for handle in self.orders.handles().await {
            out.push(handle.lock().await.clone());
        }
        out
    }
}
