use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Whether `from -> to` is a legal lifecycle move. The fulfilment chain is
/// strictly forward; the only sideways moves are the terminal `Cancelled`
/// and `Rejected`, reachable from any non-terminal state. A no-op move to
/// the same status is not a transition.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    if from == to {
        return false;
    }

    match (from, to) {
        (_, Cancelled) | (_, Rejected) => !from.is_terminal(),
        (Draft, PendingConfirmation)
        | (PendingConfirmation, PendingVerification)
        | (PendingVerification, Verified)
        | (Verified, Processing)
        | (Processing, Shipped)
        | (Shipped, Delivered) => true,
        _ => false,
    }
}

/// Drives admin-side lifecycle moves. Every write is conditional on the
/// status the caller saw, so two admins racing on the same order cannot
/// both win.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order to `new_status`, enforcing the transition table.
    #[instrument(skip(self), fields(order_id, status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: i64,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let current = order
            .status()
            .map_err(|_| ServiceError::InvalidStatus(order.status.clone()))?;

        if !can_transition(current, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: new_status.to_string(),
            });
        }

        let now = Utc::now();
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)));
        if new_status == OrderStatus::Verified {
            update = update.col_expr(order::Column::VerifiedAt, Expr::value(Some(now)));
        }

        // Conditional on the status we just read; zero rows means someone
        // else moved the order first.
        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.to_string()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id, "order status changed concurrently");
            return Err(ServiceError::Conflict(format!(
                "Order {} was updated concurrently",
                order_id
            )));
        }

        counter!("order_status_transitions_total", 1);
        info!(order_id, from = %current, to = %new_status, "order status updated");

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                order_number: order.order_number.clone().unwrap_or_default(),
                email: order.email.clone(),
                old_status: current.to_string(),
                new_status: new_status.to_string(),
            })
            .await
        {
            warn!(order_id, error = %e, "failed to send status event");
        }

        Ok(OrderModel {
            status: new_status.to_string(),
            verified_at: verified_at_after(order.verified_at, new_status, now),
            updated_at: Some(now),
            ..order
        })
    }

    /// Payment-verification decision on a `PENDING_VERIFICATION` order.
    pub async fn verify(&self, order_id: i64, approve: bool) -> Result<OrderModel, ServiceError> {
        let target = if approve {
            OrderStatus::Verified
        } else {
            OrderStatus::Rejected
        };
        self.update_status(order_id, target).await
    }

    /// Cancels an order from any non-terminal state. The reason is recorded
    /// in the log stream only; the customer note stays untouched.
    pub async fn cancel(
        &self,
        order_id: i64,
        reason: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        if let Some(reason) = &reason {
            info!(order_id, %reason, "order cancellation requested");
        }
        self.update_status(order_id, OrderStatus::Cancelled).await
    }
}

fn verified_at_after(
    existing: Option<DateTime<Utc>>,
    new_status: OrderStatus,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if new_status == OrderStatus::Verified {
        Some(now)
    } else {
        existing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn forward_chain_is_allowed() {
        assert!(can_transition(Draft, PendingConfirmation));
        assert!(can_transition(PendingConfirmation, PendingVerification));
        assert!(can_transition(PendingVerification, Verified));
        assert!(can_transition(Verified, Processing));
        assert!(can_transition(Processing, Shipped));
        assert!(can_transition(Shipped, Delivered));
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        assert!(!can_transition(PendingConfirmation, Verified));
        assert!(!can_transition(PendingVerification, Processing));
        assert!(!can_transition(Verified, Shipped));
        assert!(!can_transition(PendingConfirmation, Delivered));
    }

    #[test]
    fn moving_backwards_is_rejected() {
        assert!(!can_transition(Verified, PendingVerification));
        assert!(!can_transition(Shipped, Processing));
        assert!(!can_transition(Delivered, Shipped));
    }

    #[test]
    fn same_status_is_not_a_transition() {
        assert!(!can_transition(Processing, Processing));
        assert!(!can_transition(Cancelled, Cancelled));
    }

    #[test]
    fn cancel_and_reject_from_any_non_terminal_state() {
        for from in [
            Draft,
            PendingConfirmation,
            PendingVerification,
            Verified,
            Processing,
            Shipped,
        ] {
            assert!(can_transition(from, Cancelled), "{from} -> CANCELLED");
            assert!(can_transition(from, Rejected), "{from} -> REJECTED");
        }
    }

    #[test]
    fn terminal_states_are_frozen() {
        for from in [Delivered, Rejected, Cancelled] {
            for to in [
                Draft,
                PendingConfirmation,
                PendingVerification,
                Verified,
                Processing,
                Shipped,
                Delivered,
                Rejected,
                Cancelled,
            ] {
                if from == to {
                    continue;
                }
                assert!(!can_transition(from, to), "{from} -> {to}");
            }
        }
    }
}
