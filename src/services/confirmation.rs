use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

/// Outcome of a confirmation-link visit. `Invalid` deliberately covers
/// unknown order, wrong token, and already-consumed token alike, so the
/// response leaks nothing about which part failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    Expired,
    Invalid,
}

impl ConfirmationOutcome {
    /// Value carried in the redirect query string.
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
        }
    }
}

/// Generates the raw placement token: 256 bits from the OS RNG, hex-encoded.
/// The raw value only ever lives in the outbound email link.
pub fn generate_raw_token() -> String {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// SHA-256 hex digest of the raw token; the only form ever persisted.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Constant-time digest comparison. Lengths are public (both sides are
/// 64-char hex digests on the happy path), the contents are not.
fn hashes_match(stored: &str, presented: &str) -> bool {
    if stored.len() != presented.len() {
        return false;
    }
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Verifies and consumes placement tokens, advancing the order to
/// `PENDING_VERIFICATION`.
#[derive(Clone)]
pub struct ConfirmationService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl ConfirmationService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Verifies a confirmation link. On success the token columns are
    /// cleared in the same conditional write that flips the status, so a
    /// link can only ever be consumed once even under concurrent visits.
    #[instrument(skip(self, raw_token), fields(order_number))]
    pub async fn confirm(
        &self,
        order_number: &str,
        raw_token: &str,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let Some(order) = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
        else {
            return Ok(ConfirmationOutcome::Invalid);
        };

        // Consumed links have a null hash and can never match again.
        let Some(stored_hash) = order.placement_token_hash.clone() else {
            return Ok(ConfirmationOutcome::Invalid);
        };

        let presented_hash = hash_token(raw_token);
        if !hashes_match(&stored_hash, &presented_hash) {
            warn!(order_id = order.id, "confirmation token mismatch");
            return Ok(ConfirmationOutcome::Invalid);
        }

        match order.placement_token_expires_at {
            Some(expires_at) if Utc::now() <= expires_at => {}
            Some(_) => return Ok(ConfirmationOutcome::Expired),
            None => return Ok(ConfirmationOutcome::Invalid),
        }

        // Single conditional write: consume the token and transition. Zero
        // affected rows means a concurrent visit got here first.
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::PendingVerification.to_string()),
            )
            .col_expr(
                order::Column::PlacementTokenHash,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                order::Column::PlacementTokenExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PlacementTokenHash.eq(stored_hash))
            .filter(order::Column::Status.eq(OrderStatus::PendingConfirmation.to_string()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(ConfirmationOutcome::Invalid);
        }

        info!(order_id = order.id, "order confirmed by customer");

        let event = Event::OrderStatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone().unwrap_or_default(),
            email: order.email.clone(),
            old_status: order.status.clone(),
            new_status: OrderStatus::PendingVerification.to_string(),
        };
        if let Err(e) = self.event_sender.send(event).await {
            warn!(order_id = order.id, error = %e, "failed to send confirmation event");
        }

        Ok(ConfirmationOutcome::Confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tokens_are_256_bit_hex_and_unique() {
        let a = generate_raw_token();
        let b = generate_raw_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_sha256_hex() {
        // sha256("abc")
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_comparison() {
        let raw = generate_raw_token();
        let hash = hash_token(&raw);
        assert!(hashes_match(&hash, &hash_token(&raw)));
        assert!(!hashes_match(&hash, &hash_token("something-else")));
        assert!(!hashes_match(&hash, "short"));
    }

    #[test]
    fn outcome_query_values() {
        assert_eq!(ConfirmationOutcome::Confirmed.as_query_value(), "confirmed");
        assert_eq!(ConfirmationOutcome::Expired.as_query_value(), "expired");
        assert_eq!(ConfirmationOutcome::Invalid.as_query_value(), "invalid");
    }
}
