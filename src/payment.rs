//! Payment-request workflow
//!
//! Two-step handshake decoupled in time: the user requests a plan from an
//! inline button, the admin later activates it. Callback payloads are decoded
//! once at the boundary into a closed action type; anything unrecognized is a
//! validation error, never silently dropped.

use crate::error::{Error, Result};
use crate::license::LicenseManager;
use crate::users::{Plan, UserStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Decoded inline-button action.
///
/// `RequestPayment` carries the acting user baked into the payload at render
/// time; the handler must check it against the event's actual sender before
/// touching any record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    RequestPayment { plan: Plan, acting_user: String },
    CancelPayment,
}

/// Wire payload for a plan-request button.
pub fn encode_request(plan: Plan, acting_user: &str) -> String {
    format!("pay_{}_{}", plan.as_str(), acting_user)
}

/// Wire payload for the cancel button.
pub const CANCEL_PAYLOAD: &str = "cancel_payment";

/// Decode a raw callback payload. Rejects anything that is not exactly one
/// of the known shapes.
pub fn decode_callback(data: &[u8]) -> Result<CallbackAction> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::InvalidCallback("non-utf8 payload".to_string()))?;

    if text == CANCEL_PAYLOAD {
        return Ok(CallbackAction::CancelPayment);
    }

    if let Some(rest) = text.strip_prefix("pay_") {
        if let Some((plan_raw, user_id)) = rest.split_once('_') {
            if user_id.is_empty() {
                return Err(Error::InvalidCallback(text.to_string()));
            }
            let plan: Plan = plan_raw.parse()?;
            return Ok(CallbackAction::RequestPayment {
                plan,
                acting_user: user_id.to_string(),
            });
        }
    }

    Err(Error::InvalidCallback(text.to_string()))
}

/// Verify that the identity embedded in the action matches the actual event
/// sender. A mismatch is a security fault: rejected without mutating.
pub fn authorize(action: &CallbackAction, sender_id: &str) -> Result<()> {
    match action {
        CallbackAction::RequestPayment { acting_user, .. } if acting_user != sender_id => {
            Err(Error::Unauthorized(format!(
                "callback for user {} from sender {}",
                acting_user, sender_id
            )))
        }
        _ => Ok(()),
    }
}

/// Outcome of a successful payment request, used to build the admin and
/// user notifications.
#[derive(Debug, Clone)]
pub struct PaymentTicket {
    pub user_id: String,
    pub plan: Plan,
    pub requested_at: DateTime<Utc>,
}

/// Record a payment request.
///
/// Re-requesting the same plan while a fresh request is pending fails with
/// `AlreadyRequested`; a different plan overwrites the pending request
/// (last write wins). `pending_ttl` is the configurable staleness policy:
/// a pending request older than the ttl no longer blocks anything.
pub async fn request_payment(
    licenses: &mut LicenseManager,
    user_id: &str,
    plan: Plan,
    pending_ttl: Option<Duration>,
) -> Result<PaymentTicket> {
    // Lazy registration, same as first contact
    licenses.register_new_user(user_id).await?;

    let now = Utc::now();
    let record = licenses
        .store_mut()
        .get_mut(user_id)
        .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

    if record.status == UserStatus::PaymentRequested && record.requested_plan == Some(plan) {
        let stale = match (pending_ttl, record.payment_requested_at) {
            (Some(ttl), Some(at)) => {
                now - at > chrono::Duration::from_std(ttl).unwrap_or_default()
            }
            _ => false,
        };
        if !stale {
            return Err(Error::AlreadyRequested(plan.as_str().to_string()));
        }
    }

    record.status = UserStatus::PaymentRequested;
    record.requested_plan = Some(plan);
    record.payment_requested_at = Some(now);
    record.updated_at = now;

    licenses.store().save().await?;

    Ok(PaymentTicket {
        user_id: user_id.to_string(),
        plan,
        requested_at: now,
    })
}

/// Clear a pending payment request. Always safe: a call with nothing
/// pending is a no-op. Status reverts to inactive unless the record is
/// already active.
pub async fn cancel_payment(licenses: &mut LicenseManager, user_id: &str) -> Result<()> {
    let Some(record) = licenses.store_mut().get_mut(user_id) else {
        return Ok(());
    };

    if record.status != UserStatus::PaymentRequested && record.requested_plan.is_none() {
        return Ok(());
    }

    record.requested_plan = None;
    record.payment_requested_at = None;
    if record.status == UserStatus::PaymentRequested {
        record.status = UserStatus::Inactive;
    }
    record.updated_at = Utc::now();

    licenses.store().save().await?;
    Ok(())
}
