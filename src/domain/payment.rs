//! Payment aggregate and lifecycle state machine
//!
//! All status transitions flow through the transition tables here; use cases
//! never compare statuses ad hoc.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid payment transition: {from} -> {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("invalid session transition: {from} -> {to}")]
    InvalidSessionTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("invalid amount: {amount} (must be a positive minor-unit integer)")]
    InvalidAmount { amount: i64 },

    #[error("expires_at must be after created_at")]
    InvalidExpiry,

    #[error("payment already has a captured session")]
    DuplicateCapture,

    #[error("no session found for provider order {provider_order_id}")]
    SessionNotFound { provider_order_id: String },

    #[error("unsupported provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Paypal,
    Razorpay,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::Paypal => "paypal",
            Provider::Razorpay => "razorpay",
        }
    }

    pub fn all() -> [Provider; 3] {
        [Provider::Stripe, Provider::Paypal, Provider::Razorpay]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(Provider::Stripe),
            "paypal" => Ok(Provider::Paypal),
            "razorpay" => Ok(Provider::Razorpay),
            _ => Err(DomainError::UnknownProvider(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Resolved,
    Success,
    Failed,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Resolved => "resolved",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Expired
        )
    }

    /// Edges of the lifecycle graph. Terminal states have no outgoing edges.
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Resolved,
                PaymentStatus::Success,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
                PaymentStatus::Expired,
            ],
            PaymentStatus::Resolved => &[PaymentStatus::Success, PaymentStatus::Failed],
            PaymentStatus::Success
            | PaymentStatus::Failed
            | PaymentStatus::Cancelled
            | PaymentStatus::Expired => &[],
        }
    }

    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "resolved" => Ok(PaymentStatus::Resolved),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    PendingApproval,
    Approved,
    Captured,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::PendingApproval => "pending_approval",
            SessionStatus::Approved => "approved",
            SessionStatus::Captured => "captured",
            SessionStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::PendingApproval => 1,
            SessionStatus::Approved => 2,
            SessionStatus::Captured => 3,
            SessionStatus::Failed => 4,
        }
    }

    /// Sessions only move forward along the approval chain; any non-failed
    /// state may fail.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        if *self == SessionStatus::Failed {
            return false;
        }
        if to == SessionStatus::Failed {
            return true;
        }
        to.rank() > self.rank() && to != SessionStatus::Failed
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(SessionStatus::Created),
            "pending_approval" => Ok(SessionStatus::PendingApproval),
            "approved" => Ok(SessionStatus::Approved),
            "captured" => Ok(SessionStatus::Captured),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// One attempt at charging a payment through a named provider.
///
/// Sessions are append-only within a payment and carry the amount as it was
/// presented to the provider, which may differ from the payment's original
/// amount when an FX conversion was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSession {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub provider: Provider,
    pub provider_order_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_amount: i64,
    pub provider_currency: String,
    pub fx_rate: Option<BigDecimal>,
    pub fx_timestamp: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderSession {
    fn transition_to(&mut self, to: SessionStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidSessionTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

/// Aggregate root for a single user purchase attempt on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: Uuid,
    pub status: PaymentStatus,
    pub provider_order_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sessions: Vec<ProviderSession>,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        order_id: Uuid,
        amount: i64,
        currency: impl Into<String>,
        idempotency_key: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if amount <= 0 {
            return Err(DomainError::InvalidAmount { amount });
        }
        if expires_at <= now {
            return Err(DomainError::InvalidExpiry);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            order_id,
            amount,
            currency: currency.into(),
            idempotency_key,
            status: PaymentStatus::Pending,
            provider_order_id: None,
            expires_at,
            created_at: now,
            updated_at: now,
            sessions: Vec::new(),
        })
    }

    /// Request a lifecycle transition.
    ///
    /// Returns `Ok(true)` when the transition was applied, `Ok(false)` for
    /// the idempotent re-entries (success on success, failure on failure),
    /// and `InvalidTransition` for every other forbidden edge.
    pub fn transition_to(
        &mut self,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        if self.status == to
            && matches!(to, PaymentStatus::Success | PaymentStatus::Failed)
        {
            return Ok(false);
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(true)
    }

    pub fn add_session(&mut self, session: ProviderSession) {
        self.sessions.push(session);
    }

    pub fn session_by_provider_order(&self, provider_order_id: &str) -> Option<&ProviderSession> {
        self.sessions
            .iter()
            .find(|s| s.provider_order_id.as_deref() == Some(provider_order_id))
    }

    fn session_by_provider_order_mut(
        &mut self,
        provider_order_id: &str,
    ) -> Result<&mut ProviderSession, DomainError> {
        self.sessions
            .iter_mut()
            .find(|s| s.provider_order_id.as_deref() == Some(provider_order_id))
            .ok_or_else(|| DomainError::SessionNotFound {
                provider_order_id: provider_order_id.to_string(),
            })
    }

    /// Mark the matching session captured. At most one session per payment
    /// may ever hold `Captured`.
    pub fn capture_session(
        &mut self,
        provider_order_id: &str,
        provider_payment_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let already_captured = self.sessions.iter().any(|s| {
            s.status == SessionStatus::Captured
                && s.provider_order_id.as_deref() != Some(provider_order_id)
        });
        if already_captured {
            return Err(DomainError::DuplicateCapture);
        }
        let session = self.session_by_provider_order_mut(provider_order_id)?;
        session.transition_to(SessionStatus::Captured, now)?;
        if provider_payment_id.is_some() {
            session.provider_payment_id = provider_payment_id;
        }
        Ok(())
    }

    pub fn fail_session(
        &mut self,
        provider_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let session = self.session_by_provider_order_mut(provider_order_id)?;
        session.transition_to(SessionStatus::Failed, now)
    }

    pub fn captured_session(&self) -> Option<&ProviderSession> {
        self.sessions
            .iter()
            .find(|s| s.status == SessionStatus::Captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_payment() -> Payment {
        let now = Utc::now();
        Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            5000,
            "USD",
            Uuid::new_v4(),
            now + Duration::minutes(10),
            now,
        )
        .expect("valid payment")
    }

    fn session_for(payment: &Payment, order_id: &str) -> ProviderSession {
        let now = Utc::now();
        ProviderSession {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            provider: Provider::Stripe,
            provider_order_id: Some(order_id.to_string()),
            provider_payment_id: None,
            provider_amount: payment.amount,
            provider_currency: payment.currency.clone(),
            fx_rate: None,
            fx_timestamp: None,
            status: SessionStatus::Created,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn zero_amount_is_rejected() {
        let now = Utc::now();
        let err = Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            0,
            "USD",
            Uuid::new_v4(),
            now + Duration::minutes(10),
            now,
        )
        .unwrap_err();
        assert_eq!(err, DomainError::InvalidAmount { amount: 0 });
    }

    #[test]
    fn one_minor_unit_is_accepted() {
        let now = Utc::now();
        let payment = Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            "USD",
            Uuid::new_v4(),
            now + Duration::minutes(10),
            now,
        );
        assert!(payment.is_ok());
    }

    #[test]
    fn expiry_must_be_after_creation() {
        let now = Utc::now();
        let err = Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            100,
            "USD",
            Uuid::new_v4(),
            now,
            now,
        )
        .unwrap_err();
        assert_eq!(err, DomainError::InvalidExpiry);
    }

    #[test]
    fn pending_reaches_every_spec_edge() {
        for to in [
            PaymentStatus::Resolved,
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Expired,
        ] {
            assert!(PaymentStatus::Pending.can_transition_to(to), "pending -> {}", to);
        }
    }

    #[test]
    fn resolved_only_terminates() {
        assert!(PaymentStatus::Resolved.can_transition_to(PaymentStatus::Success));
        assert!(PaymentStatus::Resolved.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Resolved.can_transition_to(PaymentStatus::Cancelled));
        assert!(!PaymentStatus::Resolved.can_transition_to(PaymentStatus::Expired));
        assert!(!PaymentStatus::Resolved.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn terminal_states_have_no_edges() {
        for terminal in [
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
            assert!(terminal.valid_transitions().is_empty());
        }
    }

    #[test]
    fn success_on_success_is_idempotent() {
        let mut payment = base_payment();
        let now = Utc::now();
        assert!(payment.transition_to(PaymentStatus::Success, now).unwrap());
        assert!(!payment.transition_to(PaymentStatus::Success, now).unwrap());
    }

    #[test]
    fn cancelled_rejects_success() {
        let mut payment = base_payment();
        let now = Utc::now();
        payment.transition_to(PaymentStatus::Cancelled, now).unwrap();
        let err = payment
            .transition_to(PaymentStatus::Success, now)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn transition_stamps_updated_at() {
        let mut payment = base_payment();
        let later = payment.updated_at + Duration::seconds(30);
        payment.transition_to(PaymentStatus::Resolved, later).unwrap();
        assert_eq!(payment.updated_at, later);
    }

    #[test]
    fn at_most_one_captured_session() {
        let mut payment = base_payment();
        let a = session_for(&payment, "ord_a");
        let b = session_for(&payment, "ord_b");
        payment.add_session(a);
        payment.add_session(b);

        let now = Utc::now();
        payment
            .capture_session("ord_a", Some("pay_1".to_string()), now)
            .unwrap();
        let err = payment
            .capture_session("ord_b", Some("pay_2".to_string()), now)
            .unwrap_err();
        assert_eq!(err, DomainError::DuplicateCapture);
    }

    #[test]
    fn capture_is_idempotent_for_same_session() {
        let mut payment = base_payment();
        payment.add_session(session_for(&payment, "ord_a"));
        let now = Utc::now();
        payment.capture_session("ord_a", None, now).unwrap();
        assert!(payment.capture_session("ord_a", None, now).is_ok());
    }

    #[test]
    fn failed_session_cannot_recover() {
        assert!(!SessionStatus::Failed.can_transition_to(SessionStatus::Captured));
        assert!(SessionStatus::Created.can_transition_to(SessionStatus::Captured));
        assert!(SessionStatus::Approved.can_transition_to(SessionStatus::Failed));
    }

    #[test]
    fn provider_round_trips_through_str() {
        for provider in Provider::all() {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert!("square".parse::<Provider>().is_err());
    }
}
