//! Correlation handle for one outstanding submission.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identifies one submission until it is consumed by a completion or by expiry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationHandle {
    pub id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CorrelationHandle {
    /// Create a handle with a generated id
    pub fn generate(account_id: impl Into<String>, timeout: Duration) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), account_id, timeout)
    }

    pub fn with_id(id: impl Into<String>, account_id: impl Into<String>, timeout: Duration) -> Self {
        Self::created_at(id, account_id, Utc::now(), timeout)
    }

    pub fn created_at(
        id: impl Into<String>,
        account_id: impl Into<String>,
        created_at: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        // Saturate instead of overflowing on absurd timeouts.
        let validity = ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::MAX);
        let expires_at = created_at
            .checked_add_signed(validity)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id: id.into(),
            account_id: account_id.into(),
            created_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn timeout(&self) -> Duration {
        (self.expires_at - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
