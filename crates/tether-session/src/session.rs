//! Session data model and its persisted record shapes.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Proof of identity: a fully populated token pair bound to a user.
///
/// A `Session` only exists when every field is present. Persisted records
/// missing any of them convert to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
    pub email: Option<String>,
}

impl Session {
    /// Create a session.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            user_id: user_id.into(),
            email: None,
        }
    }

    /// Attach an email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Expiry as epoch seconds.
    pub fn expires_at_secs(&self) -> i64 {
        self.expires_at.timestamp()
    }

    /// True when `now + buffer` is still strictly before expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        is_fresh(self.expires_at, now, buffer)
    }

    /// Seconds until expiry, saturating at zero.
    pub fn expires_in_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }
}

/// `now + buffer < expires_at`.
pub(crate) fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> bool {
    let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);
    match now.checked_add_signed(buffer) {
        Some(deadline) => deadline < expires_at,
        None => false,
    }
}

pub(crate) fn from_epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Primary cache record
// ─────────────────────────────────────────────────────────────────────────────

/// User portion of the primary cache blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Session blob stored in the primary key-value store.
///
/// Shape: `{access_token, refresh_token, expires_at, user: {id, ...}}`.
/// Every field is optional on read so that partial blobs parse and are then
/// rejected by [`CachedSessionRecord::to_session`]. Unknown fields written by
/// the auth library are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedSessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<CachedUser>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CachedSessionRecord {
    /// Build the record written for a session.
    pub fn from_session(session: &Session) -> Self {
        Self {
            access_token: Some(session.access_token.clone()),
            refresh_token: Some(session.refresh_token.clone()),
            expires_at: Some(session.expires_at_secs()),
            user: Some(CachedUser {
                id: Some(session.user_id.clone()),
                email: session.email.clone(),
                extra: Default::default(),
            }),
            extra: Default::default(),
        }
    }

    /// The user id, if present.
    pub fn user_id(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|u| u.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// True when a non-empty refresh token is present.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Convert to a session if every field is populated. Expiry is not checked.
    pub fn to_session(&self) -> Option<Session> {
        let expires_at = from_epoch_secs(self.expires_at?)?;
        Some(Session {
            access_token: non_empty(self.access_token.clone())?,
            refresh_token: non_empty(self.refresh_token.clone())?,
            expires_at,
            user_id: self.user_id()?.to_string(),
            email: self.user.as_ref().and_then(|u| u.email.clone()),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Durable mirror record
// ─────────────────────────────────────────────────────────────────────────────

/// Session copy kept in the durable store.
///
/// Written as `{access_token, refresh_token, expires_at, user_id, saved_at}`.
/// Reads also accept the primary blob shape (`user.id`, no `saved_at`), so a
/// byte-for-byte copy of the primary record loads too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirroredSessionRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch seconds; 0 when unknown.
    pub expires_at: i64,
    /// Empty when unknown.
    pub user_id: String,
    /// Epoch milliseconds of capture; 0 when unknown.
    pub saved_at: i64,
}

#[derive(Deserialize)]
struct RawMirror {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    user_id: Option<String>,
    user: Option<CachedUser>,
    saved_at: Option<i64>,
}

impl MirroredSessionRecord {
    /// Capture a session at `saved_at`.
    pub fn capture(session: &Session, saved_at: DateTime<Utc>) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at_secs(),
            user_id: session.user_id.clone(),
            saved_at: saved_at.timestamp_millis(),
        }
    }

    /// Parse either accepted shape. `None` when the JSON is malformed or a
    /// token is missing.
    pub fn from_json(raw: &str) -> Option<Self> {
        let parsed: RawMirror = serde_json::from_str(raw).ok()?;
        let user_id = non_empty(parsed.user_id)
            .or_else(|| parsed.user.and_then(|u| non_empty(u.id)))
            .unwrap_or_default();
        Some(Self {
            access_token: non_empty(parsed.access_token)?,
            refresh_token: non_empty(parsed.refresh_token)?,
            expires_at: parsed.expires_at.unwrap_or(0),
            user_id,
            saved_at: parsed.saved_at.unwrap_or(0),
        })
    }

    /// Access-token expiry, if recorded.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.expires_at > 0 {
            from_epoch_secs(self.expires_at)
        } else {
            None
        }
    }

    /// Convert to a full session when expiry and user id are known.
    pub fn to_session(&self) -> Option<Session> {
        if self.user_id.is_empty() {
            return None;
        }
        Some(Session::new(
            self.access_token.clone(),
            self.refresh_token.clone(),
            self.expires_at()?,
            self.user_id.clone(),
        ))
    }

    /// The equivalent primary cache record, used for write-back.
    pub fn to_cached_record(&self) -> CachedSessionRecord {
        CachedSessionRecord {
            access_token: Some(self.access_token.clone()),
            refresh_token: Some(self.refresh_token.clone()),
            expires_at: (self.expires_at > 0).then_some(self.expires_at),
            user: (!self.user_id.is_empty()).then(|| CachedUser {
                id: Some(self.user_id.clone()),
                ..Default::default()
            }),
            extra: Default::default(),
        }
    }
}
