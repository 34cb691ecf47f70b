//! Linked external accounts.
//!
//! A requester may link one session credential per platform. The credential
//! is opaque to the engine and only ever handed to that requester's own
//! tool invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Identity;

/// An opaque session credential (cookie/token blob).
///
/// `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCredential([REDACTED])")
    }
}

impl std::fmt::Display for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub owner: Identity,
    pub platform: String,
    pub credential: SessionCredential,
    pub linked_at: DateTime<Utc>,
}

impl LinkedAccount {
    pub fn new(owner: Identity, platform: impl Into<String>, credential: SessionCredential) -> Self {
        Self {
            owner,
            platform: platform.into(),
            credential,
            linked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_never_formats_its_value() {
        let account = LinkedAccount::new(
            Identity::from("42"),
            "x",
            SessionCredential::new("auth_token=secret; ct0=abc"),
        );
        let debug = format!("{account:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(account.credential.to_string(), "[REDACTED]");
        assert_eq!(account.credential.expose(), "auth_token=secret; ct0=abc");
    }
}
