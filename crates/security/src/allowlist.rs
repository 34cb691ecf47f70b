//! Access policy — which senders may talk to the bot, and which of them
//! may run admin commands.

/// Result of checking a sender against the allowlist.
#[derive(Debug, Clone, PartialEq)]
pub enum SenderCheckResult {
    Allowed,
    Denied { sender_id: String, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    allowed_users: Vec<String>,
    admin_ids: Vec<String>,
}

impl AccessPolicy {
    pub fn new(allowed_users: Vec<String>, admin_ids: Vec<String>) -> Self {
        Self {
            allowed_users,
            admin_ids,
        }
    }

    /// A policy admitting everyone, with the given admins.
    pub fn open(admin_ids: Vec<String>) -> Self {
        Self::new(vec!["*".into()], admin_ids)
    }

    /// Check if a sender may use the bot.
    ///
    /// Rules:
    /// - If `allowed_users` is empty → deny all (secure by default)
    /// - If `allowed_users` contains `"*"` → allow all
    /// - Otherwise, sender must be in the list
    ///
    /// Admins are always allowed.
    pub fn check_sender(&self, sender_id: &str) -> SenderCheckResult {
        if self.is_admin(sender_id) {
            return SenderCheckResult::Allowed;
        }

        if self.allowed_users.is_empty() {
            return SenderCheckResult::Denied {
                sender_id: sender_id.into(),
                reason: "No users configured (deny by default)".into(),
            };
        }

        if self.allowed_users.iter().any(|u| u == "*" || u == sender_id) {
            SenderCheckResult::Allowed
        } else {
            SenderCheckResult::Denied {
                sender_id: sender_id.into(),
                reason: format!(
                    "Sender '{}' not in allowlist ({} users configured)",
                    sender_id,
                    self.allowed_users.len()
                ),
            }
        }
    }

    pub fn is_admin(&self, sender_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(users: &[&str], admins: &[&str]) -> AccessPolicy {
        AccessPolicy::new(
            users.iter().map(|s| s.to_string()).collect(),
            admins.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn empty_allowlist_denies_all() {
        let result = policy(&[], &[]).check_sender("user123");
        assert_eq!(
            result,
            SenderCheckResult::Denied {
                sender_id: "user123".into(),
                reason: "No users configured (deny by default)".into(),
            }
        );
    }

    #[test]
    fn wildcard_allows_all() {
        assert_eq!(AccessPolicy::open(vec![]).check_sender("anyone"), SenderCheckResult::Allowed);
    }

    #[test]
    fn unknown_user_denied() {
        match policy(&["user123"], &[]).check_sender("stranger") {
            SenderCheckResult::Denied { sender_id, .. } => assert_eq!(sender_id, "stranger"),
            _ => panic!("Expected denied"),
        }
    }

    #[test]
    fn admins_always_allowed() {
        let p = policy(&["user123"], &["42"]);
        assert_eq!(p.check_sender("42"), SenderCheckResult::Allowed);
        assert!(p.is_admin("42"));
        assert!(!p.is_admin("user123"));
    }
}
