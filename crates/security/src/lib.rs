//! Security module for ClawdVC: admission control, credential sealing and
//! sender access policy.
//!
//! Provides:
//! - **Rate limiting**: sliding-window admission per requester identity
//! - **Secrets**: AES-256-GCM sealing of linked-account credentials at rest
//! - **Allowlists**: sender validation and admin checks

pub mod allowlist;
pub mod rate_limit;
pub mod secrets;

pub use allowlist::{AccessPolicy, SenderCheckResult};
pub use rate_limit::RateLimiter;
pub use secrets::{SecretError, SecretsManager};
