//! Bot-check collaborator: yields a short-lived opaque token on demand.

pub mod http;

use async_trait::async_trait;
use crate::common::VerificationError;

pub use http::HttpBotCheck;

#[async_trait]
pub trait BotCheck: Send + Sync {
    /// Makes the verification script available. Idempotent.
    async fn load(&self) -> Result<(), VerificationError>;

    /// Returns a fresh token for `action_tag`.
    ///
    /// Fails with `BotCheckUnavailable` when the service cannot be reached
    /// and `BotCheckRejected` when it refuses to issue a token.
    async fn execute(&self, action_tag: &str) -> Result<String, VerificationError>;
}
