//! Verification backend collaborator.

pub mod client;
pub mod protocol;

use async_trait::async_trait;
use serde_json::Value;
use crate::common::VerificationError;

pub use client::HttpVerificationBackend;
pub use protocol::{AadhaarData, FaceData, FallbackRequest, VerifySecureRequest, VerifySecureResponse};

#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// Submits the assembled payload. Returns the backend's opaque `data` on acceptance.
    async fn verify_secure(&self, request: &VerifySecureRequest) -> Result<Value, VerificationError>;

    /// Asks for an alternate verification channel. Any acceptance is enough.
    async fn request_fallback(&self, request: &FallbackRequest) -> Result<(), VerificationError>;
}
