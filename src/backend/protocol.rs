use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request types
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifySecureRequest {
    pub user_id: String,
    pub email: String,
    pub recaptcha_token: String,
    pub aadhaar_data: AadhaarData,
    pub face_data: FaceData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AadhaarData {
    pub aadhaar_number: String,
    pub consent: bool,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaceData {
    pub descriptors: Vec<f32>,
    pub method: String,
    pub reference_descriptors: Vec<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRequest {
    pub user_id: String,
    pub email: String,
    pub reason: String,
    pub alternate_method: String,
}

// Response types
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerifySecureResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

// Endpoint paths
pub const VERIFY_SECURE_PATH: &str = "/api/auth/verify-secure";
pub const FALLBACK_PATH: &str = "/api/auth/fallback-verification";

// Reason sent when biometric capture could not complete
pub const FACE_CAPTURE_FAILED: &str = "Face capture failed";
