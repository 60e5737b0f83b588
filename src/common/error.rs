use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecureAuthError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Enrollment not found: {0}")]
    EnrollmentNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),
}

pub type Result<T> = std::result::Result<T, SecureAuthError>;

/// Machine-checkable kind of a verification flow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    BotCheckUnavailable,
    BotCheckRejected,
    InvalidIdentityFormat,
    ConsentRequired,
    CameraAccessDenied,
    NoFaceDetected,
    MultipleFacesDetected,
    BackendRejected,
    BackendUnreachable,
    /// The action is not allowed in the current step.
    InvalidTransition,
    /// Another action is still in flight; nothing was done.
    Busy,
}

impl ErrorKind {
    /// Failures the same user fixes by retrying the same step.
    pub fn is_locally_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidIdentityFormat
                | ErrorKind::ConsentRequired
                | ErrorKind::NoFaceDetected
                | ErrorKind::MultipleFacesDetected
        )
    }
}

/// A verification flow failure: a kind plus a human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct VerificationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VerificationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bot_check_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BotCheckUnavailable, message)
    }

    pub fn bot_check_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BotCheckRejected, message)
    }

    pub fn camera_access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CameraAccessDenied, message)
    }

    pub fn no_face() -> Self {
        Self::new(
            ErrorKind::NoFaceDetected,
            "No face detected. Please ensure your face is clearly visible.",
        )
    }

    pub fn multiple_faces(count: usize) -> Self {
        Self::new(
            ErrorKind::MultipleFacesDetected,
            format!("{} faces detected. Only one person may be in frame.", count),
        )
    }

    pub fn backend_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendRejected, message)
    }

    pub fn backend_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnreachable, message)
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTransition, message)
    }

    pub fn busy() -> Self {
        Self::new(ErrorKind::Busy, "Another verification action is in progress")
    }
}
