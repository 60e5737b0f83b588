//! Biometric capture collaborator: camera stream plus face description.

pub mod device;

use async_trait::async_trait;
use crate::common::VerificationError;
use crate::core::detector::FaceBox;
use crate::core::session::FaceDescriptor;

pub use device::{CameraFaceCapture, VideoHandle};

#[async_trait]
pub trait BiometricCapture: Send + Sync {
    /// Opaque live stream. Only ever passed back to this collaborator.
    type Handle: Send + Sync + 'static;

    /// Loads the detection capability once. Idempotent.
    async fn ensure_loaded(&self) -> Result<(), VerificationError>;

    /// Fails with `CameraAccessDenied` when no stream can be opened.
    async fn acquire_stream(&self) -> Result<Self::Handle, VerificationError>;

    /// Describes the single face in the current frame.
    ///
    /// Zero faces is `NoFaceDetected`, more than one is `MultipleFacesDetected`.
    async fn detect_and_describe(&self, handle: &Self::Handle) -> Result<FaceDescriptor, VerificationError>;

    /// Must be called exactly once for every handle `acquire_stream` returned.
    async fn release_stream(&self, handle: Self::Handle);
}

/// Maps a detection result to the single face it must contain.
pub fn single_face(faces: &[FaceBox]) -> Result<&FaceBox, VerificationError> {
    match faces {
        [] => Err(VerificationError::no_face()),
        [face] => Ok(face),
        many => Err(VerificationError::multiple_faces(many.len())),
    }
}
