// Core modules
pub mod core;
pub mod backend;
pub mod biometric;
pub mod bot_check;
pub mod camera;
pub mod storage;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, ErrorKind, Result, SecureAuthError, VerificationError};
pub use core::{
    ControllerSettings, FaceDescriptor, HostCallbacks, Step, VerificationController,
    VerificationSession,
};
pub use backend::{HttpVerificationBackend, VerificationBackend};
pub use biometric::{BiometricCapture, CameraFaceCapture};
pub use bot_check::{BotCheck, HttpBotCheck};
pub use storage::{EnrollmentStore, ReferenceStore};

/// Controller wired to the HTTP collaborators and the local camera.
pub type DeviceController<H> =
    VerificationController<HttpBotCheck, CameraFaceCapture, HttpVerificationBackend, H>;

/// Builds a [`DeviceController`] from configuration.
pub fn device_controller<H: HostCallbacks>(config: &Config, host: H) -> DeviceController<H> {
    VerificationController::new(
        HttpBotCheck::new(&config.bot_check),
        CameraFaceCapture::new(config),
        HttpVerificationBackend::new(&config.backend),
        host,
        ControllerSettings::from_config(config),
    )
}
