pub mod controller;
pub mod detector;
pub mod host;
pub mod identity;
pub mod recognizer;
pub mod session;

pub use controller::{ControllerSettings, VerificationController};
pub use detector::{FaceDetector, FaceBox};
pub use host::{HostCallbacks, LoggingHost};
pub use recognizer::{FaceRecognizer, cosine_similarity, Embedding};
pub use session::{FaceDescriptor, IdentityInput, Step, VerificationSession};
