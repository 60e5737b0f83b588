pub mod enrollment_store;

use crate::core::session::FaceDescriptor;

pub use enrollment_store::{EnrollmentRecord, EnrollmentStore, average_embeddings};

/// Source of previously enrolled reference descriptors.
pub trait ReferenceStore: Send + Sync {
    fn reference_for(&self, subject_id: &str) -> Option<FaceDescriptor>;
}
