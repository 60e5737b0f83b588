use crate::common::{DevMode, Result, SecureAuthError};
use crate::core::recognizer::Embedding;
use crate::core::session::FaceDescriptor;
use crate::storage::ReferenceStore;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const STORAGE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub version: u32,
    pub subject_id: String,
    pub descriptors: Vec<Embedding>,
    #[serde(default)]
    pub averaged_descriptor: Option<Embedding>,
    pub updated_at: i64,
}

/// Enrolled face descriptors, one bincode file per subject.
pub struct EnrollmentStore {
    data_dir: PathBuf,
}

impl EnrollmentStore {
    pub fn new_with_path(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn new_with_dev_mode(dev_mode: &DevMode, override_dir: Option<&Path>) -> Result<Self> {
        let data_dir = match (override_dir, dev_mode.enrollment_dir()) {
            (Some(dir), _) => dir.to_path_buf(),
            (None, Some(dev_dir)) => dev_dir,
            (None, None) => {
                let dirs = ProjectDirs::from("com", "secureauth", "SecureAuth")
                    .ok_or_else(|| SecureAuthError::Storage("Failed to get project dirs".into()))?;
                dirs.data_dir().join("enrollment")
            }
        };

        tracing::debug!("EnrollmentStore using {:?}", data_dir);
        Self::new_with_path(data_dir)
    }

    fn record_path(&self, subject_id: &str) -> Result<PathBuf> {
        // Subject ids come from the host; keep them out of path syntax.
        if subject_id.is_empty()
            || !subject_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
            || subject_id.starts_with('.')
        {
            return Err(SecureAuthError::Storage(format!("Invalid subject id: {:?}", subject_id)));
        }
        Ok(self.data_dir.join(format!("{}.bincode", subject_id)))
    }

    pub fn save(&self, record: &EnrollmentRecord) -> Result<()> {
        let path = self.record_path(&record.subject_id)?;
        let encoded = bincode::serialize(record)
            .map_err(|e| SecureAuthError::Storage(format!("Failed to serialize: {}", e)))?;
        fs::write(path, encoded)?;
        Ok(())
    }

    pub fn get(&self, subject_id: &str) -> Result<EnrollmentRecord> {
        let path = self.record_path(subject_id)?;

        if !path.exists() {
            return Err(SecureAuthError::EnrollmentNotFound(subject_id.to_string()));
        }

        let data = fs::read(path)?;
        let mut record: EnrollmentRecord = bincode::deserialize(&data)
            .map_err(|e| SecureAuthError::Storage(format!("Failed to deserialize: {}", e)))?;

        if record.version < STORAGE_VERSION {
            record.version = STORAGE_VERSION;
        }

        Ok(record)
    }

    /// Adds a descriptor to the subject's enrollment, creating it if needed.
    pub fn enroll(&self, subject_id: &str, descriptor: &FaceDescriptor) -> Result<EnrollmentRecord> {
        let mut record = match self.get(subject_id) {
            Ok(record) => record,
            Err(SecureAuthError::EnrollmentNotFound(_)) => EnrollmentRecord {
                version: STORAGE_VERSION,
                subject_id: subject_id.to_string(),
                descriptors: Vec::new(),
                averaged_descriptor: None,
                updated_at: 0,
            },
            Err(e) => return Err(e),
        };

        if let Some(first) = record.descriptors.first() {
            if first.len() != descriptor.len() {
                return Err(SecureAuthError::Storage(format!(
                    "Descriptor length {} does not match enrolled length {}",
                    descriptor.len(),
                    first.len()
                )));
            }
        }

        record.descriptors.push(descriptor.as_slice().to_vec());
        record.averaged_descriptor = Some(average_embeddings(&record.descriptors));
        record.updated_at = chrono::Utc::now().timestamp();
        self.save(&record)?;
        Ok(record)
    }

    pub fn remove(&self, subject_id: &str) -> Result<()> {
        let path = self.record_path(subject_id)?;
        if !path.exists() {
            return Err(SecureAuthError::EnrollmentNotFound(subject_id.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

impl ReferenceStore for EnrollmentStore {
    fn reference_for(&self, subject_id: &str) -> Option<FaceDescriptor> {
        match self.get(subject_id) {
            Ok(record) => record.averaged_descriptor.map(FaceDescriptor::new),
            Err(SecureAuthError::EnrollmentNotFound(_)) => None,
            Err(e) => {
                tracing::warn!("Failed to read enrollment for {}: {}", subject_id, e);
                None
            }
        }
    }
}

pub fn average_embeddings(embeddings: &[Embedding]) -> Embedding {
    let Some(first) = embeddings.first() else {
        return vec![];
    };

    let mut averaged = vec![0.0f32; first.len()];
    for embedding in embeddings {
        for (sum, &value) in averaged.iter_mut().zip(embedding) {
            *sum += value;
        }
    }

    let count = embeddings.len() as f32;
    for value in &mut averaged {
        *value /= count;
    }

    averaged
}
