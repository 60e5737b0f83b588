use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::backend::protocol::{FALLBACK_PATH, VERIFY_SECURE_PATH};
use crate::common::error::{SecureAuthError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub bot_check: BotCheckConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub biometric: BiometricConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BotCheckConfig {
    pub site_key: String,
    pub script_url: String,
    pub execute_url: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,
}

fn default_action() -> String { "secure_auth".to_string() }
fn default_call_timeout() -> u64 { 10_000 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_verify_path")]
    pub verify_path: String,
    #[serde(default = "default_fallback_path")]
    pub fallback_path: String,
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_fallback_method")]
    pub fallback_method: String,
}

fn default_verify_path() -> String { VERIFY_SECURE_PATH.to_string() }
fn default_fallback_path() -> String { FALLBACK_PATH.to_string() }
fn default_connect_timeout() -> u64 { 5_000 }
fn default_fallback_method() -> String { "otp".to_string() }

/// Where `referenceDescriptors` comes from when submitting.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    /// Send the just-captured descriptor as its own reference.
    #[default]
    Captured,
    /// Send the subject's averaged enrolled descriptor.
    Enrolled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BiometricConfig {
    #[serde(default = "default_descriptor_length")]
    pub descriptor_length: usize,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub reference: ReferencePolicy,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_call_timeout")]
    pub detect_timeout_ms: u64,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
}

fn default_descriptor_length() -> usize { 128 }
fn default_method() -> String { "face-descriptor".to_string() }
fn default_acquire_timeout() -> u64 { 15_000 }
fn default_detection_confidence() -> f32 { 0.5 }

impl Default for BiometricConfig {
    fn default() -> Self {
        Self {
            descriptor_length: default_descriptor_length(),
            method: default_method(),
            reference: ReferencePolicy::default(),
            acquire_timeout_ms: default_acquire_timeout(),
            detect_timeout_ms: default_call_timeout(),
            detection_confidence: default_detection_confidence(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_warmup_delay() -> u64 {
    50
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            warmup_frames: 5,
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { input_width: 640, input_height: 640 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    pub input_size: u32,
    pub normalization_value: f32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self { input_size: 112, normalization_value: 127.5 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the platform data directory for enrolled descriptors.
    #[serde(default)]
    pub enrollment_dir: Option<PathBuf>,
}

impl BotCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn verify_url(&self) -> String {
        join_url(&self.base_url, &self.verify_path)
    }

    pub fn fallback_url(&self) -> String {
        join_url(&self.base_url, &self.fallback_path)
    }
}

impl BiometricConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

const MAX_TIMEOUT_MS: u64 = 120_000;

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/secure-auth.toml";
        Self::load_from_path(Path::new(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SecureAuthError::Config(format!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| SecureAuthError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Endpoints
        for (name, url) in [
            ("bot_check.script_url", &self.bot_check.script_url),
            ("bot_check.execute_url", &self.bot_check.execute_url),
            ("backend.base_url", &self.backend.base_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| {
                SecureAuthError::Config(format!("{} is not a valid URL ({}): {}", name, url, e))
            })?;
        }
        if self.bot_check.site_key.trim().is_empty() {
            return Err(SecureAuthError::Config("bot_check.site_key must not be empty".into()));
        }
        if self.bot_check.action.trim().is_empty() {
            return Err(SecureAuthError::Config("bot_check.action must not be empty".into()));
        }

        // Timeouts
        for (name, value) in [
            ("bot_check.timeout_ms", self.bot_check.timeout_ms),
            ("backend.timeout_ms", self.backend.timeout_ms),
            ("backend.connect_timeout_ms", self.backend.connect_timeout_ms),
            ("biometric.acquire_timeout_ms", self.biometric.acquire_timeout_ms),
            ("biometric.detect_timeout_ms", self.biometric.detect_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(SecureAuthError::Config(format!(
                    "{} must be between 1 and {}, got {}", name, MAX_TIMEOUT_MS, value
                )));
            }
        }

        // Descriptor
        if self.biometric.descriptor_length == 0 || self.biometric.descriptor_length > 4096 {
            return Err(SecureAuthError::Config(format!(
                "Descriptor length must be between 1 and 4096, got {}",
                self.biometric.descriptor_length
            )));
        }
        if self.biometric.detection_confidence < 0.0 || self.biometric.detection_confidence > 1.0 {
            return Err(SecureAuthError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.biometric.detection_confidence
            )));
        }

        // Validate camera dimensions
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(SecureAuthError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(SecureAuthError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        // Validate detector dimensions
        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(SecureAuthError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(SecureAuthError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(SecureAuthError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"
[bot_check]
site_key = "site-key"
script_url = "https://botcheck.example/api.js"
execute_url = "https://botcheck.example/execute"

[backend]
base_url = "https://api.example/"

[biometric]
descriptor_length = 128
reference = "enrolled"

[models]
detector_path = "models/detector.onnx"
recognizer_path = "models/recognizer.onnx"
"#;
