use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

use crate::biometric::{single_face, BiometricCapture};
use crate::camera::CameraStream;
use crate::common::{Config, ErrorKind, SecureAuthError, VerificationError};
use crate::core::detector::FaceDetector;
use crate::core::recognizer::FaceRecognizer;
use crate::core::session::FaceDescriptor;

struct FaceModels {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

/// Live camera stream handed out by [`CameraFaceCapture`].
pub struct VideoHandle {
    stream: CameraStream,
}

/// V4L2 camera with ONNX face detection and description.
pub struct CameraFaceCapture {
    config: Config,
    models: OnceCell<Arc<FaceModels>>,
}

impl CameraFaceCapture {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            models: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.models.initialized()
    }

    async fn models(&self) -> Result<Arc<FaceModels>, VerificationError> {
        let config = self.config.clone();
        let models = self
            .models
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || -> crate::common::Result<Arc<FaceModels>> {
                    let start = Instant::now();
                    let models = FaceModels {
                        detector: FaceDetector::new(&config)?,
                        recognizer: FaceRecognizer::new(&config)?,
                    };
                    tracing::info!("Face models loaded in {:.1}ms", start.elapsed().as_secs_f32() * 1000.0);
                    Ok(Arc::new(models))
                })
                .await
                .map_err(|e| SecureAuthError::Model(format!("Model loading task failed: {}", e)))?
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to load face models: {}", e);
                VerificationError::camera_access_denied(format!("Face detection models unavailable: {}", e))
            })?;
        Ok(Arc::clone(models))
    }
}

#[async_trait]
impl BiometricCapture for CameraFaceCapture {
    type Handle = VideoHandle;

    async fn ensure_loaded(&self) -> Result<(), VerificationError> {
        self.models().await.map(|_| ())
    }

    async fn acquire_stream(&self) -> Result<VideoHandle, VerificationError> {
        let camera_config = self.config.camera.clone();
        let stream = tokio::task::spawn_blocking(move || CameraStream::open(&camera_config))
            .await
            .map_err(|e| VerificationError::camera_access_denied(format!("Camera task failed: {}", e)))?
            .map_err(|e| {
                tracing::warn!("Camera access failed: {}", e);
                VerificationError::camera_access_denied(format!(
                    "Unable to access camera. Please check permissions. ({})", e
                ))
            })?;
        Ok(VideoHandle { stream })
    }

    async fn detect_and_describe(&self, handle: &VideoHandle) -> Result<FaceDescriptor, VerificationError> {
        let models = self.models().await?;

        let capture_start = Instant::now();
        let frame = handle.stream.capture_frame().await.map_err(|e| {
            VerificationError::new(ErrorKind::NoFaceDetected, format!("Failed to capture frame: {}", e))
        })?;
        let capture_time = capture_start.elapsed();

        let detect_start = Instant::now();
        let embedding = tokio::task::spawn_blocking(move || {
            let faces = models.detector.detect(&frame).map_err(|e| {
                VerificationError::new(ErrorKind::NoFaceDetected, format!("Detection error: {}", e))
            })?;
            let face = single_face(&faces)?;
            models.recognizer.get_embedding(&frame, face).map_err(|e| {
                VerificationError::new(ErrorKind::NoFaceDetected, format!("Failed to describe face: {}", e))
            })
        })
        .await
        .map_err(|e| VerificationError::new(ErrorKind::NoFaceDetected, format!("Detection task failed: {}", e)))??;

        tracing::debug!(
            "Capture timing: capture={:.1}ms, detect+describe={:.1}ms",
            capture_time.as_secs_f32() * 1000.0,
            detect_start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(FaceDescriptor::new(embedding))
    }

    async fn release_stream(&self, handle: VideoHandle) {
        // Joining the capture thread blocks until the device is closed.
        if let Err(e) = tokio::task::spawn_blocking(move || handle.stream.stop()).await {
            tracing::error!("Camera release task failed: {}", e);
        }
    }
}
