#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use secure_auth::backend::{FallbackRequest, VerifySecureRequest};
use secure_auth::{
    BiometricCapture, BotCheck, ControllerSettings, FaceDescriptor, HostCallbacks,
    VerificationBackend, VerificationController, VerificationError,
};

pub const DESCRIPTOR_LENGTH: usize = 4;

pub type TestController =
    VerificationController<ScriptedBotCheck, ScriptedCapture, ScriptedBackend, RecordingHost>;

pub struct Harness {
    pub controller: Arc<TestController>,
    pub bot_check: ScriptedBotCheck,
    pub capture: ScriptedCapture,
    pub backend: ScriptedBackend,
    pub host: RecordingHost,
}

pub fn settings() -> ControllerSettings {
    ControllerSettings {
        descriptor_length: DESCRIPTOR_LENGTH,
        bot_check_timeout: Duration::from_millis(500),
        acquire_timeout: Duration::from_millis(500),
        detect_timeout: Duration::from_millis(500),
        backend_timeout: Duration::from_millis(500),
        ..ControllerSettings::default()
    }
}

pub fn harness() -> Harness {
    harness_with(settings(), |c| c)
}

pub fn harness_with(
    settings: ControllerSettings,
    configure: impl FnOnce(TestController) -> TestController,
) -> Harness {
    let bot_check = ScriptedBotCheck::default();
    let capture = ScriptedCapture::default();
    let backend = ScriptedBackend::default();
    let host = RecordingHost::default();
    let controller = configure(VerificationController::new(
        bot_check.clone(),
        capture.clone(),
        backend.clone(),
        host.clone(),
        settings,
    ));
    Harness {
        controller: Arc::new(controller),
        bot_check,
        capture,
        backend,
        host,
    }
}

pub fn descriptor(seed: f32) -> FaceDescriptor {
    FaceDescriptor::new((0..DESCRIPTOR_LENGTH).map(|i| seed + i as f32).collect())
}

// ---- bot check ----

#[derive(Clone, Default)]
pub struct ScriptedBotCheck {
    inner: Arc<BotCheckState>,
}

#[derive(Default)]
struct BotCheckState {
    tokens: Mutex<VecDeque<Result<String, VerificationError>>>,
    load_error: Mutex<Option<VerificationError>>,
    loads: AtomicUsize,
    executions: AtomicUsize,
}

impl ScriptedBotCheck {
    pub fn push_token(&self, token: &str) {
        self.inner.tokens.lock().push_back(Ok(token.to_string()));
    }

    pub fn push_error(&self, error: VerificationError) {
        self.inner.tokens.lock().push_back(Err(error));
    }

    pub fn fail_load(&self, error: VerificationError) {
        *self.inner.load_error.lock() = Some(error);
    }

    pub fn loads(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.inner.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BotCheck for ScriptedBotCheck {
    async fn load(&self) -> Result<(), VerificationError> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        match self.inner.load_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn execute(&self, _action_tag: &str) -> Result<String, VerificationError> {
        let n = self.inner.executions.fetch_add(1, Ordering::SeqCst);
        self.inner
            .tokens
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("token-{}", n + 1)))
    }
}

// ---- biometric capture ----

#[derive(Clone, Default)]
pub struct ScriptedCapture {
    inner: Arc<CaptureState>,
}

#[derive(Default)]
struct CaptureState {
    acquire_error: Mutex<Option<VerificationError>>,
    acquire_delay: Mutex<Option<Duration>>,
    release_delay: Mutex<Option<Duration>>,
    detections: Mutex<VecDeque<Result<FaceDescriptor, VerificationError>>>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    next_handle: AtomicUsize,
    loads: AtomicUsize,
    acquired: Mutex<Vec<u32>>,
    released: Mutex<Vec<u32>>,
}

impl ScriptedCapture {
    pub fn deny_camera(&self) {
        *self.inner.acquire_error.lock() =
            Some(VerificationError::camera_access_denied("Permission denied"));
    }

    pub fn allow_camera(&self) {
        *self.inner.acquire_error.lock() = None;
    }

    pub fn delay_acquire(&self, delay: Duration) {
        *self.inner.acquire_delay.lock() = Some(delay);
    }

    pub fn delay_release(&self, delay: Duration) {
        *self.inner.release_delay.lock() = Some(delay);
    }

    pub fn push_face(&self, descriptor: FaceDescriptor) {
        self.inner.detections.lock().push_back(Ok(descriptor));
    }

    pub fn push_error(&self, error: VerificationError) {
        self.inner.detections.lock().push_back(Err(error));
    }

    /// Makes the next detection wait: `entered` fires when it starts, it
    /// finishes once `release` is notified.
    pub fn hold_detection(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.inner.gate.lock() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn loads(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> Vec<u32> {
        self.inner.acquired.lock().clone()
    }

    pub fn released(&self) -> Vec<u32> {
        self.inner.released.lock().clone()
    }

    /// Every acquired handle was released exactly once.
    pub fn assert_balanced(&self) {
        let mut acquired = self.acquired();
        let mut released = self.released();
        acquired.sort_unstable();
        released.sort_unstable();
        assert_eq!(acquired, released, "acquired and released handles differ");
    }
}

#[async_trait]
impl BiometricCapture for ScriptedCapture {
    type Handle = u32;

    async fn ensure_loaded(&self) -> Result<(), VerificationError> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn acquire_stream(&self) -> Result<u32, VerificationError> {
        let delay = *self.inner.acquire_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.inner.acquire_error.lock().clone() {
            return Err(error);
        }
        let handle = self.inner.next_handle.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        self.inner.acquired.lock().push(handle);
        Ok(handle)
    }

    async fn detect_and_describe(&self, handle: &u32) -> Result<FaceDescriptor, VerificationError> {
        assert!(!self.inner.released.lock().contains(handle), "detect on released handle");
        let gate = self.inner.gate.lock().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        self.inner
            .detections
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(VerificationError::no_face()))
    }

    async fn release_stream(&self, handle: u32) {
        let delay = *self.inner.release_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.released.lock().push(handle);
    }
}

// ---- backend ----

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    inner: Arc<BackendState>,
}

#[derive(Default)]
struct BackendState {
    verify_results: Mutex<VecDeque<Result<Value, VerificationError>>>,
    fallback_result: Mutex<Option<VerificationError>>,
    verify_delay: Mutex<Option<Duration>>,
    verify_requests: Mutex<Vec<VerifySecureRequest>>,
    fallback_requests: Mutex<Vec<FallbackRequest>>,
}

impl ScriptedBackend {
    pub fn push_verify(&self, result: Result<Value, VerificationError>) {
        self.inner.verify_results.lock().push_back(result);
    }

    pub fn fail_fallback(&self, error: VerificationError) {
        *self.inner.fallback_result.lock() = Some(error);
    }

    pub fn delay_verify(&self, delay: Duration) {
        *self.inner.verify_delay.lock() = Some(delay);
    }

    pub fn verify_requests(&self) -> Vec<VerifySecureRequest> {
        self.inner.verify_requests.lock().clone()
    }

    pub fn fallback_requests(&self) -> Vec<FallbackRequest> {
        self.inner.fallback_requests.lock().clone()
    }
}

#[async_trait]
impl VerificationBackend for ScriptedBackend {
    async fn verify_secure(&self, request: &VerifySecureRequest) -> Result<Value, VerificationError> {
        self.inner.verify_requests.lock().push(request.clone());
        let delay = *self.inner.verify_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner
            .verify_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Value::Null))
    }

    async fn request_fallback(&self, request: &FallbackRequest) -> Result<(), VerificationError> {
        self.inner.fallback_requests.lock().push(request.clone());
        match self.inner.fallback_result.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ---- host ----

#[derive(Clone, Default)]
pub struct RecordingHost {
    inner: Arc<HostState>,
}

#[derive(Default)]
struct HostState {
    successes: Mutex<Vec<Value>>,
    closes: AtomicUsize,
    fallbacks: AtomicUsize,
}

impl RecordingHost {
    pub fn successes(&self) -> Vec<Value> {
        self.inner.successes.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn fallbacks(&self) -> usize {
        self.inner.fallbacks.load(Ordering::SeqCst)
    }
}

impl HostCallbacks for RecordingHost {
    fn on_success(&self, data: Value) {
        self.inner.successes.lock().push(data);
    }

    fn on_close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_fallback_initiated(&self) {
        self.inner.fallbacks.fetch_add(1, Ordering::SeqCst);
    }
}
