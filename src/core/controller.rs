//! Verification session controller.
//!
//! Drives one session through bot-check, identity, biometric capture and
//! submission. Every public action takes `&self`; at most one action runs at a
//! time and an overlapping call returns `Busy` without touching the session.
//! Session state is never locked across an `.await`: each action snapshots
//! what it needs, performs its external call, then applies the result only if
//! the session was not closed or restarted in between.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::protocol::{AadhaarData, FaceData, FallbackRequest, VerifySecureRequest, FACE_CAPTURE_FAILED};
use crate::backend::VerificationBackend;
use crate::biometric::BiometricCapture;
use crate::bot_check::BotCheck;
use crate::common::{Config, ErrorKind, ReferencePolicy, VerificationError};
use crate::core::host::HostCallbacks;
use crate::core::identity;
use crate::core::session::{FaceDescriptor, IdentityInput, Step, VerificationSession};
use crate::storage::ReferenceStore;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub action_tag: String,
    pub descriptor_length: usize,
    pub method: String,
    pub reference: ReferencePolicy,
    pub fallback_method: String,
    pub bot_check_timeout: Duration,
    pub acquire_timeout: Duration,
    pub detect_timeout: Duration,
    pub backend_timeout: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            action_tag: config.bot_check.action.clone(),
            descriptor_length: config.biometric.descriptor_length,
            method: config.biometric.method.clone(),
            reference: config.biometric.reference,
            fallback_method: config.backend.fallback_method.clone(),
            bot_check_timeout: config.bot_check.timeout(),
            acquire_timeout: config.biometric.acquire_timeout(),
            detect_timeout: config.biometric.detect_timeout(),
            backend_timeout: config.backend.timeout(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            action_tag: "secure_auth".to_string(),
            descriptor_length: 128,
            method: "face-descriptor".to_string(),
            reference: ReferencePolicy::Captured,
            fallback_method: "otp".to_string(),
            bot_check_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(15),
            detect_timeout: Duration::from_secs(10),
            backend_timeout: Duration::from_secs(10),
        }
    }
}

pub struct VerificationController<B, C, V, H>
where
    C: BiometricCapture,
{
    bot_check: B,
    capture: C,
    backend: V,
    host: H,
    settings: ControllerSettings,
    references: Option<Arc<dyn ReferenceStore>>,
    session: Mutex<Option<VerificationSession>>,
    staged_identity: Mutex<IdentityInput>,
    /// Bumped under the session lock whenever the session is replaced.
    epoch: AtomicU64,
    stream: tokio::sync::Mutex<Option<C::Handle>>,
    busy: AtomicBool,
}

/// Clears the busy flag when the action finishes, however it finishes.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn within<T, F>(limit: Duration, call: F, on_timeout: impl FnOnce() -> VerificationError) -> Result<T, VerificationError>
where
    F: Future<Output = Result<T, VerificationError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

impl<B, C, V, H> VerificationController<B, C, V, H>
where
    B: BotCheck,
    C: BiometricCapture,
    V: VerificationBackend,
    H: HostCallbacks,
{
    pub fn new(bot_check: B, capture: C, backend: V, host: H, settings: ControllerSettings) -> Self {
        Self {
            bot_check,
            capture,
            backend,
            host,
            settings,
            references: None,
            session: Mutex::new(None),
            staged_identity: Mutex::new(IdentityInput::default()),
            epoch: AtomicU64::new(0),
            stream: tokio::sync::Mutex::new(None),
            busy: AtomicBool::new(false),
        }
    }

    /// Source of enrolled descriptors for `ReferencePolicy::Enrolled`.
    pub fn with_reference_store(mut self, store: Arc<dyn ReferenceStore>) -> Self {
        self.references = Some(store);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn current_state(&self) -> Option<VerificationSession> {
        self.session.lock().clone()
    }

    // ---- session lifecycle ----

    /// Opens a fresh session at `BotCheck` and preloads the bot-check script.
    pub async fn start(
        &self,
        subject_email: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Result<VerificationSession, VerificationError> {
        let _in_flight = self.begin()?;
        self.release_camera().await;

        let epoch = {
            let mut session = self.session.lock();
            *session = Some(VerificationSession::new(subject_email, subject_id));
            *self.staged_identity.lock() = IdentityInput::default();
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        tracing::info!("Verification session started");

        let loaded = within(self.settings.bot_check_timeout, self.bot_check.load(), || {
            VerificationError::bot_check_unavailable("Timed out loading the verification script")
        })
        .await;
        if let Err(e) = loaded {
            tracing::warn!("Bot-check script failed to load: {}", e);
            self.update(epoch, |s| s.fail_in_place(e.clone()))?;
        }

        self.snapshot()
    }

    /// Back to `BotCheck` for the same subject, dropping everything else.
    pub async fn reset(&self) -> Result<VerificationSession, VerificationError> {
        let _in_flight = self.begin()?;
        self.release_camera().await;

        let mut guard = self.session.lock();
        let session = guard
            .as_mut()
            .ok_or_else(|| VerificationError::invalid_transition("No verification session started"))?;
        session.clear();
        *self.staged_identity.lock() = IdentityInput::default();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Verification session reset");
        Ok(session.clone())
    }

    /// Discards the session, releases the camera and notifies the host.
    ///
    /// Works at any step, also while another action is in flight; that
    /// action's result is then dropped.
    pub async fn close(&self) {
        {
            let mut session = self.session.lock();
            *session = None;
            *self.staged_identity.lock() = IdentityInput::default();
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.release_camera().await;
        tracing::info!("Verification session closed");
        self.host.on_close();
    }

    /// Stages identity input for the identity step. No validation happens here.
    pub fn set_identity(
        &self,
        identity_number: impl Into<String>,
        consent_granted: bool,
        holder_name: impl Into<String>,
    ) -> Result<(), VerificationError> {
        if self.session.lock().is_none() {
            return Err(VerificationError::invalid_transition("No verification session started"));
        }
        *self.staged_identity.lock() = IdentityInput {
            number: identity_number.into(),
            consent: consent_granted,
            name: holder_name.into(),
        };
        Ok(())
    }

    // ---- step actions ----

    /// Runs whatever action the current step calls for.
    pub async fn advance(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        let (step, camera_live) = {
            let session = self.session.lock();
            let session = session
                .as_ref()
                .ok_or_else(|| VerificationError::invalid_transition("No verification session started"))?;
            (session.step, session.camera_live)
        };

        match step {
            Step::BotCheck => self.do_bot_check().await,
            Step::Identity => self.do_identity(),
            Step::Biometric if !camera_live => self.do_start_camera().await,
            Step::Biometric => self.do_capture().await,
            Step::Submitting => self.do_submit().await,
            Step::Error => self.do_recover(),
            Step::Done | Step::FallbackInitiated => Err(self.reject("Verification already finished")),
        }
    }

    /// One step back: `Identity -> BotCheck`, `Biometric -> Identity`, `Error -> recovery`.
    pub async fn retreat(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        let (epoch, session) = self.expect_step(
            |s| matches!(s.step, Step::Identity | Step::Biometric | Step::Error),
            "go back",
        )?;

        match session.step {
            Step::Identity => self.update(epoch, |s| {
                s.bot_check_token = None;
                s.transition(Step::BotCheck);
                Step::BotCheck
            }),
            Step::Biometric => {
                self.release_camera().await;
                self.update(epoch, |s| {
                    s.biometric_descriptor = None;
                    s.camera_live = false;
                    s.transition(Step::Identity);
                    Step::Identity
                })
            }
            _ => self.do_recover(),
        }
    }

    pub async fn run_bot_check(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        self.do_bot_check().await
    }

    pub async fn submit_identity(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        self.do_identity()
    }

    pub async fn start_camera(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        self.do_start_camera().await
    }

    /// Captures one frame; on a single face, submits immediately.
    pub async fn capture_once(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        self.do_capture().await
    }

    pub async fn submit(&self) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        self.do_submit().await
    }

    /// Requests an alternate verification channel, bypassing biometrics.
    pub async fn request_fallback(&self, reason: Option<&str>) -> Result<Step, VerificationError> {
        let _in_flight = self.begin()?;
        let (epoch, session) = self.expect_step(
            |s| {
                s.step == Step::Biometric
                    || (s.step == Step::Error
                        && matches!(s.error_origin, Some(Step::Biometric | Step::Submitting)))
            },
            "request fallback verification",
        )?;

        self.release_camera().await;
        // Closed while the camera was being released: nothing to fall back for.
        self.update(epoch, |s| s.camera_live = false)?;

        let request = FallbackRequest {
            user_id: session.subject_id.clone(),
            email: session.subject_email.clone(),
            reason: reason.unwrap_or(FACE_CAPTURE_FAILED).to_string(),
            alternate_method: self.settings.fallback_method.clone(),
        };
        tracing::info!("Requesting fallback verification ({})", request.reason);

        let result = within(self.settings.backend_timeout, self.backend.request_fallback(&request), || {
            VerificationError::backend_unreachable("Fallback verification request timed out")
        })
        .await;

        match result {
            Ok(()) => {
                self.update(epoch, |s| {
                    s.bot_check_token = None;
                    s.transition(Step::FallbackInitiated);
                })?;
                tracing::info!("Fallback verification initiated");
                self.host.on_fallback_initiated();
                Ok(Step::FallbackInitiated)
            }
            Err(e) => {
                tracing::warn!("Fallback verification failed: {}", e);
                self.update(epoch, |s| s.fail_in_place(e.clone()))?;
                Err(e)
            }
        }
    }

    // ---- step handlers (caller holds the in-flight guard) ----

    async fn do_bot_check(&self) -> Result<Step, VerificationError> {
        let (epoch, _) = self.expect_step(|s| s.step == Step::BotCheck, "run the bot check")?;

        let result = within(
            self.settings.bot_check_timeout,
            self.bot_check.execute(&self.settings.action_tag),
            || VerificationError::bot_check_unavailable("Bot-check timed out"),
        )
        .await;

        match result {
            Ok(token) => self.update(epoch, |s| {
                s.bot_check_token = Some(token);
                s.transition(Step::Identity);
                tracing::info!("Bot check passed");
                Step::Identity
            }),
            Err(e) => {
                tracing::warn!("Bot check failed: {}", e);
                self.update(epoch, |s| s.fail_in_place(e.clone()))?;
                Err(e)
            }
        }
    }

    fn do_identity(&self) -> Result<Step, VerificationError> {
        let (epoch, _) = self.expect_step(|s| s.step == Step::Identity, "submit identity")?;
        let input = self.staged_identity.lock().clone();

        match identity::validate(&input.number, input.consent) {
            Ok(()) => self.update(epoch, |s| {
                tracing::info!(
                    "Identity accepted: {} ({})",
                    identity::mask(&input.number),
                    identity::fingerprint(&input.number)
                );
                s.identity_number = Some(input.number);
                s.consent_granted = input.consent;
                s.holder_name = input.name;
                s.transition(Step::Biometric);
                Step::Biometric
            }),
            Err(e) => {
                tracing::debug!("Identity rejected: {}", e);
                self.update(epoch, |s| s.fail_in_place(e.clone()))?;
                Err(e)
            }
        }
    }

    async fn do_start_camera(&self) -> Result<Step, VerificationError> {
        let (epoch, _) = self.expect_step(|s| s.step == Step::Biometric, "start the camera")?;

        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            return Ok(Step::Biometric);
        }

        let acquired = within(
            self.settings.acquire_timeout,
            async {
                self.capture.ensure_loaded().await?;
                self.capture.acquire_stream().await
            },
            || VerificationError::camera_access_denied("Timed out waiting for camera access"),
        )
        .await;

        match acquired {
            Ok(handle) => {
                let stored = self.update(epoch, |s| {
                    if s.step == Step::Biometric {
                        s.camera_live = true;
                        s.last_error = None;
                        true
                    } else {
                        false
                    }
                });
                match stored {
                    Ok(true) => {
                        *slot = Some(handle);
                        tracing::info!("Camera started");
                        Ok(Step::Biometric)
                    }
                    _ => {
                        // Session moved on while the camera was opening.
                        self.capture.release_stream(handle).await;
                        Err(stored.err().unwrap_or_else(|| {
                            VerificationError::invalid_transition("Session left the biometric step")
                        }))
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Camera unavailable: {}", e);
                self.update(epoch, |s| s.fail_in_place(e.clone()))?;
                Err(e)
            }
        }
    }

    async fn do_capture(&self) -> Result<Step, VerificationError> {
        let (epoch, _) = self.expect_step(|s| s.step == Step::Biometric, "capture")?;

        let mut slot = self.stream.lock().await;
        let Some(handle) = slot.as_ref() else {
            return Err(self.reject("Camera is not started"));
        };

        let described = within(
            self.settings.detect_timeout,
            self.capture.detect_and_describe(handle),
            || VerificationError::new(ErrorKind::NoFaceDetected, "Face detection timed out"),
        )
        .await
        .and_then(|descriptor| self.check_descriptor(descriptor));

        let descriptor = match described {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::debug!("Capture failed: {}", e);
                self.update(epoch, |s| s.fail_in_place(e.clone()))?;
                return Err(e);
            }
        };

        if let Some(handle) = slot.take() {
            self.capture.release_stream(handle).await;
        }
        drop(slot);

        self.update(epoch, |s| {
            s.camera_live = false;
            s.biometric_descriptor = Some(descriptor);
            s.transition(Step::Submitting);
        })?;
        tracing::info!("Face captured");

        self.do_submit().await
    }

    async fn do_submit(&self) -> Result<Step, VerificationError> {
        let (epoch, _) = self.expect_step(|s| s.step == Step::Submitting, "submit")?;

        // The token is consumed by this attempt whatever its outcome.
        let session = self.update(epoch, |s| {
            let snapshot = s.clone();
            s.bot_check_token = None;
            s.submission_attempts += 1;
            snapshot
        })?;

        let request = match self.build_request(&session) {
            Ok(request) => request,
            Err(e) => {
                self.update(epoch, |s| s.fail_to_error(e.clone()))?;
                return Err(e);
            }
        };

        tracing::info!("Submitting verification (attempt {})", session.submission_attempts + 1);
        let result = within(self.settings.backend_timeout, self.backend.verify_secure(&request), || {
            VerificationError::backend_unreachable("Verification request timed out")
        })
        .await;

        match result {
            Ok(data) => {
                self.update(epoch, |s| s.transition(Step::Done))?;
                tracing::info!("Verification complete");
                self.host.on_success(data);
                Ok(Step::Done)
            }
            Err(e) => {
                tracing::warn!("Verification submission failed: {}", e);
                self.update(epoch, |s| s.fail_to_error(e.clone()))?;
                Err(e)
            }
        }
    }

    fn do_recover(&self) -> Result<Step, VerificationError> {
        let (epoch, session) = self.expect_step(|s| s.step == Step::Error, "recover")?;
        let target = session.recovery_step().unwrap_or(Step::BotCheck);

        self.update(epoch, |s| {
            if target == Step::BotCheck {
                s.bot_check_token = None;
                s.identity_number = None;
                s.consent_granted = false;
                s.biometric_descriptor = None;
            }
            s.transition(target);
            tracing::info!("Recovered from error to {:?}", target);
            target
        })
    }

    // ---- helpers ----

    fn build_request(&self, session: &VerificationSession) -> Result<VerifySecureRequest, VerificationError> {
        let token = session.bot_check_token.clone().ok_or_else(|| {
            VerificationError::bot_check_rejected("Bot-check token missing or already used")
        })?;
        let identity_number = session.identity_number.clone().ok_or_else(|| {
            VerificationError::new(ErrorKind::InvalidIdentityFormat, "Identity number missing")
        })?;
        let descriptor = session
            .biometric_descriptor
            .clone()
            .ok_or_else(VerificationError::no_face)?;

        let reference_descriptors = match self.settings.reference {
            ReferencePolicy::Captured => descriptor.as_slice().to_vec(),
            ReferencePolicy::Enrolled => {
                match self.references.as_ref().and_then(|r| r.reference_for(&session.subject_id)) {
                    Some(reference) => reference.into_inner(),
                    None => {
                        tracing::warn!("No enrolled reference for subject; sending none");
                        Vec::new()
                    }
                }
            }
        };

        Ok(VerifySecureRequest {
            user_id: session.subject_id.clone(),
            email: session.subject_email.clone(),
            recaptcha_token: token,
            aadhaar_data: AadhaarData {
                aadhaar_number: identity_number,
                consent: session.consent_granted,
                name: session.holder_name.clone(),
            },
            face_data: FaceData {
                descriptors: descriptor.into_inner(),
                method: self.settings.method.clone(),
                reference_descriptors,
            },
        })
    }

    fn check_descriptor(&self, descriptor: FaceDescriptor) -> Result<FaceDescriptor, VerificationError> {
        if descriptor.len() == self.settings.descriptor_length {
            Ok(descriptor)
        } else {
            Err(VerificationError::new(
                ErrorKind::NoFaceDetected,
                format!(
                    "Face descriptor has {} values, expected {}",
                    descriptor.len(),
                    self.settings.descriptor_length
                ),
            ))
        }
    }

    fn begin(&self) -> Result<InFlight<'_>, VerificationError> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| InFlight(&self.busy))
            .map_err(|_| VerificationError::busy())
    }

    /// Checks the current step, recording a rejection on the session if it is wrong.
    fn expect_step(
        &self,
        allowed: impl Fn(&VerificationSession) -> bool,
        action: &str,
    ) -> Result<(u64, VerificationSession), VerificationError> {
        let mut guard = self.session.lock();
        let session = guard
            .as_mut()
            .ok_or_else(|| VerificationError::invalid_transition("No verification session started"))?;

        if allowed(session) {
            Ok((self.epoch.load(Ordering::SeqCst), session.clone()))
        } else {
            let err = VerificationError::invalid_transition(format!(
                "Cannot {} during {:?}",
                action, session.step
            ));
            session.fail_in_place(err.clone());
            Err(err)
        }
    }

    /// Applies `f` if the session is still the one the action started on.
    fn update<R>(&self, epoch: u64, f: impl FnOnce(&mut VerificationSession) -> R) -> Result<R, VerificationError> {
        let mut guard = self.session.lock();
        match guard.as_mut() {
            Some(session) if self.epoch.load(Ordering::SeqCst) == epoch => Ok(f(session)),
            _ => Err(VerificationError::invalid_transition(
                "Verification session was closed or restarted",
            )),
        }
    }

    fn reject(&self, message: &str) -> VerificationError {
        let err = VerificationError::invalid_transition(message);
        if let Some(session) = self.session.lock().as_mut() {
            session.fail_in_place(err.clone());
        }
        err
    }

    fn snapshot(&self) -> Result<VerificationSession, VerificationError> {
        self.current_state()
            .ok_or_else(|| VerificationError::invalid_transition("Verification session was closed"))
    }

    async fn release_camera(&self) {
        let handle = self.stream.lock().await.take();
        if let Some(handle) = handle {
            self.capture.release_stream(handle).await;
            tracing::debug!("Camera released");
        }
    }
}

impl<B, C, V, H> Drop for VerificationController<B, C, V, H>
where
    C: BiometricCapture,
{
    fn drop(&mut self) {
        if self.stream.get_mut().is_some() {
            tracing::warn!("Verification controller dropped with a live camera; call close() first");
        }
    }
}
