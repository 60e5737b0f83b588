use serde::{Deserialize, Serialize};
use crate::common::VerificationError;

/// Stage of a verification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    BotCheck,
    Identity,
    Biometric,
    Submitting,
    Done,
    Error,
    /// Terminal: an alternate verification channel was requested instead.
    FallbackInitiated,
}

impl Step {
    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Done | Step::FallbackInitiated)
    }
}

/// Fixed-length face descriptor produced from exactly one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for FaceDescriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Identity data staged by the user before the identity step runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInput {
    pub number: String,
    pub consent: bool,
    pub name: String,
}

/// Snapshot of a verification session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSession {
    pub step: Step,
    /// Step that produced the current `Error`.
    pub error_origin: Option<Step>,
    pub bot_check_token: Option<String>,
    pub identity_number: Option<String>,
    pub holder_name: String,
    pub consent_granted: bool,
    pub biometric_descriptor: Option<FaceDescriptor>,
    pub camera_live: bool,
    pub subject_email: String,
    pub subject_id: String,
    pub last_error: Option<VerificationError>,
    pub submission_attempts: u32,
}

impl VerificationSession {
    pub fn new(subject_email: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            step: Step::BotCheck,
            error_origin: None,
            bot_check_token: None,
            identity_number: None,
            holder_name: String::new(),
            consent_granted: false,
            biometric_descriptor: None,
            camera_live: false,
            subject_email: subject_email.into(),
            subject_id: subject_id.into(),
            last_error: None,
            submission_attempts: 0,
        }
    }

    /// Moves to `step` and clears the last error.
    pub(crate) fn transition(&mut self, step: Step) {
        self.step = step;
        self.error_origin = None;
        self.last_error = None;
    }

    /// Records a failure without leaving the current step.
    pub(crate) fn fail_in_place(&mut self, error: VerificationError) {
        self.last_error = Some(error);
    }

    /// Enters `Error`, remembering which step produced it.
    pub(crate) fn fail_to_error(&mut self, error: VerificationError) {
        self.error_origin = Some(self.step);
        self.step = Step::Error;
        self.last_error = Some(error);
    }

    /// Where recovery from the current error leads.
    pub fn recovery_step(&self) -> Option<Step> {
        match (self.step, self.error_origin) {
            (Step::Error, Some(Step::Submitting)) => Some(Step::BotCheck),
            (Step::Error, Some(origin)) => Some(origin),
            (Step::Error, None) => Some(Step::BotCheck),
            _ => None,
        }
    }

    /// Drops everything except the subject, back to `BotCheck`.
    pub(crate) fn clear(&mut self) {
        *self = Self::new(
            std::mem::take(&mut self.subject_email),
            std::mem::take(&mut self.subject_id),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;

    #[test]
    fn test_new_session_is_empty() {
        let session = VerificationSession::new("a@b.c", "user-1");
        assert_eq!(session.step, Step::BotCheck);
        assert!(session.bot_check_token.is_none());
        assert!(session.biometric_descriptor.is_none());
        assert!(session.last_error.is_none());
        assert!(!session.consent_granted);
    }

    #[test]
    fn test_submission_error_recovers_to_bot_check() {
        let mut session = VerificationSession::new("a@b.c", "user-1");
        session.step = Step::Submitting;
        session.fail_to_error(VerificationError::backend_rejected("no"));
        assert_eq!(session.step, Step::Error);
        assert_eq!(session.error_origin, Some(Step::Submitting));
        assert_eq!(session.recovery_step(), Some(Step::BotCheck));
    }

    #[test]
    fn test_transition_clears_error() {
        let mut session = VerificationSession::new("a@b.c", "user-1");
        session.fail_in_place(VerificationError::new(ErrorKind::BotCheckRejected, "x"));
        session.transition(Step::Identity);
        assert!(session.last_error.is_none());
        assert_eq!(session.recovery_step(), None);
    }

    #[test]
    fn test_clear_keeps_subject() {
        let mut session = VerificationSession::new("a@b.c", "user-1");
        session.bot_check_token = Some("t".into());
        session.step = Step::Biometric;
        session.clear();
        assert_eq!(session.step, Step::BotCheck);
        assert!(session.bot_check_token.is_none());
        assert_eq!(session.subject_id, "user-1");
    }
}
