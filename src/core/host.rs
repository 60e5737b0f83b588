use serde_json::Value;

/// Integration points of the page hosting a verification session.
pub trait HostCallbacks: Send + Sync {
    /// Verification succeeded; `data` is the backend's payload, untouched.
    fn on_success(&self, data: Value);

    /// The session was closed and all state discarded.
    fn on_close(&self);

    /// An out-of-band verification channel was started; the host may close.
    fn on_fallback_initiated(&self);
}

/// Host that only logs. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl HostCallbacks for LoggingHost {
    fn on_success(&self, data: Value) {
        tracing::info!("Verification succeeded: {}", data);
    }

    fn on_close(&self) {
        tracing::info!("Verification session closed");
    }

    fn on_fallback_initiated(&self) {
        tracing::info!("Alternate verification initiated");
    }
}
