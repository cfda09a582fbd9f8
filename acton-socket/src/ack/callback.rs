use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// Success handler for a pending acknowledgement
pub enum AckHandler {
    /// Receives the first positional result, if any
    Single(Box<dyn FnOnce(Option<Value>) + Send>),
    /// Receives every positional result
    Multi(Box<dyn FnOnce(Vec<Value>) + Send>),
}

/// Which [`AckHandler`] variant a callback carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCallbackKind {
    /// Single-value callback
    Single,
    /// Multi-value callback
    Multi,
}

/// Metadata about a pending callback, used by decoders that need to know how
/// many results to expect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckCallbackInfo {
    /// Handler shape
    pub kind: AckCallbackKind,
    /// Timeout, `None` waits while the session lives
    pub timeout: Option<Duration>,
}

/// Callback resolved when an acknowledgement arrives or times out
///
/// Exactly one of the success handler and the timeout handler runs.
///
/// # Example
///
/// ```rust,ignore
/// let callback = AckCallback::single(|result| {
///     tracing::info!(?result, "client acknowledged");
/// })
/// .with_timeout_secs(5)
/// .on_timeout(|| tracing::warn!("client did not answer"));
/// ```
pub struct AckCallback {
    handler: AckHandler,
    timeout_handler: Option<Box<dyn FnOnce() + Send>>,
    timeout: Option<Duration>,
}

impl AckCallback {
    /// Callback receiving the first result
    pub fn single<F>(f: F) -> Self
    where
        F: FnOnce(Option<Value>) + Send + 'static,
    {
        Self {
            handler: AckHandler::Single(Box::new(f)),
            timeout_handler: None,
            timeout: None,
        }
    }

    /// Callback receiving all results
    pub fn multi<F>(f: F) -> Self
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        Self {
            handler: AckHandler::Multi(Box::new(f)),
            timeout_handler: None,
            timeout: None,
        }
    }

    /// Give up after `secs` seconds
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Handler run on timeout or when the session disconnects first
    #[must_use]
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.timeout_handler = Some(Box::new(f));
        self
    }

    /// Configured timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Handler shape
    #[must_use]
    pub fn kind(&self) -> AckCallbackKind {
        match self.handler {
            AckHandler::Single(_) => AckCallbackKind::Single,
            AckHandler::Multi(_) => AckCallbackKind::Multi,
        }
    }

    pub(crate) fn info(&self) -> AckCallbackInfo {
        AckCallbackInfo {
            kind: self.kind(),
            timeout: self.timeout,
        }
    }

    pub(crate) fn into_handler(self) -> AckHandler {
        self.handler
    }

    pub(crate) fn fire_timeout(self) {
        if let Some(f) = self.timeout_handler {
            f();
        }
    }
}

impl fmt::Debug for AckCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckCallback")
            .field("kind", &self.kind())
            .field("timeout", &self.timeout)
            .field("has_timeout_handler", &self.timeout_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_builder_sets_timeout_and_kind() {
        let callback = AckCallback::multi(|_| {}).with_timeout_secs(3);
        assert_eq!(callback.kind(), AckCallbackKind::Multi);
        assert_eq!(callback.timeout(), Some(Duration::from_secs(3)));

        let callback = AckCallback::single(|_| {});
        assert_eq!(callback.info().timeout, None);
    }

    #[test]
    fn test_fire_timeout_runs_handler() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        AckCallback::single(|_| {})
            .on_timeout(move || flag.store(true, Ordering::SeqCst))
            .fire_timeout();
        assert!(fired.load(Ordering::SeqCst));
    }
}
