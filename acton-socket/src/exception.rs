//! Reporting path for application listener failures
//!
//! Listener errors never reach the remote client and never tear down the
//! session. They are handed to an [`ExceptionListener`]; the default one logs.

use std::sync::Arc;

use serde_json::Value;

use crate::session::NamespaceClient;

/// Receives failures raised by application listeners
pub trait ExceptionListener: Send + Sync {
    /// An event listener failed
    fn on_event_exception(&self, error: &anyhow::Error, args: &[Value], client: &Arc<NamespaceClient>) {
        tracing::error!(
            session_id = %client.session_id(),
            namespace = %client.namespace().name(),
            args = args.len(),
            error = %error,
            "Event listener failed"
        );
    }

    /// A connect listener failed
    fn on_connect_exception(&self, error: &anyhow::Error, client: &Arc<NamespaceClient>) {
        tracing::error!(
            session_id = %client.session_id(),
            namespace = %client.namespace().name(),
            error = %error,
            "Connect listener failed"
        );
    }

    /// A disconnect listener failed
    fn on_disconnect_exception(&self, error: &anyhow::Error, client: &Arc<NamespaceClient>) {
        tracing::error!(
            session_id = %client.session_id(),
            namespace = %client.namespace().name(),
            error = %error,
            "Disconnect listener failed"
        );
    }
}

/// Logs every failure through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionListener;

impl ExceptionListener for DefaultExceptionListener {}
