//! Handshake authorization
//!
//! The application supplies an [`AuthorizationListener`] predicate over the
//! handshake metadata. Refused handshakes never create a session.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::scheduler::{CancelableScheduler, SchedulerKey, SchedulerKind};
use crate::session::{HandshakeData, SessionId};

/// Decides whether a handshake may proceed
pub trait AuthorizationListener: Send + Sync {
    /// `true` to accept the handshake
    fn is_authorized(&self, data: &HandshakeData) -> bool;
}

impl<F> AuthorizationListener for F
where
    F: Fn(&HandshakeData) -> bool + Send + Sync,
{
    fn is_authorized(&self, data: &HandshakeData) -> bool {
        self(data)
    }
}

/// Accepts every handshake
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthorizationListener for AllowAll {
    fn is_authorized(&self, _data: &HandshakeData) -> bool {
        true
    }
}

/// Runs the authorization predicate and settles connected sessions
pub struct AuthorizeHandler {
    listener: Arc<dyn AuthorizationListener>,
    scheduler: CancelableScheduler,
}

impl AuthorizeHandler {
    /// Create a handler around `listener`
    pub fn new(listener: Arc<dyn AuthorizationListener>, scheduler: CancelableScheduler) -> Self {
        Self { listener, scheduler }
    }

    /// Check a handshake
    pub fn authorize(&self, data: &HandshakeData) -> Result<()> {
        if self.listener.is_authorized(data) {
            return Ok(());
        }
        tracing::debug!(
            url = %data.url,
            remote_address = ?data.remote_address,
            "Handshake refused by authorization listener"
        );
        Err(Error::Unauthorized(data.url.clone()))
    }

    /// A session connected; its first-data timer is no longer needed
    ///
    /// Also reached through the cluster bus, in which case the session is
    /// usually unknown here and the cancel is a no-op.
    pub fn connect(&self, session_id: SessionId) {
        self.scheduler
            .cancel(&SchedulerKey::new(SchedulerKind::PingTimeout, session_id));
    }
}

impl fmt::Debug for AuthorizeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizeHandler").finish_non_exhaustive()
    }
}
