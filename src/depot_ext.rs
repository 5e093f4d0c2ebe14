//! Depot accessors for the request's session

use salvo_core::Depot;

use crate::error::SessionError;
use crate::handler::SESSION_DEPOT_KEY;
use crate::session::Session;

/// Access the [`Session`] that [`SessionHandler`](crate::SessionHandler) put in the depot
pub trait SessionDepotExt {
    /// Borrow the session, if the middleware ran
    fn session(&self) -> Option<&Session>;

    /// A handle to the session. Handles share state, so writes through it
    /// are seen by the middleware when the response is committed.
    fn session_mut(&mut self) -> Option<Session>;

    /// Like [`session_mut`](Self::session_mut), but a missing middleware is an error
    fn require_session(&mut self) -> Result<Session, SessionError>;
}

impl SessionDepotExt for Depot {
    fn session(&self) -> Option<&Session> {
        self.get::<Session>(SESSION_DEPOT_KEY).ok()
    }

    fn session_mut(&mut self) -> Option<Session> {
        self.session().cloned()
    }

    fn require_session(&mut self) -> Result<Session, SessionError> {
        self.session_mut().ok_or_else(|| {
            SessionError::Config("session middleware is not installed on this route".to_string())
        })
    }
}
