//! ==============================================================================
//! session.rs - explicitly passed user session
//! ==============================================================================
//!
//! purpose:
//!     the identity provider (hosted auth service) is external. the dashboard
//!     only needs to know whether someone is signed in and what to call them,
//!     so that is all a session carries. it is created at startup, handed to
//!     the presenter, and ended on sign-out.
//!
//! ==============================================================================

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    user_display_name: Option<String>,
}

impl Session {
    pub fn signed_in(display_name: impl Into<String>) -> Self {
        Self {
            user_display_name: Some(display_name.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_display_name.is_some()
    }

    pub fn user_display_name(&self) -> Option<&str> {
        self.user_display_name.as_deref()
    }

    /// logout teardown; the session can't be revived afterwards
    pub fn end(&mut self) {
        self.user_display_name = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_clears_identity() {
        let mut session = Session::signed_in("Jean Dupont");
        assert!(session.is_authenticated());
        assert_eq!(session.user_display_name(), Some("Jean Dupont"));

        session.end();
        assert!(!session.is_authenticated());
        assert_eq!(session, Session::anonymous());
    }
}
