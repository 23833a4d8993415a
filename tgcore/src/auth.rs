//! Authorization state machine with generation fencing.
//!
//! Every state change bumps the generation. Requests sent while handling a
//! state are tagged with the generation current at that moment; when their
//! reply arrives after the session has moved on, the reply is stale and is
//! dropped without side effects.

use crate::api::{AuthorizationState, Object};

/// What the orchestrator must do after entering a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    SupplyParameters,
    SupplyPhoneNumber,
    SupplyCode,
    SupplyPassword { hint: String },
    ShowConfirmationLink { link: String },
    Register,
    /// Session is usable; pipelines may consume.
    Authorized,
    LoggingOut,
    Closing,
    /// Terminal for this generation; the outer loop must rebuild the session.
    Restart,
    /// A state this build does not know about.
    Unhandled,
}

/// Verdict on a reply to an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    /// The session moved on since the request was sent.
    Stale,
    /// The collaborator reported that no response exists.
    NoResponse,
    /// The request failed; the current waiting state must be re-entered.
    Rejected { code: i32, message: String },
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    state: AuthorizationState,
    generation: u64,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            state: AuthorizationState::Unknown,
            generation: 0,
        }
    }

    pub fn state(&self) -> &AuthorizationState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Move to `state` and return what has to happen next.
    pub fn transition(&mut self, state: AuthorizationState) -> AuthAction {
        self.generation += 1;
        self.state = state;
        Self::action_for(&self.state)
    }

    /// Handle the current state again, e.g. after a rejected code. Counts as
    /// a transition for fencing purposes.
    pub fn reenter(&mut self) -> AuthAction {
        self.generation += 1;
        Self::action_for(&self.state)
    }

    /// Start over for a fresh session. The generation keeps counting, so
    /// replies tagged in the previous session stay stale.
    pub fn restart(&mut self) {
        self.generation += 1;
        self.state = AuthorizationState::Unknown;
    }

    pub fn action_for(state: &AuthorizationState) -> AuthAction {
        match state {
            AuthorizationState::WaitParameters => AuthAction::SupplyParameters,
            AuthorizationState::WaitPhoneNumber => AuthAction::SupplyPhoneNumber,
            AuthorizationState::WaitCode => AuthAction::SupplyCode,
            AuthorizationState::WaitPassword { password_hint } => AuthAction::SupplyPassword {
                hint: password_hint.clone(),
            },
            AuthorizationState::WaitOtherDeviceConfirmation { link } => {
                AuthAction::ShowConfirmationLink { link: link.clone() }
            }
            AuthorizationState::WaitRegistration => AuthAction::Register,
            AuthorizationState::Ready => AuthAction::Authorized,
            AuthorizationState::LoggingOut => AuthAction::LoggingOut,
            AuthorizationState::Closing => AuthAction::Closing,
            AuthorizationState::Closed => AuthAction::Restart,
            AuthorizationState::Unknown => AuthAction::Unhandled,
        }
    }

    /// Judge a reply to a request sent at `generation`.
    pub fn judge(&self, generation: u64, reply: Option<&Object>) -> AuthReply {
        if !self.is_current(generation) {
            return AuthReply::Stale;
        }
        match reply {
            None => AuthReply::NoResponse,
            Some(Object::Error { code, message }) => AuthReply::Rejected {
                code: *code,
                message: message.clone(),
            },
            Some(_) => AuthReply::Accepted,
        }
    }
}
