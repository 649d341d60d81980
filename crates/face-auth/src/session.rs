//! Two-factor login: password first, then a facial challenge for enrolled users.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::FaceAuthenticator;
use crate::types::{AuthError, AuthResult, VerificationOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginState {
    PasswordPending,
    FacialChallengeIssued { attempts: u32 },
    Authenticated,
    Rejected,
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoginState::Authenticated | LoginState::Rejected)
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginState::PasswordPending => f.write_str("password_pending"),
            LoginState::FacialChallengeIssued { .. } => f.write_str("facial_challenge_issued"),
            LoginState::Authenticated => f.write_str("authenticated"),
            LoginState::Rejected => f.write_str("rejected"),
        }
    }
}

/// One login attempt for one user.
///
/// Retry limits for the facial challenge belong to the caller; the session
/// only counts attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginSession {
    user_id: String,
    state: LoginState,
}

impl LoginSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: LoginState::PasswordPending,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    fn invalid(&self, event: &str) -> AuthError {
        AuthError::InvalidTransition {
            from: self.state.to_string(),
            event: event.to_string(),
        }
    }

    /// Apply the credential store's password check.
    ///
    /// A correct password issues the facial challenge when the account has a
    /// template and authenticates directly otherwise.
    pub fn password(&mut self, password_ok: bool, enrolled: bool) -> AuthResult<LoginState> {
        if self.state != LoginState::PasswordPending {
            return Err(self.invalid("password"));
        }
        self.state = match (password_ok, enrolled) {
            (false, _) => LoginState::Rejected,
            (true, true) => LoginState::FacialChallengeIssued { attempts: 0 },
            (true, false) => LoginState::Authenticated,
        };
        tracing::info!("Login for {}: password step -> {}", self.user_id, self.state);
        Ok(self.state)
    }

    /// Apply a verification outcome to an issued challenge.
    pub fn facial(&mut self, outcome: &VerificationOutcome) -> AuthResult<LoginState> {
        let LoginState::FacialChallengeIssued { attempts } = self.state else {
            return Err(self.invalid("facial"));
        };
        self.state = if outcome.matched {
            LoginState::Authenticated
        } else {
            LoginState::FacialChallengeIssued {
                attempts: attempts.saturating_add(1),
            }
        };
        tracing::info!(
            "Login for {}: facial step (confidence {:.3}) -> {}",
            self.user_id,
            outcome.confidence,
            self.state
        );
        Ok(self.state)
    }

    /// Verify a capture and apply the outcome.
    pub fn attempt_facial(
        &mut self,
        authenticator: &FaceAuthenticator,
        image: &[u8],
    ) -> AuthResult<(LoginState, VerificationOutcome)> {
        if !matches!(self.state, LoginState::FacialChallengeIssued { .. }) {
            return Err(self.invalid("facial"));
        }
        let outcome = authenticator.verify(&self.user_id, image)?;
        let state = self.facial(&outcome)?;
        Ok((state, outcome))
    }
}
