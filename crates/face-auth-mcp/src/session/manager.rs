//! Owns the authenticator plus in-flight login sessions and capture streams.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use face_auth::{
    decode_base64, is_supported_format, CapabilityReport, EngineConfig, FaceAuthenticator,
    FrameAccumulator, FrameReport, LoginSession, LoginState, VerificationOutcome,
};

use crate::types::{McpError, McpResult};

const DEFAULT_LOGIN_TTL_SECS: u64 = 300;
const DEFAULT_MAX_FACIAL_ATTEMPTS: u32 = 3;

/// Where a tool's image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Base64,
    File,
}

impl ImageSource {
    pub fn parse(source_type: &str) -> McpResult<Self> {
        match source_type {
            "base64" => Ok(ImageSource::Base64),
            "file" => Ok(ImageSource::File),
            other => Err(McpError::InvalidParams(format!(
                "Unsupported source type: {other}. Use 'file' or 'base64'."
            ))),
        }
    }

    /// Raw image bytes for the payload.
    pub fn load(self, data: &str) -> McpResult<Vec<u8>> {
        match self {
            ImageSource::Base64 => Ok(decode_base64(data)?),
            ImageSource::File => {
                let path = Path::new(data);
                if !is_supported_format(data) {
                    return Err(McpError::InvalidParams(format!(
                        "Unsupported image file: {data}"
                    )));
                }
                if !path.is_file() {
                    return Err(McpError::InvalidParams(format!(
                        "Image file not found: {data}"
                    )));
                }
                Ok(std::fs::read(path)?)
            }
        }
    }
}

struct PendingLogin {
    session: LoginSession,
    started: Instant,
}

struct OpenStream {
    accumulator: FrameAccumulator,
    last_used: Instant,
}

/// Result of one step of a login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginStep {
    pub session_id: String,
    pub user_id: String,
    pub state: LoginState,
    pub attempts_remaining: Option<u32>,
    /// When a pending login is dropped; absent once the login has ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationOutcome>,
}

pub struct AuthSessionManager {
    authenticator: FaceAuthenticator,
    capability: CapabilityReport,
    logins: HashMap<String, PendingLogin>,
    streams: HashMap<String, OpenStream>,
    login_ttl: Duration,
    max_facial_attempts: u32,
}

impl AuthSessionManager {
    /// Build the authenticator from configuration.
    pub fn open(config: &EngineConfig) -> McpResult<Self> {
        let (authenticator, capability) = FaceAuthenticator::from_config(config)?;
        tracing::info!(
            "Face auth ready: extractor={}, degraded={}, data_dir={}",
            capability.kind,
            capability.degraded,
            config.data_dir.display()
        );
        Ok(Self::with_authenticator(authenticator, capability))
    }

    pub fn with_authenticator(authenticator: FaceAuthenticator, capability: CapabilityReport) -> Self {
        Self {
            authenticator,
            capability,
            logins: HashMap::new(),
            streams: HashMap::new(),
            login_ttl: Duration::from_secs(DEFAULT_LOGIN_TTL_SECS),
            max_facial_attempts: DEFAULT_MAX_FACIAL_ATTEMPTS,
        }
    }

    pub fn with_login_ttl(mut self, ttl: Duration) -> Self {
        self.login_ttl = ttl;
        self
    }

    pub fn with_max_facial_attempts(mut self, attempts: u32) -> Self {
        self.max_facial_attempts = attempts.max(1);
        self
    }

    pub fn authenticator(&self) -> &FaceAuthenticator {
        &self.authenticator
    }

    pub fn capability(&self) -> &CapabilityReport {
        &self.capability
    }

    pub fn login_count(&self) -> usize {
        self.logins.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn prune_expired(&mut self) {
        let ttl = self.login_ttl;
        let before = self.logins.len();
        self.logins.retain(|_, pending| pending.started.elapsed() < ttl);
        let expired = before - self.logins.len();
        if expired > 0 {
            tracing::debug!("Expired {expired} idle login session(s)");
        }

        let before = self.streams.len();
        self.streams.retain(|_, stream| stream.last_used.elapsed() < ttl);
        let expired = before - self.streams.len();
        if expired > 0 {
            tracing::debug!("Expired {expired} idle capture stream(s)");
        }
    }

    fn attempts_remaining(&self, state: LoginState) -> Option<u32> {
        match state {
            LoginState::FacialChallengeIssued { attempts } => {
                Some(self.max_facial_attempts.saturating_sub(attempts))
            }
            _ => None,
        }
    }

    fn expires_at(&self, started: Instant) -> Option<DateTime<Utc>> {
        let remaining = self.login_ttl.saturating_sub(started.elapsed());
        chrono::Duration::from_std(remaining)
            .ok()
            .map(|d| Utc::now() + d)
    }

    /// Start a login with the result of the caller's password check.
    ///
    /// Sessions that end on the password step are not kept.
    pub fn start_login(&mut self, user_id: &str, password_ok: bool) -> McpResult<LoginStep> {
        self.prune_expired();
        let enrolled = self.authenticator.status(user_id)?.enrolled;
        let mut session = LoginSession::new(user_id);
        let state = session.password(password_ok, enrolled)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut expires_at = None;
        if !state.is_terminal() {
            expires_at = self.expires_at(started);
            self.logins
                .insert(session_id.clone(), PendingLogin { session, started });
        }
        Ok(LoginStep {
            session_id,
            user_id: user_id.to_string(),
            state,
            attempts_remaining: self.attempts_remaining(state),
            expires_at,
            verification: None,
        })
    }

    /// Answer the facial challenge of a pending login.
    ///
    /// Running out of attempts ends the session as rejected.
    pub fn facial_login(&mut self, session_id: &str, image: &[u8]) -> McpResult<LoginStep> {
        self.prune_expired();
        let pending = self
            .logins
            .get_mut(session_id)
            .ok_or_else(|| McpError::LoginSessionNotFound(session_id.to_string()))?;

        let (mut state, outcome) = pending
            .session
            .attempt_facial(&self.authenticator, image)?;
        let user_id = pending.session.user_id().to_string();
        let started = pending.started;

        if let LoginState::FacialChallengeIssued { attempts } = state {
            if attempts >= self.max_facial_attempts {
                tracing::warn!("Login for {user_id} rejected after {attempts} facial attempts");
                state = LoginState::Rejected;
            }
        }
        let expires_at = if state.is_terminal() {
            self.logins.remove(session_id);
            None
        } else {
            self.expires_at(started)
        };

        Ok(LoginStep {
            session_id: session_id.to_string(),
            user_id,
            state,
            attempts_remaining: self.attempts_remaining(state),
            expires_at,
            verification: Some(outcome),
        })
    }

    /// Feed a frame to a capture stream, opening the stream when `stream_id` is absent.
    ///
    /// Streams idle for longer than the login TTL are dropped.
    pub fn stream_frame(
        &mut self,
        stream_id: Option<&str>,
        image: &[u8],
        user_id: Option<&str>,
    ) -> McpResult<(String, FrameReport)> {
        self.prune_expired();
        let stream_id = match stream_id {
            Some(id) if self.streams.contains_key(id) => id.to_string(),
            Some(id) => {
                return Err(McpError::InvalidParams(format!("Unknown stream: {id}")));
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let stream = OpenStream {
                    accumulator: self.authenticator.frame_accumulator(),
                    last_used: Instant::now(),
                };
                self.streams.insert(id.clone(), stream);
                tracing::debug!("Opened capture stream {id}");
                id
            }
        };

        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| McpError::InternalError(format!("stream {stream_id} vanished")))?;
        stream.last_used = Instant::now();
        let report = self
            .authenticator
            .analyze_frame(&mut stream.accumulator, image, user_id)?;
        Ok((stream_id, report))
    }

    /// Close a capture stream. Returns whether it existed.
    pub fn end_stream(&mut self, stream_id: &str) -> bool {
        self.streams.remove(stream_id).is_some()
    }
}
