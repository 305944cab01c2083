//! Session token lifecycle: acquire, validate, revoke.
//!
//! # Design
//! The three calls mirror the service's three independent verbs; there is
//! no implicit refresh and no retry. The token belongs to the caller, who
//! may track where it stands with the [`Session`] state machine. Nothing
//! in this crate stores a token between calls.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::client::DataApiClient;
use crate::envelope;
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Opaque bearer credential issued by the sessions endpoint.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

#[derive(Deserialize)]
struct AcquiredSession {
    token: String,
}

impl DataApiClient {
    /// `POST databases/{db}/sessions` with Basic authentication.
    pub fn build_acquire_session(&self) -> Result<HttpRequest> {
        let credentials = self.config().credentials()?;
        let url = self.config().database_endpoint(&["sessions"])?;
        Ok(HttpRequest::new(HttpMethod::Post, url)
            .header("authorization", credentials.basic_auth())
            .json_body("{}".to_string()))
    }

    /// A non-zero code becomes [`ApiError::SessionRejected`] so callers can
    /// tell bad credentials apart from other service failures.
    pub fn parse_acquire_session(&self, response: HttpResponse) -> Result<SessionToken> {
        let envelope = envelope::parse(&response.body)?;
        let envelope = envelope.into_success().map_err(|err| match err {
            ApiError::Service { code, message } => ApiError::SessionRejected { code, message },
            other => other,
        })?;
        let acquired: AcquiredSession = envelope.decode()?;
        if acquired.token.is_empty() {
            return Err(ApiError::MalformedResponse("empty session token".to_string()));
        }
        Ok(SessionToken(acquired.token))
    }

    /// `GET validateSession` with the bearer token.
    pub fn build_validate_session(&self, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.config().endpoint("validateSession")?;
        Ok(HttpRequest::new(HttpMethod::Get, url).bearer(token.as_str()))
    }

    pub fn parse_validate_session(&self, response: HttpResponse) -> Result<()> {
        envelope::expect_success(&response.body)
    }

    /// `DELETE databases/{db}/sessions/{token}`; the token is in the path,
    /// not in a header.
    pub fn build_revoke_session(&self, token: &SessionToken) -> Result<HttpRequest> {
        let url = self.config().database_endpoint(&["sessions", token.as_str()])?;
        Ok(HttpRequest::new(HttpMethod::Delete, url))
    }

    pub fn parse_revoke_session(&self, response: HttpResponse) -> Result<()> {
        envelope::expect_success(&response.body)
    }
}

/// Where a caller-held session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Pending,
    Active,
    Revoked,
    Invalid,
}

/// An illegal transition was requested.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} from {from:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub action: &'static str,
}

/// Why [`Session::complete_acquire`] did not yield a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No acquire was pending; the session is unchanged.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The acquire call itself failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Caller-owned bookkeeping for one session token.
///
/// ```text
/// NoSession -> Pending -> Active -> Revoked
///                 |          \---> Invalid
///                 \-> NoSession (rejected or transport failure)
/// ```
/// `Invalid` and `Revoked` may start a fresh acquire.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    token: Option<SessionToken>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::NoSession,
            token: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The token, only while the session is believed active.
    pub fn token(&self) -> Option<&SessionToken> {
        match self.state {
            SessionState::Active => self.token.as_ref(),
            _ => None,
        }
    }

    pub fn begin_acquire(&mut self) -> std::result::Result<(), TransitionError> {
        match self.state {
            SessionState::NoSession | SessionState::Invalid | SessionState::Revoked => {
                self.state = SessionState::Pending;
                self.token = None;
                Ok(())
            }
            from => Err(TransitionError { from, action: "acquire" }),
        }
    }

    /// Only valid while `Pending`; any other state is left untouched.
    pub fn complete_acquire(
        &mut self,
        outcome: Result<SessionToken>,
    ) -> std::result::Result<&SessionToken, SessionError> {
        if self.state != SessionState::Pending {
            return Err(TransitionError {
                from: self.state,
                action: "complete acquire",
            }
            .into());
        }
        match outcome {
            Ok(token) => {
                self.state = SessionState::Active;
                Ok(&*self.token.insert(token))
            }
            Err(err) => {
                self.state = SessionState::NoSession;
                Err(err.into())
            }
        }
    }

    /// Apply the answer of a validate call. Only meaningful while active.
    pub fn record_validation(&mut self, valid: bool) {
        if self.state == SessionState::Active && !valid {
            self.state = SessionState::Invalid;
            self.token = None;
        }
    }

    /// A failed revoke leaves the session active: the server decides.
    pub fn record_revoke(&mut self, outcome: &Result<()>) {
        if self.state == SessionState::Active && outcome.is_ok() {
            self.state = SessionState::Revoked;
            self.token = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn client() -> DataApiClient {
        DataApiClient::new(ConnectionConfig::new("fm.example.com", "Contacts").with_credentials("admin", "secret"))
    }

    fn ok_body(response: &str) -> HttpResponse {
        HttpResponse::new(200, format!(r#"{{"response":{response},"messages":[{{"code":"0","message":"OK"}}]}}"#))
    }

    #[test]
    fn acquire_uses_basic_auth() {
        let req = client().build_acquire_session().unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://fm.example.com/fmi/data/vLatest/databases/Contacts/sessions");
        assert_eq!(req.header_value("Authorization"), Some("Basic YWRtaW46c2VjcmV0"));
        assert_eq!(req.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn acquire_without_credentials_is_missing_configuration() {
        let client = DataApiClient::new(ConnectionConfig::new("fm.example.com", "Contacts"));
        assert_eq!(
            client.build_acquire_session().unwrap_err(),
            ApiError::MissingConfiguration("credentials")
        );
    }

    #[test]
    fn acquire_extracts_token() {
        let token = client().parse_acquire_session(ok_body(r#"{"token":"abc123"}"#)).unwrap();
        assert_eq!(token.as_str(), "abc123");
    }

    #[test]
    fn acquire_rejection_keeps_code() {
        let response = HttpResponse::new(
            401,
            r#"{"response":{},"messages":[{"code":"212","message":"Invalid user account and/or password; please try again"}]}"#,
        );
        let err = client().parse_acquire_session(response).unwrap_err();
        assert!(matches!(err, ApiError::SessionRejected { ref code, .. } if code == "212"));
    }

    #[test]
    fn acquire_without_token_is_malformed() {
        let err = client().parse_acquire_session(ok_body("{}")).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn validate_and_revoke_requests() {
        let token = SessionToken::new("tok/en");
        let req = client().build_validate_session(&token).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://fm.example.com/fmi/data/vLatest/validateSession");
        assert_eq!(req.header_value("authorization"), Some("Bearer tok/en"));

        let req = client().build_revoke_session(&token).unwrap();
        assert_eq!(req.method, HttpMethod::Delete);
        assert_eq!(req.url, "https://fm.example.com/fmi/data/vLatest/databases/Contacts/sessions/tok%2Fen");
        assert!(req.header_value("authorization").is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn token_debug_is_redacted() {
        assert_eq!(format!("{:?}", SessionToken::new("secret")), "SessionToken(<redacted>)");
    }

    #[test]
    fn state_machine_happy_path() {
        let mut session = Session::new();
        session.begin_acquire().unwrap();
        assert_eq!(session.state(), SessionState::Pending);
        assert!(session.token().is_none());

        session.complete_acquire(Ok(SessionToken::new("t"))).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.token().map(SessionToken::as_str), Some("t"));

        session.record_validation(true);
        assert_eq!(session.state(), SessionState::Active);

        session.record_revoke(&Ok(()));
        assert_eq!(session.state(), SessionState::Revoked);
        assert!(session.token().is_none());
    }

    #[test]
    fn rejected_acquire_returns_to_no_session() {
        let mut session = Session::new();
        session.begin_acquire().unwrap();
        let err = session
            .complete_acquire(Err(ApiError::SessionRejected {
                code: "212".into(),
                message: "bad".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, SessionError::Api(ref e) if e.service_code() == Some("212")));
        assert_eq!(session.state(), SessionState::NoSession);
    }

    #[test]
    fn complete_without_pending_acquire_is_rejected() {
        let mut session = Session::new();
        let err = session.complete_acquire(Ok(SessionToken::new("t"))).unwrap_err();
        assert_eq!(
            err,
            SessionError::Transition(TransitionError {
                from: SessionState::NoSession,
                action: "complete acquire",
            })
        );
        assert_eq!(session.state(), SessionState::NoSession);
        assert!(session.token().is_none());

        session.begin_acquire().unwrap();
        session.complete_acquire(Ok(SessionToken::new("t"))).unwrap();
        session.record_revoke(&Ok(()));
        assert!(session.complete_acquire(Ok(SessionToken::new("u"))).is_err());
        assert_eq!(session.state(), SessionState::Revoked);
    }

    #[test]
    fn transition_error_display() {
        let err = TransitionError {
            from: SessionState::Active,
            action: "acquire",
        };
        assert_eq!(err.to_string(), "cannot acquire from Active");
    }

    #[test]
    fn failed_revoke_stays_active() {
        let mut session = Session::new();
        session.begin_acquire().unwrap();
        session.complete_acquire(Ok(SessionToken::new("t"))).unwrap();
        session.record_revoke(&Err(ApiError::Transport("timeout".into())));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn invalid_session_can_be_reacquired() {
        let mut session = Session::new();
        session.begin_acquire().unwrap();
        session.complete_acquire(Ok(SessionToken::new("t"))).unwrap();
        assert!(session.begin_acquire().is_err());

        session.record_validation(false);
        assert_eq!(session.state(), SessionState::Invalid);
        session.begin_acquire().unwrap();
        assert_eq!(session.state(), SessionState::Pending);
    }
}
