//! Credentialed session for the gridded archive
//!
//! One [`Authenticator`] is shared by every archive-backed source. It tries
//! each credential method at most once per process, in the order token,
//! username/password, netrc, and waits out a backoff window after every
//! failure so lockout-prone logins are never repeated in quick succession.

pub mod netrc;
pub mod urs;

pub use urs::UrsExchange;

use crate::config::EarthdataConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Host the netrc entry is looked up for
pub const URS_HOST: &str = "urs.earthdata.nasa.gov";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credentials rejected: {0}")]
    Rejected(String),

    #[error("Account locked: {0}")]
    AccountLocked(String),

    #[error("Identity provider unreachable: {0}")]
    Network(String),

    #[error("Credential material unusable: {0}")]
    Credentials(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Token,
    UsernamePassword,
    Netrc,
}

impl AuthMethod {
    pub const PREFERENCE: [AuthMethod; 3] = [
        AuthMethod::Token,
        AuthMethod::UsernamePassword,
        AuthMethod::Netrc,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Token => "token",
            AuthMethod::UsernamePassword => "username_password",
            AuthMethod::Netrc => "netrc",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single login attempt is made with
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialMaterial {
    Token(String),
    Basic { username: String, password: String },
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialMaterial::Token(_) => f.write_str("Token(***)"),
            CredentialMaterial::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Where credential material comes from. Read at startup, never mutated.
#[derive(Clone, Default)]
pub struct CredentialSource {
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub netrc_path: Option<PathBuf>,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("netrc_path", &self.netrc_path)
            .finish_non_exhaustive()
    }
}

impl CredentialSource {
    #[must_use]
    pub fn from_config(config: &EarthdataConfig) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        Self {
            token: non_empty(&config.token),
            username: non_empty(&config.username),
            password: non_empty(&config.password),
            netrc_path: netrc::resolve_path(config.netrc_path.as_deref()),
        }
    }

    /// Material for `method`, `None` when it is absent
    pub async fn material(&self, method: AuthMethod) -> Option<CredentialMaterial> {
        match method {
            AuthMethod::Token => self.token.clone().map(CredentialMaterial::Token),
            AuthMethod::UsernamePassword => match (&self.username, &self.password) {
                (Some(username), Some(password)) => Some(CredentialMaterial::Basic {
                    username: username.clone(),
                    password: password.clone(),
                }),
                _ => None,
            },
            AuthMethod::Netrc => {
                let path = self.netrc_path.as_ref()?;
                let entry = netrc::load_entry(path, URS_HOST).await?;
                Some(CredentialMaterial::Basic {
                    username: entry.login,
                    password: entry.password,
                })
            }
        }
    }

    /// Methods whose material is present right now
    pub async fn available_methods(&self) -> Vec<AuthMethod> {
        let mut available = Vec::new();
        for method in AuthMethod::PREFERENCE {
            if self.material(method).await.is_some() {
                available.push(method);
            }
        }
        available
    }
}

/// Performs one login against the identity provider
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Returns the bearer token of the new session
    async fn login(
        &self,
        method: AuthMethod,
        material: &CredentialMaterial,
    ) -> Result<String, AuthError>;
}

/// Established session handed to archive requests
#[derive(Clone)]
pub struct ArchiveSession {
    pub token: String,
    pub method: AuthMethod,
    pub established_at: DateTime<Utc>,
}

impl fmt::Debug for ArchiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSession")
            .field("method", &self.method)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// After an ordinary failure
    pub generic: Duration,
    /// After the provider reported a locked account
    pub lockout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            generic: Duration::from_secs(120),
            lockout: Duration::from_secs(600),
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_config(config: &EarthdataConfig) -> Self {
        Self {
            generic: Duration::from_secs(config.backoff_seconds),
            lockout: Duration::from_secs(config.lockout_backoff_seconds),
        }
    }

    fn window_for(&self, error: &AuthError) -> Duration {
        match error {
            AuthError::AccountLocked(_) => self.lockout,
            _ => self.generic,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    attempted: Vec<AuthMethod>,
    session: Option<ArchiveSession>,
    backoff_until: Option<Instant>,
    last_error: Option<String>,
}

/// Snapshot for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub method: Option<AuthMethod>,
    pub attempted: Vec<AuthMethod>,
    pub available: Vec<AuthMethod>,
    pub backoff_remaining_seconds: Option<u64>,
    pub last_error: Option<String>,
}

pub struct Authenticator {
    credentials: CredentialSource,
    exchange: Arc<dyn CredentialExchange>,
    policy: BackoffPolicy,
    state: Mutex<SessionState>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("credentials", &self.credentials)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    #[must_use]
    pub fn new(
        credentials: CredentialSource,
        exchange: Arc<dyn CredentialExchange>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            credentials,
            exchange,
            policy,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// True once a session exists, establishing it if allowed
    pub async fn ensure_authenticated(&self) -> bool {
        self.session().await.is_some()
    }

    /// Current session, attempting the next untried method when there is
    /// none and no backoff window is open.
    ///
    /// The state lock is held across the login so concurrent first uses
    /// wait for a single attempt instead of making their own.
    pub async fn session(&self) -> Option<ArchiveSession> {
        let mut state = self.state.lock().await;

        if let Some(session) = &state.session {
            return Some(session.clone());
        }

        if let Some(until) = state.backoff_until {
            let now = Instant::now();
            if now < until {
                debug!(
                    "Archive authentication in backoff for another {}s",
                    (until - now).as_secs()
                );
                return None;
            }
            state.backoff_until = None;
        }

        let mut next = None;
        for method in AuthMethod::PREFERENCE {
            if state.attempted.contains(&method) {
                continue;
            }
            match self.credentials.material(method).await {
                Some(material) => {
                    next = Some((method, material));
                    break;
                }
                None => debug!("No credential material for {}, skipping", method),
            }
        }

        let Some((method, material)) = next else {
            if state.attempted.is_empty() && state.last_error.is_none() {
                state.last_error = Some("no credential material configured".to_string());
                warn!(
                    "No archive credentials configured. Set EARTHDATA_TOKEN, \
                     EARTHDATA_USERNAME/EARTHDATA_PASSWORD or a netrc entry for {}",
                    URS_HOST
                );
            } else {
                debug!("No untried archive credential method left");
            }
            return None;
        };

        state.attempted.push(method);
        // Stays in place if this future is dropped before the login returns
        state.backoff_until = Some(Instant::now() + self.policy.generic);
        state.last_error = Some(format!("login with {method} did not complete"));
        info!("Authenticating with the archive using {}", method);

        match self.exchange.login(method, &material).await {
            Ok(token) => {
                info!("Archive session established with {}", method);
                let session = ArchiveSession {
                    token,
                    method,
                    established_at: Utc::now(),
                };
                state.session = Some(session.clone());
                state.backoff_until = None;
                state.last_error = None;
                Some(session)
            }
            Err(e) => {
                let window = self.policy.window_for(&e);
                error!(
                    "Archive authentication with {} failed: {}. Not retrying for {}s; \
                     fix the credentials and restart or reset the authenticator",
                    method,
                    e,
                    window.as_secs()
                );
                state.backoff_until = Some(Instant::now() + window);
                state.last_error = Some(e.to_string());
                None
            }
        }
    }

    /// Forget attempted methods, backoff and any session
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = SessionState::default();
        info!("Archive authenticator reset");
    }

    pub async fn status(&self) -> AuthStatus {
        let available = self.credentials.available_methods().await;
        let state = self.state.lock().await;
        let now = Instant::now();
        AuthStatus {
            authenticated: state.session.is_some(),
            method: state.session.as_ref().map(|session| session.method),
            attempted: state.attempted.clone(),
            available,
            backoff_remaining_seconds: state
                .backoff_until
                .filter(|until| *until > now)
                .map(|until| (until - now).as_secs()),
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records every attempt and answers from a fixed script
    struct ScriptedExchange {
        attempts: StdMutex<Vec<AuthMethod>>,
        outcome: fn(AuthMethod) -> Result<String, AuthError>,
    }

    impl ScriptedExchange {
        fn new(outcome: fn(AuthMethod) -> Result<String, AuthError>) -> Arc<Self> {
            Arc::new(Self {
                attempts: StdMutex::new(Vec::new()),
                outcome,
            })
        }

        fn attempts(&self) -> Vec<AuthMethod> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialExchange for ScriptedExchange {
        async fn login(
            &self,
            method: AuthMethod,
            _material: &CredentialMaterial,
        ) -> Result<String, AuthError> {
            self.attempts.lock().unwrap().push(method);
            tokio::time::sleep(Duration::from_millis(10)).await;
            (self.outcome)(method)
        }
    }

    fn token_and_password() -> CredentialSource {
        CredentialSource {
            token: Some("expired-token".to_string()),
            username: Some("alice".to_string()),
            password: Some("s3cret".to_string()),
            netrc_path: None,
        }
    }

    fn authenticator(
        credentials: CredentialSource,
        exchange: Arc<ScriptedExchange>,
    ) -> Authenticator {
        Authenticator::new(credentials, exchange, BackoffPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_blocks_next_method_until_window_expires() {
        let exchange = ScriptedExchange::new(|method| match method {
            AuthMethod::Token => Err(AuthError::Rejected("token expired".to_string())),
            _ => Ok("fresh-token".to_string()),
        });
        let auth = authenticator(token_and_password(), exchange.clone());

        assert!(!auth.ensure_authenticated().await);
        assert_eq!(exchange.attempts(), vec![AuthMethod::Token]);

        // inside the window: no new attempt even though a password exists
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!auth.ensure_authenticated().await);
        assert_eq!(exchange.attempts(), vec![AuthMethod::Token]);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(auth.ensure_authenticated().await);
        assert_eq!(
            exchange.attempts(),
            vec![AuthMethod::Token, AuthMethod::UsernamePassword]
        );

        // authenticated: no further network calls
        assert!(auth.ensure_authenticated().await);
        assert_eq!(exchange.attempts().len(), 2);
        let status = auth.status().await;
        assert_eq!(status.method, Some(AuthMethod::UsernamePassword));
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_lock_uses_long_backoff() {
        let exchange =
            ScriptedExchange::new(|_| Err(AuthError::AccountLocked("too many attempts".to_string())));
        let auth = authenticator(token_and_password(), exchange.clone());

        assert!(!auth.ensure_authenticated().await);
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(!auth.ensure_authenticated().await);
        assert_eq!(exchange.attempts().len(), 1);

        let status = auth.status().await;
        assert!(status.backoff_remaining_seconds.unwrap() > 400);

        tokio::time::advance(Duration::from_secs(480)).await;
        assert!(!auth.ensure_authenticated().await);
        assert_eq!(
            exchange.attempts(),
            vec![AuthMethod::Token, AuthMethod::UsernamePassword]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_method_tried_once_per_process() {
        let exchange = ScriptedExchange::new(|_| Err(AuthError::Network("timeout".to_string())));
        let auth = authenticator(token_and_password(), exchange.clone());

        for _ in 0..5 {
            auth.ensure_authenticated().await;
            tokio::time::advance(Duration::from_secs(121)).await;
        }
        assert_eq!(
            exchange.attempts(),
            vec![AuthMethod::Token, AuthMethod::UsernamePassword]
        );

        auth.reset().await;
        assert!(auth.status().await.attempted.is_empty());
        auth.ensure_authenticated().await;
        assert_eq!(exchange.attempts().len(), 3);
    }

    /// Never answers
    struct HangingExchange {
        attempts: StdMutex<Vec<AuthMethod>>,
    }

    #[async_trait]
    impl CredentialExchange for HangingExchange {
        async fn login(
            &self,
            method: AuthMethod,
            _material: &CredentialMaterial,
        ) -> Result<String, AuthError> {
            self.attempts.lock().unwrap().push(method);
            std::future::pending::<Result<String, AuthError>>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_login_still_opens_backoff() {
        let exchange = Arc::new(HangingExchange {
            attempts: StdMutex::new(Vec::new()),
        });
        let auth = Authenticator::new(
            token_and_password(),
            exchange.clone(),
            BackoffPolicy::default(),
        );

        let abandoned =
            tokio::time::timeout(Duration::from_secs(5), auth.ensure_authenticated()).await;
        assert!(abandoned.is_err());

        let status = auth.status().await;
        assert_eq!(status.attempted, vec![AuthMethod::Token]);
        assert!(status.backoff_remaining_seconds.is_some());
        assert!(status.last_error.is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!auth.ensure_authenticated().await);
        assert_eq!(
            *exchange.attempts.lock().unwrap(),
            vec![AuthMethod::Token]
        );
    }

    #[tokio::test]
    async fn test_success_clears_backoff() {
        let exchange = ScriptedExchange::new(|_| Ok("token".to_string()));
        let auth = authenticator(token_and_password(), exchange);

        assert!(auth.ensure_authenticated().await);
        let status = auth.status().await;
        assert!(status.backoff_remaining_seconds.is_none());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_absent_material_is_skipped() {
        let exchange = ScriptedExchange::new(|_| Ok("token".to_string()));
        let credentials = CredentialSource {
            username: Some("alice".to_string()),
            password: Some("s3cret".to_string()),
            ..CredentialSource::default()
        };
        let auth = authenticator(credentials, exchange.clone());

        assert!(auth.ensure_authenticated().await);
        assert_eq!(exchange.attempts(), vec![AuthMethod::UsernamePassword]);
    }

    #[tokio::test]
    async fn test_no_credentials_never_calls_provider() {
        let exchange = ScriptedExchange::new(|_| Ok("token".to_string()));
        let auth = authenticator(CredentialSource::default(), exchange.clone());

        assert!(!auth.ensure_authenticated().await);
        assert!(exchange.attempts().is_empty());
        assert!(auth.status().await.available.is_empty());
    }

    #[tokio::test]
    async fn test_netrc_material() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "machine {URS_HOST} login bob password hunter2").unwrap();

        let credentials = CredentialSource {
            netrc_path: Some(file.path().to_path_buf()),
            ..CredentialSource::default()
        };
        assert_eq!(credentials.available_methods().await, vec![AuthMethod::Netrc]);
        assert_eq!(
            credentials.material(AuthMethod::Netrc).await,
            Some(CredentialMaterial::Basic {
                username: "bob".to_string(),
                password: "hunter2".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_concurrent_first_use_makes_one_attempt() {
        let exchange = ScriptedExchange::new(|_| Ok("token".to_string()));
        let auth = Arc::new(authenticator(token_and_password(), exchange.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let auth = auth.clone();
                tokio::spawn(async move { auth.ensure_authenticated().await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(exchange.attempts(), vec![AuthMethod::Token]);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", token_and_password());
        assert!(!rendered.contains("expired-token"));
        assert!(!rendered.contains("s3cret"));

        let material = CredentialMaterial::Basic {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        assert!(!format!("{material:?}").contains("s3cret"));
    }
}
