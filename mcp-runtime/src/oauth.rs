//! OAuth session, token refresh and the loopback consent flow.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gtasks_core::auth::{generate_code_challenge, generate_code_verifier, generate_state};
use gtasks_core::credentials::{
    ClientSecrets, CredentialBundle, TokenResponse, TokenUpdate, now_millis,
};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not use OAuth keyfile {path}: {message}")]
    Keyfile { path: PathBuf, message: String },
    #[error("access token is stale and no refresh token is stored")]
    MissingRefreshToken,
    #[error("access token is stale and no client registration is available to refresh it")]
    RefreshUnavailable,
    #[error("token endpoint returned {status}: {message}")]
    TokenEndpoint { status: u16, message: String },
    #[error("authorization flow failed: {0}")]
    Flow(String),
    #[error("I/O error during authorization: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error talking to the token endpoint: {0}")]
    Http(#[from] reqwest::Error),
}

/// Runs interactive consent against a keyfile and returns fresh credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        keyfile: &Path,
        scopes: &[&str],
    ) -> Result<CredentialBundle, AuthError>;
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenUpdate, AuthError>;
}

pub type RefreshObserver = Box<dyn Fn(&TokenUpdate) + Send + Sync>;

/// In-memory credential client. Hands out access tokens and renews them
/// through its refresher, notifying the registered observer after each renewal.
pub struct OAuthSession {
    bundle: tokio::sync::Mutex<CredentialBundle>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    observer: Mutex<Option<RefreshObserver>>,
}

impl OAuthSession {
    pub fn new(bundle: CredentialBundle, refresher: Option<Arc<dyn TokenRefresher>>) -> Self {
        Self {
            bundle: tokio::sync::Mutex::new(bundle),
            refresher,
            observer: Mutex::new(None),
        }
    }

    /// Register the refresh observer. A second registration replaces the first.
    pub fn on_refresh(&self, observer: impl Fn(&TokenUpdate) + Send + Sync + 'static) {
        // A panicking observer poisons the slot; the slot itself stays valid.
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(observer));
    }

    pub fn can_refresh(&self) -> bool {
        self.refresher.is_some()
    }

    pub async fn snapshot(&self) -> CredentialBundle {
        self.bundle.lock().await.clone()
    }

    /// Current access token, refreshed first when stale.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut bundle = self.bundle.lock().await;
        if bundle.is_stale() {
            self.refresh_locked(&mut bundle).await?;
        }
        Ok(bundle.access_token.clone())
    }

    pub async fn refresh_now(&self) -> Result<String, AuthError> {
        let mut bundle = self.bundle.lock().await;
        self.refresh_locked(&mut bundle).await?;
        Ok(bundle.access_token.clone())
    }

    async fn refresh_locked(&self, bundle: &mut CredentialBundle) -> Result<(), AuthError> {
        let refresh_token = bundle
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        let refresher = self.refresher.as_ref().ok_or(AuthError::RefreshUnavailable)?;
        let update = refresher.refresh(&refresh_token).await?;
        bundle.merge(&update);
        debug!(expiry_date = ?bundle.expiry_date, "access token refreshed");
        let slot = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(observer) = slot.as_ref() {
            observer(&update);
        }
        Ok(())
    }
}

/// Google's OAuth token endpoint, authenticated with the client registration.
pub struct GoogleTokenEndpoint {
    http: reqwest::Client,
    secrets: ClientSecrets,
    token_uri: String,
}

impl GoogleTokenEndpoint {
    pub fn new(http: reqwest::Client, secrets: ClientSecrets) -> Self {
        let token_uri = secrets.token_uri.clone();
        Self {
            http,
            secrets,
            token_uri,
        }
    }

    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    async fn exchange(&self, form: &[(&str, &str)]) -> Result<TokenUpdate, AuthError> {
        let mut params: Vec<(&str, &str)> = form.to_vec();
        params.push(("client_id", self.secrets.client_id.as_str()));
        if let Some(secret) = &self.secrets.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let resp = self.http.post(&self.token_uri).form(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                message: token_error_message(&body),
            });
        }
        let token: TokenResponse = resp.json().await?;
        Ok(token.into_update(now_millis()))
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenUpdate, AuthError> {
        self.exchange(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }
}

#[async_trait]
impl TokenRefresher for GoogleTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenUpdate, AuthError> {
        self.exchange(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

fn token_error_message(body: &Value) -> String {
    let error = body.get("error").and_then(Value::as_str);
    let description = body.get("error_description").and_then(Value::as_str);
    match (error, description) {
        (Some(error), Some(description)) => format!("{error}: {description}"),
        (Some(error), None) => error.to_string(),
        (None, Some(description)) => description.to_string(),
        (None, None) => "no error details".to_string(),
    }
}

/// Installed-app consent flow: loopback redirect, PKCE and state check.
pub struct LoopbackAuthenticator {
    http: reqwest::Client,
    open_browser: bool,
    timeout: Duration,
}

impl LoopbackAuthenticator {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            open_browser: true,
            timeout: CONSENT_TIMEOUT,
        }
    }

    pub fn open_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Authenticator for LoopbackAuthenticator {
    async fn authenticate(
        &self,
        keyfile: &Path,
        scopes: &[&str],
    ) -> Result<CredentialBundle, AuthError> {
        let keyfile_err = |message: String| AuthError::Keyfile {
            path: keyfile.to_path_buf(),
            message,
        };
        let raw = tokio::fs::read_to_string(keyfile)
            .await
            .map_err(|e| keyfile_err(e.to_string()))?;
        let secrets = ClientSecrets::from_keyfile_json(&raw).map_err(keyfile_err)?;

        let (listener, redirect_uri) = bind_redirect_listener(&secrets).await?;
        let code_verifier = generate_code_verifier();
        let state = generate_state();
        let consent_url = build_consent_url(
            &secrets,
            &redirect_uri,
            scopes,
            &generate_code_challenge(&code_verifier),
            &state,
        )?;

        eprintln!("Authorize this app by visiting: {consent_url}");
        if self.open_browser {
            let _ = open::that(consent_url.as_str());
        }

        let callback = tokio::select! {
            result = wait_for_callback(listener) => result?,
            _ = tokio::time::sleep(self.timeout) => {
                return Err(AuthError::Flow(format!(
                    "consent timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        if callback.state.as_deref() != Some(state.as_str()) {
            return Err(AuthError::Flow("OAuth state mismatch".to_string()));
        }

        let update = GoogleTokenEndpoint::new(self.http.clone(), secrets)
            .exchange_code(&callback.code, &code_verifier, &redirect_uri)
            .await?;
        if update.refresh_token.is_none() {
            info!("consent completed without a refresh token; stored credentials will expire");
        }
        CredentialBundle::from_update(&update)
            .ok_or_else(|| AuthError::Flow("token endpoint returned no access token".to_string()))
    }
}

/// Bind the port named by the first redirect URI, or an ephemeral one.
async fn bind_redirect_listener(secrets: &ClientSecrets) -> Result<(TcpListener, String), AuthError> {
    let configured = secrets
        .redirect_uris
        .first()
        .and_then(|raw| url::Url::parse(raw).ok());

    match configured {
        Some(uri) if uri.port().is_some() => {
            let addr = format!("127.0.0.1:{}", uri.port().unwrap_or_default());
            let listener = TcpListener::bind(addr).await?;
            Ok((listener, uri.to_string()))
        }
        Some(mut uri) => {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let port = listener.local_addr()?.port();
            uri.set_port(Some(port))
                .map_err(|()| AuthError::Flow(format!("redirect URI '{uri}' cannot carry a port")))?;
            Ok((listener, uri.to_string()))
        }
        None => {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            let port = listener.local_addr()?.port();
            Ok((listener, format!("http://127.0.0.1:{port}/oauth2callback")))
        }
    }
}

fn build_consent_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    scopes: &[&str],
    code_challenge: &str,
    state: &str,
) -> Result<url::Url, AuthError> {
    let scope = scopes.join(" ");
    url::Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
            ("state", state),
        ],
    )
    .map_err(|e| AuthError::Flow(format!("invalid auth_uri '{}': {e}", secrets.auth_uri)))
}

#[derive(Debug, PartialEq, Eq)]
struct Callback {
    code: String,
    state: Option<String>,
}

/// Accept loopback requests until one carries `code` or `error`.
async fn wait_for_callback(listener: TcpListener) -> Result<Callback, AuthError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        // GET /oauth2callback?code=...&state=... HTTP/1.1
        let path = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("");
        let url = url::Url::parse(&format!("http://localhost{path}"))
            .map_err(|e| AuthError::Flow(format!("failed to parse callback URL: {e}")))?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };

        if let Some(error) = param("error") {
            respond(&mut stream, "400 Bad Request", "Authorization was not granted.").await;
            return Err(AuthError::Flow(format!("consent denied: {error}")));
        }
        let Some(code) = param("code") else {
            respond(&mut stream, "404 Not Found", "Waiting for the authorization callback.").await;
            continue;
        };

        respond(&mut stream, "200 OK", "Authentication complete. You can close this tab.").await;
        return Ok(Callback {
            code,
            state: param("state"),
        });
    }
}

async fn respond(stream: &mut tokio::net::TcpStream, status: &str, message: &str) {
    let body = format!("<html><body><p>{message}</p></body></html>");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingRefresher {
        calls: AtomicUsize,
        update: TokenUpdate,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenUpdate, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.update.clone())
        }
    }

    fn refresher(access: &str) -> Arc<CountingRefresher> {
        Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            update: TokenUpdate {
                access_token: Some(access.to_string()),
                expiry_date: Some(now_millis() + 3_600_000),
                ..TokenUpdate::default()
            },
        })
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refreshing() {
        let refresher = refresher("new");
        let bundle = CredentialBundle::new("current")
            .with_refresh_token("r")
            .with_expiry_date(now_millis() + 3_600_000);
        let session = OAuthSession::new(bundle, Some(refresher.clone()));
        assert_eq!(session.access_token().await.unwrap(), "current");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_observer_is_notified() {
        let refresher = refresher("new");
        let bundle = CredentialBundle::new("old")
            .with_refresh_token("keep")
            .with_expiry_date(now_millis() - 1);
        let session = OAuthSession::new(bundle, Some(refresher.clone()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_refresh(move |update| {
            sink.lock().unwrap().push(update.access_token.clone());
        });

        assert_eq!(session.access_token().await.unwrap(), "new");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![Some("new".to_string())]);
        assert_eq!(session.snapshot().await.refresh_token.as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn observer_survives_a_poisoned_slot() {
        let refresher = refresher("new");
        let bundle = CredentialBundle::new("old").with_refresh_token("keep");
        let session = OAuthSession::new(bundle, Some(refresher.clone()));
        session.on_refresh(|_| panic!("observer blew up"));

        let poisoned = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _ = session.observer.lock().map(|slot| {
                        if let Some(observer) = slot.as_ref() {
                            observer(&TokenUpdate::default());
                        }
                    });
                })
                .join()
        });
        assert!(poisoned.is_err());
        assert!(session.observer.is_poisoned());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_refresh(move |update| {
            sink.lock().unwrap().push(update.access_token.clone());
        });
        assert_eq!(session.refresh_now().await.unwrap(), "new");
        assert_eq!(*seen.lock().unwrap(), vec![Some("new".to_string())]);
    }

    #[tokio::test]
    async fn stale_token_without_refresh_token_fails() {
        let session = OAuthSession::new(
            CredentialBundle::new("old").with_expiry_date(0),
            Some(refresher("new")),
        );
        assert!(matches!(
            session.access_token().await,
            Err(AuthError::MissingRefreshToken)
        ));
    }

    #[tokio::test]
    async fn stale_token_without_refresher_fails() {
        let session = OAuthSession::new(
            CredentialBundle::new("old")
                .with_refresh_token("r")
                .with_expiry_date(0),
            None,
        );
        assert!(!session.can_refresh());
        assert!(matches!(
            session.access_token().await,
            Err(AuthError::RefreshUnavailable)
        ));
    }

    #[tokio::test]
    async fn refresh_grant_posts_the_client_registration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .and(body_string_contains("client_id=cid"))
            .and(body_string_contains("client_secret=sec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = GoogleTokenEndpoint::new(
            reqwest::Client::new(),
            ClientSecrets::synthesized("cid", "sec"),
        )
        .with_token_uri(format!("{}/token", server.uri()));
        let update = endpoint.refresh("r1").await.unwrap();
        assert_eq!(update.access_token.as_deref(), Some("fresh"));
        assert_eq!(update.refresh_token, None);
        assert!(update.expiry_date.is_some());
    }

    #[tokio::test]
    async fn refresh_rejection_carries_the_google_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let endpoint = GoogleTokenEndpoint::new(
            reqwest::Client::new(),
            ClientSecrets::synthesized("cid", "sec"),
        )
        .with_token_uri(format!("{}/token", server.uri()));
        let err = endpoint.refresh("r1").await.unwrap_err();
        match err {
            AuthError::TokenEndpoint { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid_grant: Token has been expired or revoked.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn consent_url_requests_offline_access_with_pkce() {
        let secrets = ClientSecrets::synthesized("cid", "sec");
        let url = build_consent_url(
            &secrets,
            "http://localhost:3000/oauth2callback",
            &gtasks_core::auth::OAUTH_SCOPES,
            "challenge",
            "state-1",
        )
        .unwrap();
        let pairs: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "state-1");
        assert_eq!(
            pairs["scope"],
            "https://www.googleapis.com/auth/tasks https://www.googleapis.com/auth/calendar"
        );
    }

    #[tokio::test]
    async fn callback_skips_unrelated_requests_and_returns_the_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(wait_for_callback(listener));

        let mut favicon = tokio::net::TcpStream::connect(addr).await.unwrap();
        favicon
            .write_all(b"GET /favicon.ico HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut sink = Vec::new();
        favicon.read_to_end(&mut sink).await.unwrap();

        let mut callback = tokio::net::TcpStream::connect(addr).await.unwrap();
        callback
            .write_all(b"GET /oauth2callback?code=abc&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(
            result,
            Callback {
                code: "abc".to_string(),
                state: Some("xyz".to_string())
            }
        );
    }
}
