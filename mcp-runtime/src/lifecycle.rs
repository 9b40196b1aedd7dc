//! Credential lifecycle: decide between reusing, refreshing and re-bootstrapping
//! the stored credentials, and hand dispatch one authenticated client factory.

use std::path::PathBuf;
use std::sync::Arc;

use gtasks_core::auth::OAUTH_SCOPES;
use gtasks_core::credentials::CredentialBundle;
use gtasks_core::error::{ErrorPayload, codes};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapChain, BootstrapEnv};
use crate::config::RuntimeConfig;
use crate::google::{AuthenticatedClientFactory, GoogleEndpoints};
use crate::oauth::{
    AuthError, Authenticator, GoogleTokenEndpoint, LoopbackAuthenticator, OAuthSession,
    TokenRefresher,
};
use crate::store::{StoreError, TokenStore};

pub const NO_CREDENTIALS_MESSAGE: &str = "No credentials found. Please provide 'gcp-oauth.keys.json' or set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET environment variables.";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("credential file {0} disappeared before it could be loaded")]
    Missing(PathBuf),
}

impl CredentialError {
    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::Configuration(_) => codes::CONFIGURATION_ERROR,
            CredentialError::Authentication(_) => codes::AUTHENTICATION_ERROR,
            CredentialError::Store(_) | CredentialError::Missing(_) => {
                codes::CREDENTIAL_STORE_ERROR
            }
        }
    }

    pub fn docs_hint(&self) -> Option<&'static str> {
        match self {
            CredentialError::Configuration(_) => Some(
                "Set GOOGLE_OAUTH_CREDENTIALS to a keyfile path, place gcp-oauth.keys.json in the config directory, or export GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET.",
            ),
            CredentialError::Authentication(_) => {
                Some("Run `gtasks-mcp auth` to repeat the consent flow.")
            }
            CredentialError::Store(_) | CredentialError::Missing(_) => {
                Some("Check permissions on the config directory, or pass --credentials-path.")
            }
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let payload = ErrorPayload::new(self.code(), self.to_string());
        match self.docs_hint() {
            Some(hint) => payload.with_docs_hint(hint),
            None => payload,
        }
    }
}

pub struct CredentialLifecycleManager {
    store: TokenStore,
    chain: BootstrapChain,
    authenticator: Arc<dyn Authenticator>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    http: reqwest::Client,
    endpoints: GoogleEndpoints,
}

impl CredentialLifecycleManager {
    pub fn new(
        config: &RuntimeConfig,
        env: BootstrapEnv,
        authenticator: Arc<dyn Authenticator>,
        http: reqwest::Client,
    ) -> Result<Self, CredentialError> {
        if config.ephemeral_keyfile_path == config.credentials_path {
            return Err(CredentialError::Configuration(format!(
                "synthesized keyfile path {} must differ from the credentials path",
                config.ephemeral_keyfile_path.display()
            )));
        }
        Ok(Self {
            store: TokenStore::new(&config.credentials_path),
            chain: BootstrapChain::new(
                env,
                &config.local_keyfile_path,
                &config.ephemeral_keyfile_path,
            ),
            authenticator,
            refresher: None,
            http,
            endpoints: config.endpoints.clone(),
        })
    }

    /// Production wiring: process environment and the loopback consent flow.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, CredentialError> {
        let http = reqwest::Client::new();
        let authenticator = LoopbackAuthenticator::new(http.clone())
            .open_browser(config.open_browser)
            .timeout(config.auth_timeout);
        Self::new(config, BootstrapEnv::from_process(), Arc::new(authenticator), http)
    }

    /// Use this refresher instead of one derived from the bootstrap chain.
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Run consent against the first available source and persist the result.
    ///
    /// The synthesized keyfile, if any, is removed only after the store write,
    /// and on every early return.
    pub async fn bootstrap(&self) -> Result<CredentialBundle, CredentialError> {
        let source = self
            .chain
            .select()
            .ok_or_else(|| CredentialError::Configuration(NO_CREDENTIALS_MESSAGE.to_string()))?;
        info!(source = source.describe(), "bootstrapping credentials");

        let ephemeral = self.chain.ephemeral_keyfile();
        let keyfile = source
            .materialize(ephemeral)
            .map_err(|source| StoreError::Io {
                path: ephemeral.to_path_buf(),
                source,
            })?;
        let bundle = self
            .authenticator
            .authenticate(keyfile.path(), &OAUTH_SCOPES)
            .await?;
        self.store.save(&bundle)?;
        drop(keyfile);

        info!(path = %self.store.path().display(), "credentials persisted");
        Ok(bundle)
    }

    /// Produce the client factory. Stored credentials are validated first; a
    /// failed validation triggers one bootstrap and one retry.
    ///
    /// Credentials that came from a first-time bootstrap (nothing was stored)
    /// get no second consent: if they fail validation the error is returned
    /// as is, so a startup never asks for consent twice.
    pub async fn ensure_authenticated(&self) -> Result<AuthenticatedClientFactory, CredentialError> {
        let bootstrapped = if self.store.exists() {
            false
        } else {
            info!(path = %self.store.path().display(), "no stored credentials");
            self.bootstrap().await?;
            true
        };

        let session = match self.validated_session().await {
            Ok(session) => session,
            Err(err) if !bootstrapped => {
                warn!(error = %err, "stored credentials failed validation; bootstrapping again");
                self.bootstrap().await?;
                self.validated_session().await?
            }
            Err(err) => return Err(err),
        };

        Ok(AuthenticatedClientFactory::new(
            self.http.clone(),
            session,
            self.endpoints.clone(),
        ))
    }

    async fn validated_session(&self) -> Result<Arc<OAuthSession>, CredentialError> {
        let bundle = self
            .store
            .load()?
            .ok_or_else(|| CredentialError::Missing(self.store.path().to_path_buf()))?;
        let session = Arc::new(OAuthSession::new(bundle, self.refresher()));

        let store = self.store.clone();
        session.on_refresh(move |update| match store.apply_update(update) {
            Ok(Some(_)) => debug!(path = %store.path().display(), "refreshed token persisted"),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to persist refreshed token"),
        });

        session.access_token().await?;
        Ok(session)
    }

    fn refresher(&self) -> Option<Arc<dyn TokenRefresher>> {
        if let Some(refresher) = &self.refresher {
            return Some(refresher.clone());
        }
        let secrets = self.chain.client_secrets()?;
        let mut endpoint = GoogleTokenEndpoint::new(self.http.clone(), secrets);
        if let Some(token_uri) = &self.endpoints.token_uri {
            endpoint = endpoint.with_token_uri(token_uri.as_str());
        }
        Some(Arc::new(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use gtasks_core::credentials::{TokenUpdate, now_millis};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Consent {
        keyfile: PathBuf,
        keyfile_existed: bool,
        scopes: Vec<String>,
    }

    /// Hands out queued outcomes in order; `None` is a denied consent.
    struct FakeAuthenticator {
        outcomes: Mutex<Vec<Option<CredentialBundle>>>,
        consents: Mutex<Vec<Consent>>,
    }

    impl FakeAuthenticator {
        fn granting(bundles: Vec<CredentialBundle>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(bundles.into_iter().map(Some).collect()),
                consents: Mutex::new(Vec::new()),
            })
        }

        fn denying() -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(vec![None]),
                consents: Mutex::new(Vec::new()),
            })
        }

        fn consents(&self) -> Vec<Consent> {
            self.consents.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn authenticate(
            &self,
            keyfile: &Path,
            scopes: &[&str],
        ) -> Result<CredentialBundle, AuthError> {
            self.consents.lock().unwrap().push(Consent {
                keyfile: keyfile.to_path_buf(),
                keyfile_existed: keyfile.is_file(),
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
            });
            let mut outcomes = self.outcomes.lock().unwrap();
            let next = if outcomes.is_empty() { None } else { outcomes.remove(0) };
            next.ok_or_else(|| AuthError::Flow("consent denied: access_denied".to_string()))
        }
    }

    struct FakeRefresher {
        calls: AtomicUsize,
    }

    impl FakeRefresher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenUpdate, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenUpdate {
                access_token: Some(format!("refreshed-{n}")),
                expiry_date: Some(now_millis() + 3_600_000),
                ..TokenUpdate::default()
            })
        }
    }

    fn env(oauth: Option<&Path>, pair: Option<(&str, &str)>) -> BootstrapEnv {
        BootstrapEnv {
            oauth_credentials: oauth.map(|p| p.display().to_string()),
            client_id: pair.map(|(id, _)| id.to_string()),
            client_secret: pair.map(|(_, secret)| secret.to_string()),
        }
    }

    fn fresh(token: &str) -> CredentialBundle {
        CredentialBundle::new(token)
            .with_refresh_token("refresh-1")
            .with_expiry_date(now_millis() + 3_600_000)
    }

    fn stale(token: &str) -> CredentialBundle {
        CredentialBundle::new(token).with_expiry_date(now_millis() - 1_000)
    }

    fn manager(
        dir: &Path,
        env: BootstrapEnv,
        authenticator: Arc<FakeAuthenticator>,
    ) -> CredentialLifecycleManager {
        let config = RuntimeConfig::from_dir(dir);
        CredentialLifecycleManager::new(&config, env, authenticator, reqwest::Client::new())
            .unwrap()
    }

    #[tokio::test]
    async fn no_source_is_a_configuration_error_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let auth = FakeAuthenticator::granting(vec![fresh("a")]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());

        let err = manager.ensure_authenticated().await.err().unwrap();
        assert!(matches!(err, CredentialError::Configuration(ref m) if m == NO_CREDENTIALS_MESSAGE));
        assert_eq!(err.code(), codes::CONFIGURATION_ERROR);
        assert!(auth.consents().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn env_keyfile_path_is_used_when_it_is_the_only_source() {
        let dir = tempfile::tempdir().unwrap();
        let keyfile = dir.path().join("elsewhere.json");
        std::fs::write(&keyfile, "{}").unwrap();
        let auth = FakeAuthenticator::granting(vec![fresh("a")]);
        let manager = manager(dir.path(), env(Some(&keyfile), None), auth.clone());

        manager.ensure_authenticated().await.unwrap();
        let consents = auth.consents();
        assert_eq!(consents.len(), 1);
        assert_eq!(consents[0].keyfile, keyfile);
        assert_eq!(
            consents[0].scopes,
            vec![
                "https://www.googleapis.com/auth/tasks".to_string(),
                "https://www.googleapis.com/auth/calendar".to_string(),
            ]
        );
        assert!(keyfile.exists());
    }

    #[tokio::test]
    async fn local_keyfile_is_used_when_it_is_the_only_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        std::fs::write(&config.local_keyfile_path, "{}").unwrap();
        let auth = FakeAuthenticator::granting(vec![fresh("a")]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());

        manager.ensure_authenticated().await.unwrap();
        assert_eq!(auth.consents()[0].keyfile, config.local_keyfile_path);
        let stored = manager.store().load().unwrap().unwrap();
        assert_eq!(stored.access_token, "a");
    }

    #[tokio::test]
    async fn synthesized_keyfile_exists_only_during_consent() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        let auth = FakeAuthenticator::granting(vec![fresh("a")]);
        let manager = manager(dir.path(), env(None, Some(("cid", "secret"))), auth.clone());

        manager.ensure_authenticated().await.unwrap();
        let consents = auth.consents();
        assert_eq!(consents[0].keyfile, config.ephemeral_keyfile_path);
        assert!(consents[0].keyfile_existed);
        assert!(!config.ephemeral_keyfile_path.exists());
        assert!(config.credentials_path.exists());
    }

    #[tokio::test]
    async fn synthesized_keyfile_is_removed_when_consent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        let auth = FakeAuthenticator::denying();
        let manager = manager(dir.path(), env(None, Some(("cid", "secret"))), auth.clone());

        let err = manager.ensure_authenticated().await.err().unwrap();
        assert!(matches!(err, CredentialError::Authentication(AuthError::Flow(_))));
        assert!(auth.consents()[0].keyfile_existed);
        assert!(!config.ephemeral_keyfile_path.exists());
        assert!(!config.credentials_path.exists());
    }

    #[tokio::test]
    async fn synthesized_keyfile_is_removed_when_the_store_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        // A directory where the credential file belongs makes the final rename fail.
        std::fs::create_dir_all(&config.credentials_path).unwrap();
        let auth = FakeAuthenticator::granting(vec![fresh("granted")]);
        let manager = manager(dir.path(), env(None, Some(("cid", "secret"))), auth.clone());

        let err = manager.ensure_authenticated().await.err().unwrap();
        assert!(matches!(err, CredentialError::Store(StoreError::Io { .. })));
        assert_eq!(auth.consents().len(), 1);
        assert!(auth.consents()[0].keyfile_existed);
        assert!(!config.ephemeral_keyfile_path.exists());
        assert!(config.credentials_path.is_dir());
    }

    #[tokio::test]
    async fn fresh_stored_credentials_skip_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let auth = FakeAuthenticator::granting(vec![]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());
        manager.store().save(&fresh("stored")).unwrap();

        let factory = manager.ensure_authenticated().await.unwrap();
        assert_eq!(factory.session().access_token().await.unwrap(), "stored");
        assert!(auth.consents().is_empty());
    }

    #[tokio::test]
    async fn stale_credentials_are_refreshed_in_place_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let auth = FakeAuthenticator::granting(vec![]);
        let refresher = FakeRefresher::new();
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone())
            .with_refresher(refresher.clone());
        manager
            .store()
            .save(&stale("old").with_refresh_token("keep-me"))
            .unwrap();

        manager.ensure_authenticated().await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(auth.consents().is_empty());

        let stored = manager.store().load().unwrap().unwrap();
        assert_eq!(stored.access_token, "refreshed-1");
        assert_eq!(stored.refresh_token.as_deref(), Some("keep-me"));
    }

    #[tokio::test]
    async fn later_refreshes_keep_the_stored_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(
            dir.path(),
            BootstrapEnv::default(),
            FakeAuthenticator::granting(vec![]),
        )
        .with_refresher(FakeRefresher::new());
        manager.store().save(&fresh("first")).unwrap();

        let factory = manager.ensure_authenticated().await.unwrap();
        factory.session().refresh_now().await.unwrap();

        let stored = manager.store().load().unwrap().unwrap();
        assert_eq!(stored.access_token, "refreshed-1");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn unrefreshable_credentials_fall_back_to_bootstrap_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        std::fs::write(&config.local_keyfile_path, "{}").unwrap();
        let auth = FakeAuthenticator::granting(vec![fresh("renewed")]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());
        manager.store().save(&stale("expired")).unwrap();

        let factory = manager.ensure_authenticated().await.unwrap();
        assert_eq!(factory.session().access_token().await.unwrap(), "renewed");
        assert_eq!(auth.consents().len(), 1);
    }

    #[tokio::test]
    async fn second_validation_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        std::fs::write(&config.local_keyfile_path, "{}").unwrap();
        let auth = FakeAuthenticator::granting(vec![stale("still-stale"), fresh("unused")]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());
        manager.store().save(&stale("expired")).unwrap();

        let err = manager.ensure_authenticated().await.err().unwrap();
        assert!(matches!(
            err,
            CredentialError::Authentication(AuthError::MissingRefreshToken)
        ));
        assert_eq!(auth.consents().len(), 1);
    }

    #[tokio::test]
    async fn fresh_bootstrap_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        std::fs::write(&config.local_keyfile_path, "{}").unwrap();
        let auth = FakeAuthenticator::granting(vec![stale("born-stale"), fresh("unused")]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());

        assert!(manager.ensure_authenticated().await.is_err());
        assert_eq!(auth.consents().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_store_is_treated_as_failed_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::from_dir(dir.path());
        std::fs::write(&config.credentials_path, "not json").unwrap();
        std::fs::write(&config.local_keyfile_path, "{}").unwrap();
        let auth = FakeAuthenticator::granting(vec![fresh("recovered")]);
        let manager = manager(dir.path(), BootstrapEnv::default(), auth.clone());

        manager.ensure_authenticated().await.unwrap();
        let stored = manager.store().load().unwrap().unwrap();
        assert_eq!(stored.access_token, "recovered");
    }

    #[test]
    fn ephemeral_path_must_differ_from_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::from_dir(dir.path());
        config.ephemeral_keyfile_path = config.credentials_path.clone();
        let result = CredentialLifecycleManager::new(
            &config,
            BootstrapEnv::default(),
            FakeAuthenticator::granting(vec![]),
            reqwest::Client::new(),
        );
        assert!(matches!(result, Err(CredentialError::Configuration(_))));
    }

    #[test]
    fn payload_carries_code_and_hint() {
        let payload = CredentialError::Configuration(NO_CREDENTIALS_MESSAGE.to_string()).to_payload();
        assert_eq!(payload.error, codes::CONFIGURATION_ERROR);
        assert_eq!(payload.message, NO_CREDENTIALS_MESSAGE);
        assert!(payload.docs_hint.is_some());
    }
}
