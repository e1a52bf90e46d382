//! Turns whatever tokens we have into an authenticated Smartsheet client.
//!
//! `acquire_client` walks the token lifecycle:
//!
//! 1. Load the stored pair. Nothing stored goes straight to authorization.
//! 2. Probe the access token with `current_user`. Only an authentication failure means the token
//!    is invalid. Any other failure is assumed to be transient and the token is used as-is.
//! 3. If it is invalid and there is a refresh token, refresh once, persist the new pair and probe
//!    again.
//! 4. Otherwise ask the `Authorizer` for a code, exchange it once, persist the pair and use it.
//!
//! That is the entire retry budget: at most one refresh and one authorization per call.

use crate::api::authorize::Authorizer;
use crate::api::oauth::{TokenEndpoint, TokenPair};
use crate::api::token_store::TokenStore;
use crate::api::{ClientFactory, Smartsheet};
use crate::error::{Error, ErrorType};
use crate::model::User;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the token behind an `AuthenticatedClient` was obtained.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Stored,
    Refreshed,
    Authorized,
}

serde_plain::derive_display_from_serialize!(TokenSource);

/// A Smartsheet client together with the token pair it was built from.
pub struct AuthenticatedClient {
    client: Box<dyn Smartsheet>,
    tokens: TokenPair,
    source: TokenSource,
    user: Option<User>,
}

impl AuthenticatedClient {
    pub fn client(&self) -> &dyn Smartsheet {
        self.client.as_ref()
    }

    pub fn tokens(&self) -> &TokenPair {
        &self.tokens
    }

    pub fn source(&self) -> TokenSource {
        self.source
    }

    /// The user returned by the validation probe. `None` when the probe was skipped or failed
    /// with a transient error.
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}

enum Probe {
    Valid(Box<dyn Smartsheet>, Option<User>),
    Invalid,
}

pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    authorizer: Arc<dyn Authorizer>,
    factory: Arc<dyn ClientFactory>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        authorizer: Arc<dyn Authorizer>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            store,
            endpoint,
            authorizer,
            factory,
        }
    }

    /// Returns a client with a usable token, authorizing interactively if nothing else works.
    pub async fn acquire_client(&self, scopes: &[String]) -> Result<AuthenticatedClient> {
        if let Some(client) = self.from_store().await? {
            return Ok(client);
        }
        self.authorize(scopes).await
    }

    /// Like `acquire_client` but never starts an authorization. Fails with an `Authentication`
    /// error when the stored tokens cannot be used or refreshed.
    pub async fn verify(&self) -> Result<AuthenticatedClient> {
        match self.from_store().await? {
            Some(client) => Ok(client),
            None => Err(Error::message(
                ErrorType::Authentication,
                format!(
                    "No usable tokens in the {}. Run 'reaper auth' to authorize again.",
                    self.store.describe()
                ),
            )),
        }
    }

    /// Steps 1 to 3. `None` means authorization is needed.
    async fn from_store(&self) -> Result<Option<AuthenticatedClient>> {
        let tokens = match self.store.load().await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => {
                info!("No stored tokens in the {}", self.store.describe());
                return Ok(None);
            }
            Err(e) => {
                warn!("Unable to load tokens, treating them as absent: {e}");
                return Ok(None);
            }
        };
        debug!("Loaded {tokens:?}");

        if let Probe::Valid(client, user) = self.probe(&tokens).await? {
            return Ok(Some(AuthenticatedClient {
                client,
                tokens,
                source: TokenSource::Stored,
                user,
            }));
        }

        let refresh_token = match tokens.refresh_token() {
            Some(r) => r,
            None => {
                info!("The stored access token is invalid and there is no refresh token");
                return Ok(None);
            }
        };
        let refreshed = match self.refresh(refresh_token).await? {
            Some(refreshed) => refreshed,
            None => return Ok(None),
        };
        self.persist(&refreshed).await;

        match self.probe(&refreshed).await? {
            Probe::Valid(client, user) => Ok(Some(AuthenticatedClient {
                client,
                tokens: refreshed,
                source: TokenSource::Refreshed,
                user,
            })),
            Probe::Invalid => {
                warn!("The refreshed access token was rejected");
                Ok(None)
            }
        }
    }

    /// Validates an access token. Only authentication failures make it invalid.
    async fn probe(&self, tokens: &TokenPair) -> Result<Probe> {
        let client = self.factory.create(tokens.access_token())?;
        match client.current_user().await {
            Ok(user) => {
                debug!("The access token is valid for {}", user.email);
                Ok(Probe::Valid(client, Some(user)))
            }
            Err(e) if e.is(ErrorType::Authentication) => {
                info!("The access token was rejected: {e}");
                Ok(Probe::Invalid)
            }
            Err(e) => {
                warn!("Could not validate the access token, assuming it is valid: {e}");
                Ok(Probe::Valid(client, None))
            }
        }
    }

    /// One refresh attempt. A network failure is fatal, any other failure means we fall through
    /// to authorization.
    async fn refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>> {
        info!("Refreshing the access token");
        match self.endpoint.refresh(refresh_token).await {
            Ok(tokens) => {
                info!("The access token was refreshed");
                Ok(Some(tokens))
            }
            Err(e) if e.is(ErrorType::Network) => Err(e.context("Token refresh failed")),
            Err(e) => {
                warn!("Token refresh failed, authorization is required: {e}");
                Ok(None)
            }
        }
    }

    /// Step 4.
    async fn authorize(&self, scopes: &[String]) -> Result<AuthenticatedClient> {
        info!("Starting authorization");
        let code = self
            .authorizer
            .authorize(self.endpoint.as_ref(), scopes)
            .await
            .map_err(|e| e.context("Authorization failed"))?;
        let tokens = self
            .endpoint
            .exchange_code(code)
            .await
            .map_err(|e| e.context("Exchanging the authorization code failed"))?;
        info!("Authorization succeeded");
        self.persist(&tokens).await;

        let client = self.factory.create(tokens.access_token())?;
        Ok(AuthenticatedClient {
            client,
            tokens,
            source: TokenSource::Authorized,
            user: None,
        })
    }

    /// Saves a new pair. A failure is logged and the pair is still used for this run.
    async fn persist(&self, tokens: &TokenPair) {
        if let Err(e) = self.store.save(tokens).await {
            warn!(
                "Unable to save tokens to the {}, continuing with unsaved tokens: {e}",
                self.store.describe()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::secrets::{MemorySecrets, SecretNames};
    use crate::api::test_client::{
        Script, ScriptedAuthorizer, ScriptedEndpoint, TestFactory, TestState,
    };
    use crate::api::token_store::SecretTokenStore;
    use url::Url;

    struct Fixture {
        secrets: MemorySecrets,
        state: TestState,
        endpoint: Arc<ScriptedEndpoint>,
        authorizer: Arc<ScriptedAuthorizer>,
        manager: TokenManager,
    }

    impl Fixture {
        async fn stored(&self) -> Option<TokenPair> {
            SecretTokenStore::new(Arc::new(self.secrets.clone()), SecretNames::default())
                .load()
                .await
                .unwrap()
        }
    }

    fn issue(access: &str, refresh: &str) -> Script {
        Script::Issue(TokenPair::new(access, refresh))
    }

    /// The repository accepts only `valid`. `stored` is put in the token store up front.
    async fn fixture(
        stored: Option<TokenPair>,
        valid: &[&str],
        refresh: Script,
        exchange: Script,
        code: Option<&str>,
    ) -> Fixture {
        let secrets = MemorySecrets::new();
        let store = SecretTokenStore::new(Arc::new(secrets.clone()), SecretNames::default());
        if let Some(tokens) = stored {
            store.save(&tokens).await.unwrap();
        }
        let state = TestState::empty();
        for token in valid {
            state.accept_token(*token);
        }
        let redirect = Url::parse("http://localhost:8080/callback").unwrap();
        let endpoint = Arc::new(ScriptedEndpoint::new(redirect, refresh, exchange));
        let authorizer = Arc::new(ScriptedAuthorizer::new(code));
        let manager = TokenManager::new(
            Arc::new(store),
            endpoint.clone(),
            authorizer.clone(),
            Arc::new(TestFactory::new(state.clone())),
        );
        Fixture {
            secrets,
            state,
            endpoint,
            authorizer,
            manager,
        }
    }

    fn scopes() -> Vec<String> {
        vec!["READ_SHEETS".to_string()]
    }

    #[tokio::test]
    async fn test_valid_stored_token_is_used() {
        let f = fixture(
            Some(TokenPair::new("good", "r")),
            &["good"],
            Script::Fail(ErrorType::Authentication),
            Script::Fail(ErrorType::Authentication),
            None,
        )
        .await;
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Stored, client.source());
        assert!(client.user().is_some());
        assert_eq!(0, f.endpoint.refresh_calls());
        assert_eq!(0, f.authorizer.calls());
    }

    #[tokio::test]
    async fn test_probe_network_error_assumes_valid() {
        let f = fixture(
            Some(TokenPair::new("good", "r")),
            &[],
            issue("new", "new-r"),
            Script::Fail(ErrorType::Authentication),
            None,
        )
        .await;
        f.state.set_unreachable(true);
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Stored, client.source());
        assert_eq!("good", client.tokens().access_token());
        assert!(client.user().is_none());
        assert_eq!(0, f.endpoint.refresh_calls());
        assert_eq!(0, f.authorizer.calls());
    }

    #[tokio::test]
    async fn test_invalid_token_is_refreshed_and_persisted() {
        let f = fixture(
            Some(TokenPair::new("stale", "r1")),
            &["fresh"],
            issue("fresh", "r2"),
            Script::Fail(ErrorType::Authentication),
            None,
        )
        .await;
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Refreshed, client.source());
        assert_eq!(1, f.endpoint.refresh_calls());
        assert_eq!(0, f.authorizer.calls());
        assert_eq!(Some(TokenPair::new("fresh", "r2")), f.stored().await);
        assert_eq!(2, f.state.probes());
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_through_to_authorization() {
        let f = fixture(
            Some(TokenPair::new("stale", "revoked")),
            &["authorized"],
            Script::Fail(ErrorType::Authentication),
            issue("authorized", "r3"),
            Some("the-code"),
        )
        .await;
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Authorized, client.source());
        assert_eq!(1, f.endpoint.refresh_calls());
        assert_eq!(1, f.authorizer.calls());
        assert_eq!(vec!["the-code".to_string()], f.endpoint.exchanged_codes());
        assert_eq!(Some(TokenPair::new("authorized", "r3")), f.stored().await);
    }

    #[tokio::test]
    async fn test_refreshed_token_still_invalid_authorizes_once() {
        let f = fixture(
            Some(TokenPair::new("stale", "r1")),
            &["authorized"],
            issue("also-stale", "r2"),
            issue("authorized", "r3"),
            Some("c"),
        )
        .await;
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Authorized, client.source());
        assert_eq!(1, f.endpoint.refresh_calls());
        assert_eq!(1, f.authorizer.calls());
        assert_eq!(1, f.endpoint.exchange_calls());
    }

    #[tokio::test]
    async fn test_refresh_network_error_is_fatal() {
        let f = fixture(
            Some(TokenPair::new("stale", "r1")),
            &[],
            Script::Fail(ErrorType::Network),
            issue("authorized", "r3"),
            Some("c"),
        )
        .await;
        let err = f.manager.acquire_client(&scopes()).await.err().unwrap();
        assert!(err.is(ErrorType::Network));
        assert_eq!(0, f.authorizer.calls());
    }

    #[tokio::test]
    async fn test_no_tokens_authorizes() {
        let f = fixture(
            None,
            &["authorized"],
            issue("unused", "unused"),
            issue("authorized", "r"),
            Some("c"),
        )
        .await;
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Authorized, client.source());
        assert_eq!(0, f.endpoint.refresh_calls());
        assert_eq!(Some(TokenPair::new("authorized", "r")), f.stored().await);
    }

    #[tokio::test]
    async fn test_invalid_token_without_refresh_token_authorizes() {
        let f = fixture(
            Some(TokenPair::new("stale", "")),
            &["authorized"],
            issue("unused", "unused"),
            issue("authorized", "r"),
            Some("c"),
        )
        .await;
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Authorized, client.source());
        assert_eq!(0, f.endpoint.refresh_calls());
    }

    #[tokio::test]
    async fn test_abandoned_flow_fails_without_exchange() {
        let f = fixture(
            None,
            &[],
            issue("unused", "unused"),
            issue("unused", "unused"),
            None,
        )
        .await;
        let err = f.manager.acquire_client(&scopes()).await.err().unwrap();
        assert!(err.is(ErrorType::FlowAbandoned));
        assert_eq!(0, f.endpoint.exchange_calls());
    }

    #[tokio::test]
    async fn test_save_failure_still_returns_client() {
        let f = fixture(
            None,
            &["authorized"],
            issue("unused", "unused"),
            issue("authorized", "r"),
            Some("c"),
        )
        .await;
        f.secrets.set_fail_writes(true);
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!("authorized", client.tokens().access_token());
        f.secrets.set_fail_writes(false);
        assert_eq!(None, f.stored().await);
    }

    #[tokio::test]
    async fn test_load_failure_is_treated_as_absent() {
        let f = fixture(
            Some(TokenPair::new("good", "r")),
            &["good", "authorized"],
            issue("unused", "unused"),
            issue("authorized", "r"),
            Some("c"),
        )
        .await;
        f.secrets.set_fail_reads(true);
        let client = f.manager.acquire_client(&scopes()).await.unwrap();
        assert_eq!(TokenSource::Authorized, client.source());
    }

    #[tokio::test]
    async fn test_verify_never_authorizes() {
        let f = fixture(
            Some(TokenPair::new("stale", "revoked")),
            &["authorized"],
            Script::Fail(ErrorType::Authentication),
            issue("authorized", "r"),
            Some("c"),
        )
        .await;
        let err = f.manager.verify().await.err().unwrap();
        assert!(err.is(ErrorType::Authentication));
        assert_eq!(1, f.endpoint.refresh_calls());
        assert_eq!(0, f.authorizer.calls());
    }
}
