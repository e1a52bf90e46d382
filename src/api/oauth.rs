//! OAuth 2.0 plumbing for the Smartsheet API.
//!
//! This module holds the credential and token types and the `TokenEndpoint` seam, which covers
//! the two server-to-server grants we use: exchanging an authorization code and refreshing an
//! access token. `OAuthClient` implements the seam with the `oauth2` crate over `reqwest`.

use crate::api::files::{File, SecretFile};
use crate::api::secrets::{SecretNames, SecretsClient};
use crate::error::{ErrorType, IntoResult, Res};
use crate::{utils, Error, Result};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicRequestTokenError};
use oauth2::{
    AsyncHttpClient, AuthType, AuthUrl, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, HttpClientError, HttpRequest, HttpResponse, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// Browser-facing authorization endpoint.
pub(crate) const AUTH_URL: &str = "https://app.smartsheet.com/b/authorize";

/// Server-to-server token endpoint.
pub(crate) const TOKEN_URL: &str = "https://api.smartsheet.com/2.0/token";

/// Every outbound token exchange uses this timeout.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) const CLIENT_ID_ENV: &str = "SMARTSHEET_CLIENT_ID";
pub(crate) const CLIENT_SECRET_ENV: &str = "SMARTSHEET_CLIENT_SECRET";

/// The OAuth client id and secret of the Smartsheet app. Loaded once and never changed.
#[derive(Clone, Eq, PartialEq)]
pub struct OAuthCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(Error::message(
                ErrorType::Configuration,
                "The OAuth client id and client secret must both be set",
            ));
        }
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Reads `SMARTSHEET_CLIENT_ID` and `SMARTSHEET_CLIENT_SECRET`, falling back to the client
    /// secret file for whichever of the two is not set.
    pub(crate) async fn load_local(client_secret_path: &Path) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let mut client_id = env(CLIENT_ID_ENV);
        let mut client_secret = env(CLIENT_SECRET_ENV);

        if client_id.is_none() || client_secret.is_none() {
            if !client_secret_path.is_file() {
                return Err(Error::message(
                    ErrorType::Configuration,
                    format!(
                        "OAuth credentials are missing: set {CLIENT_ID_ENV} and \
                        {CLIENT_SECRET_ENV} or provide {}",
                        client_secret_path.display()
                    ),
                ));
            }
            let file = File::<SecretFile>::load(client_secret_path)
                .await
                .pub_result(ErrorType::Configuration)?;
            debug!("Read OAuth credentials from {}", file.path().display());
            let data = file.into_data();
            client_id = client_id.or(Some(data.client_id));
            client_secret = client_secret.or(Some(data.client_secret));
        }

        let credentials = Self::new(
            client_id.unwrap_or_default(),
            client_secret.unwrap_or_default(),
        )?;
        debug!("{credentials:?}");
        Ok(credentials)
    }

    /// Reads the client id and secret entries from the secret store. Each entry is JSON with a
    /// single key, `CLIENT_ID` or `CLIENT_SECRET`, and a plain string is accepted as well.
    pub(crate) async fn load_from_secrets(
        secrets: &dyn SecretsClient,
        names: &SecretNames,
    ) -> Result<Self> {
        let client_id = read_credential(secrets, &names.client_id, "CLIENT_ID").await?;
        let client_secret = read_credential(secrets, &names.client_secret, "CLIENT_SECRET").await?;
        Self::new(client_id, client_secret)
    }
}

impl Debug for OAuthCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &utils::mask(&self.client_id))
            .field("client_secret", &utils::mask(&self.client_secret))
            .finish()
    }
}

async fn read_credential(secrets: &dyn SecretsClient, name: &str, key: &str) -> Result<String> {
    let payload = secrets
        .get_secret(name)
        .await
        .map_err(|e| e.context(format!("Unable to read secret '{name}'")))?
        .ok_or_else(|| {
            Error::message(
                ErrorType::Configuration,
                format!("The secret '{name}' does not exist"),
            )
        })?;
    match crate::api::secrets::json_field(&payload, key) {
        Some(value) => Ok(value),
        None => Err(Error::message(
            ErrorType::Configuration,
            format!("The secret '{name}' does not contain the key '{key}'"),
        )),
    }
}

/// An access token and the refresh token issued with it. A pair is always replaced as a whole.
/// An empty `refresh_token` means the server did not issue one.
#[derive(Default, Clone, Eq, PartialEq)]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        if self.refresh_token.is_empty() {
            None
        } else {
            Some(&self.refresh_token)
        }
    }
}

impl Debug for TokenPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &utils::mask(&self.access_token))
            .field("refresh_token", &utils::mask(&self.refresh_token))
            .finish()
    }
}

/// A single-use authorization code. It is consumed by value when exchanged, so it cannot be
/// presented to the token endpoint twice.
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub(crate) fn into_secret(self) -> String {
        self.0
    }
}

impl Debug for AuthorizationCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthorizationCode({})", utils::mask(&self.0))
    }
}

/// The token endpoint and the authorization URL that leads to it.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// The browser URL for one authorization round trip carrying `state`.
    fn authorize_url(&self, scopes: &[String], state: &str) -> Url;

    /// Where the authorization server sends the browser after consent.
    fn redirect_uri(&self) -> &Url;

    /// Trades a code for a token pair. A response without a refresh token is an error.
    async fn exchange_code(&self, code: AuthorizationCode) -> Result<TokenPair>;

    /// Trades a refresh token for a new pair. If the server does not rotate the refresh token,
    /// the presented one is kept.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair>;
}

type SmartsheetOAuth =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// The live implementation of `TokenEndpoint`.
pub struct OAuthClient {
    oauth: SmartsheetOAuth,
    http: TokenHttp,
    redirect_uri: Url,
}

impl OAuthClient {
    pub fn new(credentials: &OAuthCredentials, redirect_uri: &str) -> Result<Self> {
        Self::with_endpoints(credentials, redirect_uri, AUTH_URL, TOKEN_URL)
    }

    pub(crate) fn with_endpoints(
        credentials: &OAuthCredentials,
        redirect_uri: &str,
        auth_url: &str,
        token_url: &str,
    ) -> Result<Self> {
        let parsed_redirect = Url::parse(redirect_uri)
            .with_context(|| format!("Invalid redirect URI '{redirect_uri}'"))
            .pub_result(ErrorType::Configuration)?;
        let oauth = build_oauth(credentials, redirect_uri, auth_url, token_url)
            .pub_result(ErrorType::Configuration)?;

        // Following redirects from the token endpoint would expose the client secret.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Unable to build the HTTP client")
            .pub_result(ErrorType::Internal)?;

        Ok(Self {
            oauth,
            http: TokenHttp(http),
            redirect_uri: parsed_redirect,
        })
    }
}

fn build_oauth(
    credentials: &OAuthCredentials,
    redirect_uri: &str,
    auth_url: &str,
    token_url: &str,
) -> Res<SmartsheetOAuth> {
    Ok(BasicClient::new(ClientId::new(credentials.client_id.clone()))
        .set_client_secret(ClientSecret::new(credentials.client_secret.clone()))
        .set_auth_uri(AuthUrl::new(auth_url.to_string()).context("Invalid authorization URL")?)
        .set_token_uri(TokenUrl::new(token_url.to_string()).context("Invalid token URL")?)
        .set_redirect_uri(
            RedirectUrl::new(redirect_uri.to_string()).context("Invalid redirect URI")?,
        )
        // Smartsheet expects the client id and secret in the form body.
        .set_auth_type(AuthType::RequestBody))
}

/// The HTTP client for token requests. A 5xx reply is turned into a transport error so that an
/// outage of the token endpoint is classified as a network failure and not as a rejected grant.
struct TokenHttp(reqwest::Client);

impl<'c> AsyncHttpClient<'c> for TokenHttp {
    type Error = HttpClientError<reqwest::Error>;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<HttpResponse, Self::Error>> + Send + 'c>>;

    fn call(&'c self, request: HttpRequest) -> Self::Future {
        Box::pin(async move {
            let response = self.0.call(request).await?;
            let status = response.status();
            if status.is_server_error() {
                return Err(HttpClientError::Other(format!(
                    "The token endpoint answered {status}"
                )));
            }
            Ok(response)
        })
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    fn authorize_url(&self, scopes: &[String], state: &str) -> Url {
        let state = state.to_string();
        let (url, _) = self
            .oauth
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .url();
        url
    }

    fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    async fn exchange_code(&self, code: AuthorizationCode) -> Result<TokenPair> {
        debug!("Exchanging authorization code for tokens");
        let response = self
            .oauth
            .exchange_code(oauth2::AuthorizationCode::new(code.into_secret()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                let (_, error) = classify(e);
                error.context("Authorization code exchange failed")
            })?;

        let access_token = response.access_token().secret().to_string();
        let refresh_token = match response.refresh_token() {
            Some(r) => r.secret().to_string(),
            None => {
                return Err(Error::message(
                    ErrorType::Authentication,
                    "The token response to the code exchange did not include a refresh token",
                ))
            }
        };
        info!("Authorization code exchange succeeded");
        Ok(TokenPair::new(access_token, refresh_token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        debug!("Refreshing access token");
        let presented = RefreshToken::new(refresh_token.to_string());
        let response = match self
            .oauth
            .exchange_refresh_token(&presented)
            .request_async(&self.http)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let (failure, error) = classify(e);
                let error = error.context("Token refresh failed");
                emit_refresh_failure(failure, &error);
                return Err(error);
            }
        };

        let access_token = response.access_token().secret().to_string();
        let refresh_token = response
            .refresh_token()
            .map(|r| r.secret().to_string())
            .unwrap_or_else(|| refresh_token.to_string());
        info!("Token refresh succeeded");
        Ok(TokenPair::new(access_token, refresh_token))
    }
}

/// Sorts a token endpoint failure into the category the token manager acts on.
fn classify(e: BasicRequestTokenError<HttpClientError<reqwest::Error>>) -> (RefreshFailure, Error) {
    match e {
        RequestTokenError::ServerResponse(response) => {
            let failure = match response.error() {
                BasicErrorResponseType::InvalidGrant => RefreshFailure::TokenRevoked,
                _ => RefreshFailure::TokenExpired,
            };
            let description = response
                .error_description()
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            (
                failure,
                Error::message(
                    ErrorType::Authentication,
                    format!("OAuth error '{}'{description}", response.error()),
                ),
            )
        }
        RequestTokenError::Request(e) => (
            RefreshFailure::NetworkError,
            Error::new(ErrorType::Network, anyhow!("{e}")),
        ),
        RequestTokenError::Parse(e, _) => (
            RefreshFailure::Unknown,
            Error::new(
                ErrorType::Authentication,
                anyhow!("Unreadable token response: {e}"),
            ),
        ),
        RequestTokenError::Other(message) => (
            RefreshFailure::Unknown,
            Error::message(ErrorType::Authentication, message),
        ),
    }
}

/// The alert categories for a failed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailure {
    TokenRevoked,
    TokenExpired,
    NetworkError,
    Unknown,
}

serde_plain::derive_display_from_serialize!(RefreshFailure);

/// The structured record behind a `SMARTSHEET_AUTH_ERROR` log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshFailureRecord {
    pub error_type: RefreshFailure,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub original_error: Option<String>,
}

fn refresh_failure_message(failure: RefreshFailure) -> &'static str {
    match failure {
        RefreshFailure::TokenRevoked => {
            "Refresh token is invalid or revoked. Re-authorization required."
        }
        RefreshFailure::TokenExpired => "Token refresh failed with an OAuth error",
        RefreshFailure::NetworkError => "Token refresh failed to reach the token endpoint",
        RefreshFailure::Unknown => "Token refresh failed with an unreadable response",
    }
}

/// Logs one `SMARTSHEET_AUTH_ERROR: {json}` line that log-based alerting can match on.
pub(crate) fn emit_refresh_failure(failure: RefreshFailure, cause: &Error) -> RefreshFailureRecord {
    let record = RefreshFailureRecord {
        error_type: failure,
        message: refresh_failure_message(failure).to_string(),
        timestamp: Utc::now(),
        original_error: Some(format!("{:#}", cause.inner())),
    };
    match serde_json::to_string(&record) {
        Ok(json) => error!("SMARTSHEET_AUTH_ERROR: {json}"),
        Err(e) => error!("SMARTSHEET_AUTH_ERROR: {failure} (unable to serialize record: {e})"),
    }
    record
}
