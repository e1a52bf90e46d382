//! Authentication command handlers.
//!
//! - `reaper auth` - acquire a client, authorizing in the browser if needed
//! - `reaper auth --verify` - check the stored tokens, refreshing them at most once

use crate::api::{self, AuthenticatedClient, Mode, Runtime, TokenSource};
use crate::commands::Out;
use crate::{utils, Config, Result};
use serde::Serialize;

/// What the auth commands report. The access token is masked.
#[derive(Debug, Clone, Serialize)]
pub struct AuthReport {
    pub email: String,
    pub source: TokenSource,
    pub access_token: String,
}

/// Handles `reaper auth`. This is the command that may open a browser.
pub async fn auth(config: &Config, runtime: Runtime, mode: Mode) -> Result<Out<AuthReport>> {
    let manager = api::token_manager(config, runtime, mode).await?;
    let client = manager.acquire_client(config.scopes()).await?;
    report(client).await
}

/// Handles `reaper auth --verify`. This NEVER opens a browser. If the stored tokens cannot be
/// used or refreshed it fails and tells the user to run `reaper auth`.
pub async fn auth_verify(config: &Config, runtime: Runtime, mode: Mode) -> Result<Out<AuthReport>> {
    let manager = api::token_manager(config, runtime, mode).await?;
    let client = manager.verify().await?;
    report(client).await
}

async fn report(client: AuthenticatedClient) -> Result<Out<AuthReport>> {
    let email = match client.user() {
        Some(user) => user.email.clone(),
        None => client.client().current_user().await?.email,
    };
    let report = AuthReport {
        email,
        source: client.source(),
        access_token: utils::mask(client.tokens().access_token()),
    };
    let message = match report.source {
        TokenSource::Stored => format!("Authenticated as {} with the stored token", report.email),
        TokenSource::Refreshed => format!("Authenticated as {} with a refreshed token", report.email),
        TokenSource::Authorized => format!("Authorized as {}", report.email),
    };
    Ok(Out::new(message, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_auth_in_test_mode() {
        let env = TestEnv::new().await;
        let out = auth(&env.config(), Runtime::Local, Mode::Test).await.unwrap();
        let report = out.structure().unwrap();
        assert_eq!("reaper@example.com", report.email);
        assert_eq!(TokenSource::Stored, report.source);
        assert!(report.access_token.starts_with("****"));
    }

    #[tokio::test]
    async fn test_verify_in_test_mode() {
        let env = TestEnv::new().await;
        let out = auth_verify(&env.config(), Runtime::Local, Mode::Test)
            .await
            .unwrap();
        assert!(out.message().contains("reaper@example.com"));
    }
}
