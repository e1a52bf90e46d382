//! Obtaining a fresh authorization code.
//!
//! `InteractiveFlow` sends the user to the Smartsheet consent page and waits for the redirect on a
//! local `CallbackListener`. If the listener cannot bind, or nothing usable arrives in time, it
//! asks the user to paste the code (or the whole redirect URL) instead. `NonInteractive` is used
//! where no user is present and always fails.

use crate::api::callback::{extract_code, CallbackListener, CALLBACK_WAIT};
use crate::api::oauth::{AuthorizationCode, TokenEndpoint};
use crate::error::{Error, ErrorType, Res};
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use oauth2::CsrfToken;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Produces one authorization code for the token manager to exchange.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        endpoint: &dyn TokenEndpoint,
        scopes: &[String],
    ) -> Result<AuthorizationCode>;
}

/// Asks the user for the code when the callback did not deliver one.
#[async_trait]
pub trait CodePrompt: Send + Sync {
    /// One line of user input, or `None` if there was none.
    async fn read_code(&self, message: &str) -> Res<Option<String>>;
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl CodePrompt for StdinPrompt {
    async fn read_code(&self, message: &str) -> Res<Option<String>> {
        let message = message.to_string();
        tokio::task::spawn_blocking(move || -> Res<Option<String>> {
            let mut stderr = std::io::stderr();
            write!(stderr, "{message}").context("Unable to write the prompt")?;
            stderr.flush().context("Unable to write the prompt")?;
            let mut line = String::new();
            let read = std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Unable to read from stdin")?;
            if read == 0 {
                return Ok(None);
            }
            Ok(Some(line))
        })
        .await
        .context("The prompt task failed")?
    }
}

/// The browser, local callback and manual entry protocol.
pub struct InteractiveFlow {
    state: Option<String>,
    wait: Duration,
    open_browser: bool,
    prompt: Arc<dyn CodePrompt>,
}

impl Default for InteractiveFlow {
    fn default() -> Self {
        Self {
            state: None,
            wait: CALLBACK_WAIT,
            open_browser: true,
            prompt: Arc::new(StdinPrompt),
        }
    }
}

impl InteractiveFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `state` instead of a random CSRF value.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn CodePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    async fn listen(&self, redirect_uri: &Url, state: &str) -> Option<String> {
        let listener = match CallbackListener::bind(redirect_uri, state).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Could not start the callback listener: {e:#}. Falling back to manual entry.");
                return None;
            }
        };
        info!(
            "Waiting up to {}s for the authorization callback on {redirect_uri}",
            self.wait.as_secs()
        );
        listener.wait(self.wait).await
    }

    async fn manual_entry(&self, state: &str) -> Result<AuthorizationCode> {
        let line = self
            .prompt
            .read_code(
                "\nPaste the 'code' parameter, or the whole URL you were redirected to \
                (press Enter to cancel): ",
            )
            .await
            .map_err(|e| Error::new(ErrorType::FlowAbandoned, e))?;
        let line = line.unwrap_or_default();
        match parse_manual_entry(&line, state) {
            Some(code) => Ok(AuthorizationCode::new(code)),
            None => Err(Error::message(
                ErrorType::FlowAbandoned,
                "No authorization code was provided",
            )),
        }
    }
}

#[async_trait]
impl Authorizer for InteractiveFlow {
    async fn authorize(
        &self,
        endpoint: &dyn TokenEndpoint,
        scopes: &[String],
    ) -> Result<AuthorizationCode> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => CsrfToken::new_random().secret().clone(),
        };
        let url = endpoint.authorize_url(scopes, &state);

        info!("Authorization required. Opening the Smartsheet consent page in your browser.");
        eprintln!("\nIf the browser does not open, visit this URL:\n\n{url}\n");
        if self.open_browser {
            if let Err(e) = open::that(url.as_str()) {
                warn!("Failed to open the browser: {e}");
            }
        }

        if let Some(code) = self.listen(endpoint.redirect_uri(), &state).await {
            info!("Received the authorization code");
            return Ok(AuthorizationCode::new(code));
        }
        self.manual_entry(&state).await
    }
}

/// Interprets what the user pasted. A bare code is taken as-is. A URL (or a query string) must
/// carry a `code`, and if it carries a `state` as well, that state must match.
pub(crate) fn parse_manual_entry(input: &str, expected_state: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let query = if let Ok(url) = Url::parse(input) {
        url.query().unwrap_or("").to_string()
    } else if input.contains("code=") {
        input.trim_start_matches('?').to_string()
    } else {
        return Some(input.to_string());
    };

    let has_state = url::form_urlencoded::parse(query.as_bytes()).any(|(k, _)| k == "state");
    if has_state {
        return match extract_code(&query, expected_state) {
            Ok(code) => Some(code),
            Err(reason) => {
                warn!("Ignoring the pasted URL: {reason}");
                None
            }
        };
    }
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .filter(|c| !c.is_empty())
}

/// Used where nobody can answer a browser prompt. It never produces a code.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

#[async_trait]
impl Authorizer for NonInteractive {
    async fn authorize(
        &self,
        _endpoint: &dyn TokenEndpoint,
        _scopes: &[String],
    ) -> Result<AuthorizationCode> {
        debug!("Interactive authorization is unavailable in this runtime");
        Err(Error::message(
            ErrorType::FlowAbandoned,
            "Interactive authorization is not possible here. Run 'reaper auth' locally and \
            upload the resulting tokens to the secret store.",
        ))
    }
}
