//! In-memory stand-ins for the Smartsheet API and the OAuth endpoints.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without talking to Smartsheet. Set `REAPER_TEST_MODE` to use it.

use crate::api::oauth::{AuthorizationCode, TokenEndpoint, TokenPair};
use crate::api::secrets::{MemorySecrets, SecretNames};
use crate::api::token_manager::TokenManager;
use crate::api::token_store::SecretTokenStore;
use crate::api::{Authorizer, ClientFactory, Smartsheet};
use crate::error::{Error, ErrorType};
use crate::model::{
    Cell, Column, Id, IntakeColumns, Row, Sheet, SheetSummary, User, Workspace, WorkspaceRef,
};
use crate::{Config, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

/// The access token the seeded `TestState` accepts.
pub const TEST_ACCESS_TOKEN: &str = "test-access-token";
pub const TEST_REFRESH_TOKEN: &str = "test-refresh-token";

pub const TEST_INTAKE_SHEET_ID: Id = 9001;
pub const TEST_INTAKE_SHEET_URL: &str = "https://app.smartsheet.com/sheets/IntakeQ7xP2?view=grid";

/// The intake column ids used by the seed data.
pub const TEST_COLUMNS: IntakeColumns = IntakeColumns {
    folder_url: 101,
    deletion_date: 102,
    em_notification_date: 103,
    deletion_status: 104,
};

#[derive(Debug, Default)]
struct Inner {
    valid_tokens: HashSet<String>,
    unreachable: bool,
    user: User,
    workspaces: Vec<Workspace>,
    sheets: Vec<Sheet>,
    failing_deletes: HashSet<Id>,
    failing_updates: bool,
    deleted: Vec<Id>,
    updates: Vec<(Id, Id, Id, String)>,
    probes: u32,
}

/// The shared state behind every `TestSmartsheet` made by the same `TestFactory`. Cloning shares
/// the state.
#[derive(Debug, Clone, Default)]
pub struct TestState {
    inner: Arc<Mutex<Inner>>,
}

impl TestState {
    /// An empty workspace that accepts no tokens.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Seeded with an intake sheet, three workspaces and one sheet inside a workspace. The intake
    /// rows, with today being 2026-01-05, are:
    ///
    /// 1. a `workspaces/` link to workspace 1, due
    /// 2. a link to sheet 9002 in workspace 2, due
    /// 3. a deletion date in February, not due
    /// 4. notified today, not due
    /// 5. no dates, skipped
    pub fn seeded() -> Self {
        let state = Self::empty();
        {
            let mut inner = state.lock();
            inner.valid_tokens.insert(TEST_ACCESS_TOKEN.to_string());
            inner.user = User {
                id: 1,
                email: "reaper@example.com".to_string(),
                first_name: Some("Test".to_string()),
                last_name: Some("User".to_string()),
            };
            inner.workspaces = vec![
                workspace(1, "Project Alpha", "https://app.smartsheet.com/workspaces/AlphaWs1"),
                workspace(2, "Project Beta", "https://app.smartsheet.com/workspaces/BetaWs22"),
                workspace(3, "Project Gamma", "https://app.smartsheet.com/workspaces/GammaWs3"),
            ];
            inner.sheets = vec![intake_sheet(), beta_plan_sheet()];
        }
        state
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn accept_token(&self, token: impl Into<String>) {
        self.lock().valid_tokens.insert(token.into());
    }

    /// Every call fails with a `Network` error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn fail_delete(&self, workspace_id: Id) {
        self.lock().failing_deletes.insert(workspace_id);
    }

    pub fn set_failing_updates(&self, failing: bool) {
        self.lock().failing_updates = failing;
    }

    pub fn add_workspace(&self, workspace: Workspace) {
        self.lock().workspaces.push(workspace);
    }

    /// Workspace ids deleted so far, in order.
    pub fn deleted(&self) -> Vec<Id> {
        self.lock().deleted.clone()
    }

    /// `(sheet_id, row_id, column_id, value)` for every cell update so far.
    pub fn updates(&self) -> Vec<(Id, Id, Id, String)> {
        self.lock().updates.clone()
    }

    /// How many times `current_user` was called.
    pub fn probes(&self) -> u32 {
        self.lock().probes
    }
}

fn workspace(id: Id, name: &str, permalink: &str) -> Workspace {
    Workspace {
        id,
        name: name.to_string(),
        permalink: permalink.to_string(),
        access_level: Some("OWNER".to_string()),
    }
}

fn column(id: Id, index: u32, title: &str, column_type: &str) -> Column {
    Column {
        id,
        index,
        title: title.to_string(),
        column_type: Some(column_type.to_string()),
        primary: index == 0,
    }
}

/// Builds an intake row. `None` leaves the cell out.
fn intake_row(
    id: Id,
    row_number: u32,
    folder: (&str, &str),
    deletion_date: Option<&str>,
    em_date: Option<&str>,
) -> Row {
    let (name, link) = folder;
    let mut cells = vec![Cell::new(TEST_COLUMNS.folder_url, name).with_hyperlink(link)];
    if let Some(d) = deletion_date {
        cells.push(Cell::new(TEST_COLUMNS.deletion_date, d));
    }
    if let Some(d) = em_date {
        cells.push(Cell::new(TEST_COLUMNS.em_notification_date, d));
    }
    Row {
        id,
        row_number,
        cells,
    }
}

fn intake_sheet() -> Sheet {
    let rows = vec![
        intake_row(
            501,
            1,
            ("Alpha", "https://app.smartsheet.com/workspaces/AlphaWs1"),
            Some("2026-01-01"),
            Some("2025-12-20"),
        ),
        intake_row(
            502,
            2,
            ("Beta plan", "https://app.smartsheet.com/sheets/BetaPlan9"),
            Some("2026-01-03"),
            Some("2025-12-28"),
        ),
        intake_row(
            503,
            3,
            ("Gamma", "https://app.smartsheet.com/workspaces/GammaWs3"),
            Some("2026-02-01"),
            Some("2026-01-02"),
        ),
        intake_row(
            504,
            4,
            ("Gamma again", "https://app.smartsheet.com/workspaces/GammaWs3"),
            Some("2026-01-05"),
            Some("2026-01-05"),
        ),
        intake_row(
            505,
            5,
            ("Undated", "https://app.smartsheet.com/workspaces/GammaWs3"),
            None,
            None,
        ),
    ];
    Sheet {
        id: TEST_INTAKE_SHEET_ID,
        name: "Workspace Deletion Intake".to_string(),
        permalink: crate::links::remove_query_string(TEST_INTAKE_SHEET_URL).to_string(),
        workspace: None,
        total_row_count: rows.len() as u64,
        columns: vec![
            column(TEST_COLUMNS.folder_url, 0, "Folder URL", "TEXT_NUMBER"),
            column(TEST_COLUMNS.deletion_date, 1, "Deletion Date", "DATE"),
            column(TEST_COLUMNS.em_notification_date, 2, "EM Notification Date", "DATE"),
            column(TEST_COLUMNS.deletion_status, 3, "Deletion Status", "PICKLIST"),
        ],
        rows,
    }
}

fn beta_plan_sheet() -> Sheet {
    Sheet {
        id: 9002,
        name: "Beta plan".to_string(),
        permalink: "https://app.smartsheet.com/sheets/BetaPlan9".to_string(),
        workspace: Some(WorkspaceRef {
            id: 2,
            name: "Project Beta".to_string(),
        }),
        ..Default::default()
    }
}

/// An implementation of the `Smartsheet` trait over a `TestState`, authenticated with one token.
pub struct TestSmartsheet {
    token: String,
    state: TestState,
}

impl TestSmartsheet {
    pub fn new(token: impl Into<String>, state: TestState) -> Self {
        Self {
            token: token.into(),
            state,
        }
    }

    /// Fails the way the live API would for an unreachable host or an unknown token.
    fn check(&self, inner: &Inner) -> Result<()> {
        if inner.unreachable {
            return Err(Error::message(
                ErrorType::Network,
                "error sending request: connection refused",
            ));
        }
        if !inner.valid_tokens.contains(&self.token) {
            return Err(Error::message(
                ErrorType::Authentication,
                "Your Access Token is invalid. (code 401)",
            ));
        }
        Ok(())
    }
}

fn not_found(what: &str, id: Id) -> Error {
    Error::message(ErrorType::ApiOperation, format!("{what} {id} not found (code 404)"))
}

#[async_trait]
impl Smartsheet for TestSmartsheet {
    async fn current_user(&self) -> Result<User> {
        let mut inner = self.state.lock();
        inner.probes += 1;
        self.check(&inner)?;
        Ok(inner.user.clone())
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let inner = self.state.lock();
        self.check(&inner)?;
        Ok(inner.workspaces.clone())
    }

    async fn list_sheets(&self) -> Result<Vec<SheetSummary>> {
        let inner = self.state.lock();
        self.check(&inner)?;
        Ok(inner.sheets.iter().map(Sheet::summary).collect())
    }

    async fn get_sheet(&self, sheet_id: Id) -> Result<Sheet> {
        let inner = self.state.lock();
        self.check(&inner)?;
        inner
            .sheets
            .iter()
            .find(|s| s.id == sheet_id)
            .cloned()
            .ok_or_else(|| not_found("Sheet", sheet_id))
    }

    async fn get_columns(&self, sheet_id: Id) -> Result<Vec<Column>> {
        Ok(self.get_sheet(sheet_id).await?.columns)
    }

    async fn update_cell(
        &self,
        sheet_id: Id,
        row_id: Id,
        column_id: Id,
        value: &str,
    ) -> Result<()> {
        let mut inner = self.state.lock();
        self.check(&inner)?;
        if inner.failing_updates {
            return Err(Error::message(
                ErrorType::ApiOperation,
                format!("Update row {row_id} of sheet {sheet_id}: rejected"),
            ));
        }
        let row = inner
            .sheets
            .iter_mut()
            .find(|s| s.id == sheet_id)
            .ok_or_else(|| not_found("Sheet", sheet_id))?
            .rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or_else(|| not_found("Row", row_id))?;
        match row.cells.iter_mut().find(|c| c.column_id == column_id) {
            Some(cell) => cell.value = Some(Value::String(value.to_string())),
            None => row.cells.push(Cell::new(column_id, value)),
        }
        inner
            .updates
            .push((sheet_id, row_id, column_id, value.to_string()));
        Ok(())
    }

    async fn delete_workspace(&self, workspace_id: Id) -> Result<bool> {
        let mut inner = self.state.lock();
        self.check(&inner)?;
        if inner.failing_deletes.contains(&workspace_id) {
            return Err(Error::message(
                ErrorType::ApiOperation,
                format!("Delete workspace {workspace_id}: Unable to delete (code 500)"),
            ));
        }
        let before = inner.workspaces.len();
        inner.workspaces.retain(|w| w.id != workspace_id);
        if inner.workspaces.len() == before {
            return Err(not_found("Workspace", workspace_id));
        }
        inner.deleted.push(workspace_id);
        Ok(true)
    }
}

/// Hands out `TestSmartsheet`s that share one `TestState`.
#[derive(Debug, Clone, Default)]
pub struct TestFactory {
    state: TestState,
}

impl TestFactory {
    pub fn new(state: TestState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &TestState {
        &self.state
    }
}

impl ClientFactory for TestFactory {
    fn create(&self, access_token: &str) -> Result<Box<dyn Smartsheet>> {
        Ok(Box::new(TestSmartsheet::new(access_token, self.state.clone())))
    }
}

/// What a `ScriptedEndpoint` does when asked for tokens.
#[derive(Debug, Clone)]
pub enum Script {
    Issue(TokenPair),
    Fail(ErrorType),
}

impl Script {
    fn play(&self, what: &str) -> Result<TokenPair> {
        match self {
            Script::Issue(tokens) => Ok(tokens.clone()),
            Script::Fail(error_type) => Err(Error::message(
                *error_type,
                format!("{what} failed (scripted)"),
            )),
        }
    }
}

/// A `TokenEndpoint` that answers from a script and counts its calls.
pub struct ScriptedEndpoint {
    redirect: Url,
    refresh: Script,
    exchange: Script,
    refresh_calls: AtomicU32,
    exchange_calls: AtomicU32,
    exchanged_codes: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    pub fn new(redirect: Url, refresh: Script, exchange: Script) -> Self {
        Self {
            redirect,
            refresh,
            exchange,
            refresh_calls: AtomicU32::new(0),
            exchange_calls: AtomicU32::new(0),
            exchanged_codes: Mutex::new(Vec::new()),
        }
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> u32 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// The codes presented to `exchange_code`, in order.
    pub fn exchanged_codes(&self) -> Vec<String> {
        match self.exchanged_codes.lock() {
            Ok(codes) => codes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedEndpoint {
    fn authorize_url(&self, scopes: &[String], state: &str) -> Url {
        let mut url = self.redirect.clone();
        url.query_pairs_mut()
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);
        url
    }

    fn redirect_uri(&self) -> &Url {
        &self.redirect
    }

    async fn exchange_code(&self, code: AuthorizationCode) -> Result<TokenPair> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        match self.exchanged_codes.lock() {
            Ok(mut codes) => codes.push(code.into_secret()),
            Err(poisoned) => poisoned.into_inner().push(code.into_secret()),
        }
        self.exchange.play("Code exchange")
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh.play("Token refresh")
    }
}

/// An `Authorizer` that returns a fixed code, or `FlowAbandoned` when it has none.
pub struct ScriptedAuthorizer {
    code: Option<String>,
    calls: AtomicU32,
}

impl ScriptedAuthorizer {
    pub fn new(code: Option<&str>) -> Self {
        Self {
            code: code.map(str::to_string),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for ScriptedAuthorizer {
    async fn authorize(
        &self,
        _endpoint: &dyn TokenEndpoint,
        _scopes: &[String],
    ) -> Result<AuthorizationCode> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.code {
            Some(code) => Ok(AuthorizationCode::new(code.clone())),
            None => Err(Error::message(
                ErrorType::FlowAbandoned,
                "No authorization code was provided",
            )),
        }
    }
}

/// A `TokenManager` for test mode: tokens live in memory, already hold a token the seeded
/// repository accepts, and every exchange issues that same token.
pub(crate) fn token_manager(config: &Config) -> Result<TokenManager> {
    let names = config.secret_names().clone();
    let secrets = MemorySecrets::new()
        .with_secret(&names.access_token, TEST_ACCESS_TOKEN)
        .with_secret(&names.refresh_token, TEST_REFRESH_TOKEN);
    let redirect = Url::parse(config.redirect_uri())
        .map_err(|e| Error::new(ErrorType::Configuration, e))?;
    let issued = Script::Issue(TokenPair::new(TEST_ACCESS_TOKEN, TEST_REFRESH_TOKEN));
    Ok(TokenManager::new(
        Arc::new(SecretTokenStore::new(Arc::new(secrets), names)),
        Arc::new(ScriptedEndpoint::new(redirect, issued.clone(), issued)),
        Arc::new(ScriptedAuthorizer::new(Some("test-code"))),
        Arc::new(TestFactory::new(TestState::seeded())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unknown_token() {
        let client = TestSmartsheet::new("nope", TestState::seeded());
        let err = client.current_user().await.unwrap_err();
        assert!(err.is(ErrorType::Authentication));
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        let state = TestState::seeded();
        state.set_unreachable(true);
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        let err = client.list_workspaces().await.unwrap_err();
        assert!(err.is(ErrorType::Network));
    }

    #[tokio::test]
    async fn test_delete_and_update() {
        let state = TestState::seeded();
        let client = TestSmartsheet::new(TEST_ACCESS_TOKEN, state.clone());
        assert!(client.delete_workspace(1).await.unwrap());
        assert_eq!(vec![1], state.deleted());
        assert!(client.delete_workspace(1).await.is_err());

        client
            .update_cell(TEST_INTAKE_SHEET_ID, 501, TEST_COLUMNS.deletion_status, "Deleted")
            .await
            .unwrap();
        let sheet = client.get_sheet(TEST_INTAKE_SHEET_ID).await.unwrap();
        let row = sheet.rows.iter().find(|r| r.id == 501).unwrap();
        assert_eq!(
            Some("Deleted".to_string()),
            row.cell(TEST_COLUMNS.deletion_status).and_then(|c| c.text())
        );
    }

    #[tokio::test]
    async fn test_factory_shares_state() {
        let factory = TestFactory::new(TestState::seeded());
        let a = factory.create(TEST_ACCESS_TOKEN).unwrap();
        let b = factory.create(TEST_ACCESS_TOKEN).unwrap();
        a.delete_workspace(3).await.unwrap();
        let ids: Vec<Id> = b.list_workspaces().await.unwrap().iter().map(|w| w.id).collect();
        assert_eq!(vec![1, 2], ids);
    }
}
