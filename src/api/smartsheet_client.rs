//! The live `Smartsheet` implementation over the REST API.

use crate::api::{ClientFactory, Smartsheet};
use crate::error::{Error, ErrorType, IntoResult};
use crate::model::{Column, Id, Page, Sheet, SheetSummary, User, Workspace};
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, trace};

pub(crate) const API_BASE: &str = "https://api.smartsheet.com/2.0";

const TIMEOUT: Duration = Duration::from_secs(15);
const PAGE_SIZE: u32 = 100;

/// Smartsheet error codes that mean the token is not acceptable.
const AUTH_ERROR_CODES: &[i64] = &[1002, 1003, 1004];

pub struct SmartsheetClient {
    http: reqwest::Client,
    base: String,
    access_token: String,
}

impl SmartsheetClient {
    pub(crate) fn with_base(base: impl Into<String>, access_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Unable to build the HTTP client")
            .pub_result(ErrorType::Internal)?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base))
            .bearer_auth(&self.access_token)
    }

    /// Sends the request and returns the JSON body, mapping failures to an `ErrorType`.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let response = request.send().await.map_err(|e| transport(e, what))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| transport(e, what))?;
        trace!("{what}: HTTP {status}: {body}");

        let value: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&body) {
                Ok(v) => v,
                Err(e) if status.is_success() => {
                    return Err(Error::message(
                        ErrorType::ApiOperation,
                        format!("{what}: unreadable response: {e}"),
                    ))
                }
                Err(_) => Value::Null,
            }
        };

        if !status.is_success() {
            return Err(api_error(status.as_u16() as i64, &value, what));
        }
        if let Some(code) = embedded_error_code(&value) {
            return Err(api_error(code, &value, what));
        }
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let value = self.send(self.request(Method::GET, path), what).await?;
        parse(value, what)
    }
}

/// Maps a transport failure. A body that cannot be decoded is the API's fault, anything else
/// means we never got a usable answer.
fn transport(e: reqwest::Error, what: &str) -> Error {
    let error_type = if e.is_decode() {
        ErrorType::ApiOperation
    } else {
        ErrorType::Network
    };
    Error::message(error_type, format!("{what}: {e}"))
}

/// An `errorCode` or `statusCode` embedded in an otherwise successful response.
fn embedded_error_code(value: &Value) -> Option<i64> {
    let object = value.as_object()?;
    let result = object
        .get("result")
        .and_then(|r| r.as_object())
        .unwrap_or(object);
    if !result.contains_key("errorCode") && !result.contains_key("statusCode") {
        return None;
    }
    result
        .get("statusCode")
        .or_else(|| result.get("errorCode"))
        .and_then(|c| c.as_i64())
}

fn api_error(code: i64, body: &Value, what: &str) -> Error {
    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("no message");
    let error_code = body.get("errorCode").and_then(|c| c.as_i64());
    let is_auth = code == StatusCode::UNAUTHORIZED.as_u16() as i64
        || code == StatusCode::FORBIDDEN.as_u16() as i64
        || AUTH_ERROR_CODES.contains(&code)
        || error_code.map(|c| AUTH_ERROR_CODES.contains(&c)).unwrap_or(false);
    let error_type = if is_auth {
        ErrorType::Authentication
    } else {
        ErrorType::ApiOperation
    };
    Error::message(error_type, format!("{what}: {message} (code {code})"))
}

fn parse<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .with_context(|| format!("{what}: unexpected response shape"))
        .pub_result(ErrorType::ApiOperation)
}

fn is_success_message(value: &Value) -> bool {
    value.get("message").and_then(|m| m.as_str()) == Some("SUCCESS")
}

#[async_trait]
impl Smartsheet for SmartsheetClient {
    async fn current_user(&self) -> Result<User> {
        let user: User = self.get("/users/me", "Get current user").await?;
        info!("Authenticated as {}", user.email);
        Ok(user)
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let page: Page<Workspace> = self
            .get("/workspaces?includeAll=true", "List workspaces")
            .await?;
        debug!("Retrieved {} workspaces", page.data.len());
        Ok(page.data)
    }

    async fn list_sheets(&self) -> Result<Vec<SheetSummary>> {
        let mut sheets = Vec::new();
        let mut page_number = 1;
        loop {
            let path = format!("/sheets?page={page_number}&pageSize={PAGE_SIZE}");
            let page: Page<SheetSummary> = self.get(&path, "List sheets").await?;
            let total_pages = page.total_pages.max(1);
            debug!(
                "Retrieved page {page_number}/{total_pages} with {} sheets",
                page.data.len()
            );
            let empty = page.data.is_empty();
            sheets.extend(page.data);
            if page_number >= total_pages || empty {
                break;
            }
            page_number += 1;
        }
        debug!("Total sheets retrieved: {}", sheets.len());
        Ok(sheets)
    }

    async fn get_sheet(&self, sheet_id: Id) -> Result<Sheet> {
        self.get(&format!("/sheets/{sheet_id}"), &format!("Get sheet {sheet_id}"))
            .await
    }

    async fn get_columns(&self, sheet_id: Id) -> Result<Vec<Column>> {
        let page: Page<Column> = self
            .get(
                &format!("/sheets/{sheet_id}/columns?includeAll=true"),
                &format!("Get columns of sheet {sheet_id}"),
            )
            .await?;
        Ok(page.data)
    }

    async fn update_cell(
        &self,
        sheet_id: Id,
        row_id: Id,
        column_id: Id,
        value: &str,
    ) -> Result<()> {
        info!("Updating cell in row {row_id}, column {column_id} to '{value}'");
        let body = json!([{
            "id": row_id,
            "cells": [{ "columnId": column_id, "value": value, "strict": false }]
        }]);
        let request = self
            .request(Method::PUT, &format!("/sheets/{sheet_id}/rows"))
            .json(&body);
        let response = self
            .send(request, &format!("Update row {row_id} of sheet {sheet_id}"))
            .await?;
        if !is_success_message(&response) {
            return Err(Error::message(
                ErrorType::ApiOperation,
                format!("Update row {row_id} of sheet {sheet_id}: unexpected response {response}"),
            ));
        }
        Ok(())
    }

    async fn delete_workspace(&self, workspace_id: Id) -> Result<bool> {
        let response = self
            .send(
                self.request(Method::DELETE, &format!("/workspaces/{workspace_id}")),
                &format!("Delete workspace {workspace_id}"),
            )
            .await?;
        let success = is_success_message(&response);
        if success {
            info!("Workspace {workspace_id} deleted");
        } else {
            debug!("Delete workspace {workspace_id} answered {response}");
        }
        Ok(success)
    }
}

/// Creates `SmartsheetClient`s against the live API (or another base URL).
#[derive(Debug, Clone)]
pub struct HttpFactory {
    base: String,
}

impl Default for HttpFactory {
    fn default() -> Self {
        Self {
            base: API_BASE.to_string(),
        }
    }
}

impl HttpFactory {
    pub fn with_base(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl ClientFactory for HttpFactory {
    fn create(&self, access_token: &str) -> Result<Box<dyn Smartsheet>> {
        Ok(Box::new(SmartsheetClient::with_base(
            self.base.clone(),
            access_token,
        )?))
    }
}
