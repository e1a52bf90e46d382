//! Types that represent Smartsheet resources, such as `Workspace` and `Sheet`, as they come back
//! from the REST API, plus the `IntakeRow` view of a row in the intake sheet.
mod intake;

pub use intake::{IntakeColumns, IntakeRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Smartsheet object ids are 64-bit integers.
pub type Id = i64;

/// The user that owns the access token.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permalink: String,
    /// e.g. `OWNER`, `ADMIN`, `EDITOR`, `VIEWER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<String>,
}

impl Workspace {
    pub fn is_owned(&self) -> bool {
        self.access_level.as_deref() == Some("OWNER")
    }
}

/// A reference to the workspace that contains a sheet.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRef {
    pub id: Id,
    #[serde(default)]
    pub name: String,
}

/// A sheet as it appears in the sheet listing, without rows.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permalink: String,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceRef>,
    #[serde(default)]
    pub total_row_count: u64,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Sheet {
    pub fn summary(&self) -> SheetSummary {
        SheetSummary {
            id: self.id,
            name: self.name.clone(),
            permalink: self.permalink.clone(),
        }
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: Id,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub column_type: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: Id,
    #[serde(default)]
    pub row_number: u32,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Row {
    /// The cell in `column_id`, if the row has one.
    pub fn cell(&self, column_id: Id) -> Option<&Cell> {
        self.cells.iter().find(|c| c.column_id == column_id)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub column_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<Hyperlink>,
}

impl Cell {
    pub fn new(column_id: Id, value: impl Into<Value>) -> Self {
        Self {
            column_id,
            value: Some(value.into()),
            display_value: None,
            hyperlink: None,
        }
    }

    pub fn with_hyperlink(mut self, url: impl Into<String>) -> Self {
        self.hyperlink = Some(Hyperlink {
            url: Some(url.into()),
        });
        self
    }

    /// The cell value rendered as text. Strings are returned as-is, numbers and booleans are
    /// formatted, and null or missing values are `None`.
    pub fn text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The hyperlink URL if the cell has one.
    pub fn link(&self) -> Option<&str> {
        self.hyperlink.as_ref().and_then(|h| h.url.as_deref())
    }
}

#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hyperlink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One page of a paged listing.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub page_number: u32,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_sheet() {
        let json = r#"{
            "id": 4583173393803140,
            "name": "Intake",
            "permalink": "https://app.smartsheet.com/sheets/Gx7Q9vR2",
            "workspace": {"id": 7116448184199044, "name": "Projects"},
            "totalRowCount": 1,
            "columns": [{"id": 1, "index": 0, "title": "Folder URL", "type": "TEXT_NUMBER", "primary": true}],
            "rows": [{
                "id": 11,
                "rowNumber": 1,
                "cells": [
                    {"columnId": 1, "value": "Docs", "displayValue": "Docs",
                     "hyperlink": {"url": "https://app.smartsheet.com/sheets/abc"}},
                    {"columnId": 2, "value": 42}
                ]
            }]
        }"#;
        let sheet: Sheet = serde_json::from_str(json).unwrap();
        assert_eq!(Some(7116448184199044), sheet.workspace.as_ref().map(|w| w.id));
        let row = &sheet.rows[0];
        assert_eq!(1, row.row_number);
        let folder = row.cell(1).unwrap();
        assert_eq!(Some("https://app.smartsheet.com/sheets/abc"), folder.link());
        assert_eq!(Some("42".to_string()), row.cell(2).unwrap().text());
        assert!(row.cell(3).is_none());
    }

    #[test]
    fn test_deserialize_page() {
        let json = r#"{"pageNumber": 1, "pageSize": 100, "totalPages": 3, "totalCount": 250,
            "data": [{"id": 1, "name": "A", "permalink": "p1"}]}"#;
        let page: Page<SheetSummary> = serde_json::from_str(json).unwrap();
        assert_eq!(3, page.total_pages);
        assert_eq!(1, page.data.len());
    }

    #[test]
    fn test_workspace_is_owned() {
        let mut ws = Workspace {
            id: 1,
            access_level: Some("OWNER".to_string()),
            ..Default::default()
        };
        assert!(ws.is_owned());
        ws.access_level = Some("VIEWER".to_string());
        assert!(!ws.is_owned());
    }

    #[test]
    fn test_null_cell_has_no_text() {
        let cell: Cell = serde_json::from_str(r#"{"columnId": 5, "value": null}"#).unwrap();
        assert_eq!(None, cell.text());
    }
}
