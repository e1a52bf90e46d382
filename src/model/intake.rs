use crate::model::{Column, Id, Row};
use serde::{Deserialize, Serialize};

/// The column ids of the intake sheet that the deletion workflow reads and writes.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntakeColumns {
    /// Holds the link to the workspace, or to a sheet inside it.
    pub folder_url: Id,
    /// The date on or after which the workspace is deleted.
    pub deletion_date: Id,
    /// The date the engagement manager was told about the deletion.
    pub em_notification_date: Id,
    /// Set to `Deleted` once the workspace is gone.
    pub deletion_status: Id,
}

impl IntakeColumns {
    /// True when every column id has been configured.
    pub fn is_complete(&self) -> bool {
        [
            self.folder_url,
            self.deletion_date,
            self.em_notification_date,
            self.deletion_status,
        ]
        .iter()
        .all(|id| *id != 0)
    }

    /// The configured ids that name no column in `columns`.
    pub fn missing_from(&self, columns: &[Column]) -> Vec<Id> {
        [
            self.folder_url,
            self.deletion_date,
            self.em_notification_date,
            self.deletion_status,
        ]
        .into_iter()
        .filter(|id| !columns.iter().any(|c| c.id == *id))
        .collect()
    }
}

/// The fields of one intake sheet row that matter for deletion.
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntakeRow {
    pub row_id: Id,
    pub row_number: u32,
    pub folder_url: Option<String>,
    pub deletion_date: Option<String>,
    pub em_notification_date: Option<String>,
    pub deletion_status: Option<String>,
}

impl IntakeRow {
    /// Pulls the intake fields out of `row`. The folder URL prefers the cell's hyperlink over its
    /// display text because users usually paste a link behind a friendly name.
    pub fn extract(row: &Row, columns: &IntakeColumns) -> Self {
        let text = |id: Id| row.cell(id).and_then(|c| c.text());
        let folder_url = row
            .cell(columns.folder_url)
            .and_then(|c| c.link().map(str::to_string).or_else(|| c.text()));
        Self {
            row_id: row.id,
            row_number: row.row_number,
            folder_url,
            deletion_date: text(columns.deletion_date),
            em_notification_date: text(columns.em_notification_date),
            deletion_status: text(columns.deletion_status),
        }
    }

    /// Both dates are present.
    pub fn has_dates(&self) -> bool {
        self.deletion_date.is_some() && self.em_notification_date.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;

    fn columns() -> IntakeColumns {
        IntakeColumns {
            folder_url: 1,
            deletion_date: 2,
            em_notification_date: 3,
            deletion_status: 4,
        }
    }

    #[test]
    fn test_extract_prefers_hyperlink() {
        let row = Row {
            id: 99,
            row_number: 3,
            cells: vec![
                Cell::new(1, "Client Docs").with_hyperlink("https://app.smartsheet.com/sheets/abc"),
                Cell::new(2, "2026-01-01"),
                Cell::new(3, "2025-12-20"),
            ],
        };
        let intake = IntakeRow::extract(&row, &columns());
        assert_eq!(99, intake.row_id);
        assert_eq!(3, intake.row_number);
        assert_eq!(
            Some("https://app.smartsheet.com/sheets/abc"),
            intake.folder_url.as_deref()
        );
        assert_eq!(Some("2026-01-01"), intake.deletion_date.as_deref());
        assert!(intake.deletion_status.is_none());
        assert!(intake.has_dates());
    }

    #[test]
    fn test_extract_falls_back_to_value() {
        let row = Row {
            id: 1,
            row_number: 1,
            cells: vec![Cell::new(1, "https://app.smartsheet.com/workspaces/xyz")],
        };
        let intake = IntakeRow::extract(&row, &columns());
        assert_eq!(
            Some("https://app.smartsheet.com/workspaces/xyz"),
            intake.folder_url.as_deref()
        );
        assert!(!intake.has_dates());
    }

    #[test]
    fn test_missing_from() {
        let sheet_columns: Vec<Column> = [1, 2, 4]
            .into_iter()
            .map(|id| Column {
                id,
                index: 0,
                title: String::new(),
                column_type: None,
                primary: false,
            })
            .collect();
        assert_eq!(vec![3], columns().missing_from(&sheet_columns));
        assert_eq!(4, columns().missing_from(&[]).len());
    }

    #[test]
    fn test_columns_complete() {
        assert!(columns().is_complete());
        assert!(!IntakeColumns::default().is_complete());
    }
}
