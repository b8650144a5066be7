use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// A single rejected field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every rule a candidate record broke, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|error| error.field == field)
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|error| error.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{} is corrupt{}: {message}", .path.display(), row_suffix(.row))]
    Corrupt {
        path: PathBuf,
        row: Option<u64>,
        message: String,
    },
    #[error("invalid backup path: {0}")]
    InvalidBackupPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

fn row_suffix(row: &Option<u64>) -> String {
    row.map(|r| format!(" at row {r}")).unwrap_or_default()
}

/// Coarse classification used by the command layer and the HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidPath,
    Corrupt,
    Io,
}

impl StoreError {
    pub fn corrupt(path: impl Into<PathBuf>, row: Option<u64>, message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            row,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidBackupPath(_) => ErrorKind::InvalidPath,
            StoreError::Corrupt { .. } => ErrorKind::Corrupt,
            StoreError::Io(_) | StoreError::Csv(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_join_messages_in_order() {
        let mut errors = ValidationErrors::new();
        errors.push("task", "Task title is required");
        errors.push("priority", "Priority must be one of: Low, Medium, High, Critical");
        assert_eq!(errors.len(), 2);
        assert!(errors.has_field("priority"));
        assert_eq!(
            errors.to_string(),
            "Task title is required; Priority must be one of: Low, Medium, High, Critical"
        );
        assert!(errors.into_result().is_err());
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn corrupt_error_mentions_row_when_known() {
        let err = StoreError::corrupt("tasks.csv", Some(3), "unknown priority 'Urgent'");
        assert_eq!(err.to_string(), "tasks.csv is corrupt at row 3: unknown priority 'Urgent'");
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        let err = StoreError::corrupt("tasks.csv", None, "bad header");
        assert_eq!(err.to_string(), "tasks.csv is corrupt: bad header");
    }

    #[test]
    fn kinds_cover_every_variant() {
        assert_eq!(
            StoreError::from(ValidationErrors::single("task", "x")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(StoreError::NotFound("a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            StoreError::InvalidBackupPath("../x".into()).kind(),
            ErrorKind::InvalidPath
        );
        assert_eq!(
            StoreError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::Io
        );
    }
}
