use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Local wall-clock date-time, stored without an offset.
pub type Timestamp = NaiveDateTime;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Column order of the record file, backups and exports.
pub const CSV_HEADERS: [&str; 11] = [
    "id",
    "task",
    "priority",
    "description",
    "created_date",
    "assignee",
    "opened_date",
    "status",
    "completion_date",
    "category",
    "tags",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Critical => "Critical",
        }
    }

    /// Severity rank, Low lowest.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Critical => 4,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == value)
            .ok_or_else(|| format!("unknown priority '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "On Hold")]
    OnHold,
    Completed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::NotStarted,
        Status::InProgress,
        Status::OnHold,
        Status::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::NotStarted => "Not Started",
            Status::InProgress => "In Progress",
            Status::OnHold => "On Hold",
            Status::Completed => "Completed",
        }
    }

    /// Position in the workflow, Not Started first.
    pub fn rank(self) -> u8 {
        match self {
            Status::NotStarted => 1,
            Status::InProgress => 2,
            Status::OnHold => 3,
            Status::Completed => 4,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| format!("unknown status '{value}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: String,
    pub created_date: Timestamp,
    #[serde(default)]
    pub opened_date: Option<Timestamp>,
    #[serde(default)]
    pub completion_date: Option<Timestamp>,
}

impl Task {
    /// A record holding only the immutable identity; every other field is at its default.
    pub fn blank(id: impl Into<String>, created_date: Timestamp) -> Self {
        Self {
            id: id.into(),
            task: String::new(),
            description: String::new(),
            priority: Priority::default(),
            status: Status::default(),
            assignee: String::new(),
            category: String::new(),
            tags: String::new(),
            created_date,
            opened_date: None,
            completion_date: None,
        }
    }

    pub fn tag_list(&self) -> impl Iterator<Item = &str> {
        split_tags(&self.tags)
    }

    /// Values in `CSV_HEADERS` order.
    pub fn to_record(&self) -> [String; 11] {
        [
            self.id.clone(),
            self.task.clone(),
            self.priority.as_str().to_string(),
            self.description.clone(),
            format_timestamp(&self.created_date),
            self.assignee.clone(),
            self.opened_date.as_ref().map(format_timestamp).unwrap_or_default(),
            self.status.as_str().to_string(),
            self.completion_date
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default(),
            self.category.clone(),
            self.tags.clone(),
        ]
    }
}

pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn split_tags(tags: &str) -> impl Iterator<Item = &str> {
    tags.split(',').map(str::trim).filter(|tag| !tag.is_empty())
}

pub fn now_local() -> Timestamp {
    Local::now().naive_local()
}

pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts ISO date-times (with `T` or a space, optional fraction, optional `Z`/offset)
/// and bare `YYYY-MM-DD` dates. Offsets are converted to local time.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for format in [TIMESTAMP_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }
    if let Some(naive) = value.strip_suffix('Z') {
        if let Ok(ts) = NaiveDateTime::parse_from_str(naive, TIMESTAMP_FORMAT) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// Field values supplied by a caller for create, update or import.
///
/// `None` keeps the current value (or the default on create); `Some("")` clears an
/// optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct TaskInput {
    pub task: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    pub opened_date: Option<String>,
    pub completion_date: Option<String>,
}

impl TaskInput {
    pub fn titled(task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BackupInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub created_at: Option<Timestamp>,
    /// `None` when the backup cannot be parsed.
    pub record_count: Option<usize>,
    pub size: u64,
}
