//! Filtering, sorting and counting over a snapshot of the record set. Nothing here
//! touches the store.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::models::{Priority, Status, Task};

pub const UNASSIGNED: &str = "__unassigned__";
pub const UNCATEGORIZED: &str = "__uncategorized__";

/// Conjunction of optional clauses. Blank values mean "no clause".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub search: Option<String>,
    #[serde(deserialize_with = "empty_as_none")]
    pub priority: Option<Priority>,
    #[serde(deserialize_with = "empty_as_none")]
    pub status: Option<Status>,
    #[serde(deserialize_with = "empty_as_none")]
    pub assignee: Option<FieldMatch>,
    #[serde(deserialize_with = "empty_as_none")]
    pub category: Option<FieldMatch>,
    pub tag: Option<String>,
}

/// Exact value, or the field being empty (`__unassigned__` / `__uncategorized__`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatch {
    Empty,
    Value(String),
}

impl FromStr for FieldMatch {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            UNASSIGNED | UNCATEGORIZED => FieldMatch::Empty,
            other => FieldMatch::Value(other.to_string()),
        })
    }
}

impl FieldMatch {
    fn matches(&self, value: &str) -> bool {
        match self {
            FieldMatch::Empty => value.is_empty(),
            FieldMatch::Value(expected) => value == expected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Task,
    Description,
    Assignee,
    Category,
    Tags,
    Priority,
    Status,
    CreatedDate,
    OpenedDate,
    CompletionDate,
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "task" => SortColumn::Task,
            "description" => SortColumn::Description,
            "assignee" => SortColumn::Assignee,
            "category" => SortColumn::Category,
            "tags" => SortColumn::Tags,
            "priority" => SortColumn::Priority,
            "status" => SortColumn::Status,
            "created_date" => SortColumn::CreatedDate,
            "opened_date" => SortColumn::OpenedDate,
            "completion_date" => SortColumn::CompletionDate,
            other => return Err(format!("unknown sort column '{other}'")),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SortSpec {
    #[serde(deserialize_with = "empty_as_none")]
    pub sort: Option<SortColumn>,
    pub order: SortDirection,
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Records passing `filter`, ordered by `sort`. Ties keep their input order.
pub fn query(records: &[Task], filter: &FilterSpec, sort: &SortSpec) -> Vec<Task> {
    let mut selected: Vec<Task> = records
        .iter()
        .filter(|task| matches(task, filter))
        .cloned()
        .collect();
    if let Some(column) = sort.sort {
        selected.sort_by(|a, b| {
            let ordering = compare(a, b, column);
            match sort.order {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }
    selected
}

pub fn matches(task: &Task, filter: &FilterSpec) -> bool {
    if let Some(needle) = non_blank(&filter.search) {
        let needle = needle.to_lowercase();
        let haystacks = [
            task.task.as_str(),
            task.description.as_str(),
            task.assignee.as_str(),
            task.priority.as_str(),
            task.status.as_str(),
            task.category.as_str(),
            task.tags.as_str(),
        ];
        if !haystacks
            .iter()
            .any(|value| value.to_lowercase().contains(&needle))
        {
            return false;
        }
    }
    if filter.priority.is_some_and(|priority| priority != task.priority) {
        return false;
    }
    if filter.status.is_some_and(|status| status != task.status) {
        return false;
    }
    if let Some(assignee) = &filter.assignee {
        if !assignee.matches(&task.assignee) {
            return false;
        }
    }
    if let Some(category) = &filter.category {
        if !category.matches(&task.category) {
            return false;
        }
    }
    if let Some(tag) = non_blank(&filter.tag) {
        if !task.tag_list().any(|candidate| candidate == tag) {
            return false;
        }
    }
    true
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn compare(a: &Task, b: &Task, column: SortColumn) -> Ordering {
    let text = |a: &str, b: &str| a.to_lowercase().cmp(&b.to_lowercase());
    let date = |a: Option<NaiveDateTime>, b: Option<NaiveDateTime>| {
        a.unwrap_or(NaiveDateTime::MIN).cmp(&b.unwrap_or(NaiveDateTime::MIN))
    };
    match column {
        SortColumn::Task => text(&a.task, &b.task),
        SortColumn::Description => text(&a.description, &b.description),
        SortColumn::Assignee => text(&a.assignee, &b.assignee),
        SortColumn::Category => text(&a.category, &b.category),
        SortColumn::Tags => text(&a.tags, &b.tags),
        SortColumn::Priority => a.priority.rank().cmp(&b.priority.rank()),
        SortColumn::Status => a.status.rank().cmp(&b.status.rank()),
        SortColumn::CreatedDate => a.created_date.cmp(&b.created_date),
        SortColumn::OpenedDate => date(a.opened_date, b.opened_date),
        SortColumn::CompletionDate => date(a.completion_date, b.completion_date),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateField {
    Status,
    Priority,
    Assignee,
    Category,
    Tags,
}

/// Counts records per value of `field`. Tags count once per token. Empty values are
/// dropped unless `empty_bucket` names a key for them.
pub fn aggregate(
    records: &[Task],
    field: AggregateField,
    empty_bucket: Option<&str>,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    let mut bump = |key: &str| {
        let key = if key.is_empty() {
            match empty_bucket {
                Some(bucket) => bucket,
                None => return,
            }
        } else {
            key
        };
        *counts.entry(key.to_string()).or_insert(0) += 1;
    };
    for task in records {
        match field {
            AggregateField::Status => bump(task.status.as_str()),
            AggregateField::Priority => bump(task.priority.as_str()),
            AggregateField::Assignee => bump(&task.assignee),
            AggregateField::Category => bump(&task.category),
            AggregateField::Tags => {
                let mut any = false;
                for tag in task.tag_list() {
                    any = true;
                    bump(tag);
                }
                if !any {
                    bump("");
                }
            }
        }
    }
    counts
}

/// Sorted unique non-empty values of `field`.
pub fn distinct(records: &[Task], field: AggregateField) -> Vec<String> {
    aggregate(records, field, None).into_keys().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_assignee: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_tags: BTreeMap<String, usize>,
}

impl TaskStats {
    pub fn compute(records: &[Task]) -> Self {
        Self {
            total: records.len(),
            by_status: aggregate(records, AggregateField::Status, None),
            by_priority: aggregate(records, AggregateField::Priority, None),
            by_assignee: aggregate(records, AggregateField::Assignee, Some("Unassigned")),
            by_category: aggregate(records, AggregateField::Category, Some("Uncategorized")),
            by_tags: aggregate(records, AggregateField::Tags, None),
        }
    }
}
