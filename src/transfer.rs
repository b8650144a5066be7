//! CSV export and the two-step import: a pure parse into an [`ImportBatch`], then a
//! single atomic commit into the store.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};

use crate::codec::{encode_tasks, is_blank};
use crate::error::{StoreError, ValidationErrors};
use crate::models::{new_task_id, parse_timestamp, Task, TaskInput, Timestamp};
use crate::store::TaskStore;
use crate::validation::apply_input;

const EXPORT_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ImportOptions {
    /// Parse and report without writing anything.
    #[serde(alias = "validate", alias = "validate_only")]
    pub dry_run: bool,
    pub replace_existing: bool,
}

/// One rejected import row. `row` counts the header as row 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: u64,
    pub field: Option<String>,
    pub error: String,
}

/// Result of parsing an import file; nothing has been written yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportBatch {
    pub staged: Vec<Task>,
    pub errors: Vec<RowError>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
    pub reassigned: usize,
    pub error_details: Vec<RowError>,
    pub dry_run: bool,
    pub replaced: bool,
    pub backup_path: Option<PathBuf>,
}

pub fn export_csv(tasks: &[Task]) -> Result<Vec<u8>, StoreError> {
    encode_tasks(tasks)
}

pub fn export_file_name(now: Timestamp) -> String {
    format!("tasks_export_{}.csv", now.format(EXPORT_STAMP_FORMAT))
}

/// Parses import content row by row.
///
/// Columns are looked up by header name so any order works and unknown columns are
/// ignored. Only a missing `task` column or an empty file fails the whole import; every
/// other problem is reported against its row.
pub fn parse_import(content: &str, now: Timestamp) -> Result<ImportBatch, StoreError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    if content.trim().is_empty() {
        return Err(ValidationErrors::single("file", "CSV file is empty").into());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());
    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(index, name)| (name.trim().to_string(), index))
        .collect();
    if !columns.contains_key("task") {
        return Err(ValidationErrors::single("task", "Missing required column: task").into());
    }

    let mut batch = ImportBatch::default();
    for (index, result) in reader.records().enumerate() {
        let fallback_row = index as u64 + 2;
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let row = err.position().map(|pos| pos.line()).unwrap_or(fallback_row);
                batch.errors.push(RowError {
                    row,
                    field: None,
                    error: err.to_string(),
                });
                continue;
            }
        };
        if is_blank(&record) {
            batch.skipped += 1;
            continue;
        }
        let row = record.position().map(|pos| pos.line()).unwrap_or(fallback_row);
        match stage_row(&record, &columns, now) {
            Ok(task) => batch.staged.push(task),
            Err(errors) => batch.errors.push(RowError {
                row,
                field: errors.iter().next().map(|error| error.field.clone()),
                error: errors.to_string(),
            }),
        }
    }
    Ok(batch)
}

fn stage_row(
    record: &StringRecord,
    columns: &HashMap<String, usize>,
    now: Timestamp,
) -> Result<Task, ValidationErrors> {
    let value = |name: &str| -> Option<String> {
        columns
            .get(name)
            .and_then(|&index| record.get(index))
            .map(|raw| raw.trim().to_string())
    };

    let id = value("id")
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_task_id);
    let created_date = match value("created_date").filter(|raw| !raw.is_empty()) {
        None => now,
        Some(raw) => parse_timestamp(&raw).ok_or_else(|| {
            ValidationErrors::single(
                "created_date",
                "Created date must be a valid ISO date or date-time",
            )
        })?,
    };

    let input = TaskInput {
        task: Some(value("task").unwrap_or_default()),
        description: value("description"),
        priority: value("priority"),
        status: value("status"),
        assignee: value("assignee"),
        category: value("category"),
        tags: value("tags"),
        opened_date: value("opened_date"),
        completion_date: value("completion_date"),
    };
    let mut task = Task::blank(id, created_date);
    apply_input(&mut task, &input, now)?;
    Ok(task)
}

/// Builds the next record set from a batch and counts ids that had to be replaced.
///
/// When appending, an id already in `existing` or used by an earlier staged row gets a
/// fresh one. When replacing, only duplicates within the batch are renamed.
pub fn resolve_ids(existing: &[Task], staged: Vec<Task>, replace: bool) -> (Vec<Task>, usize) {
    let mut next = if replace { Vec::new() } else { existing.to_vec() };
    let mut seen: HashSet<String> = next.iter().map(|task| task.id.clone()).collect();
    let mut reassigned = 0;
    for mut task in staged {
        if seen.contains(&task.id) {
            let mut fresh = new_task_id();
            while seen.contains(&fresh) {
                fresh = new_task_id();
            }
            log::info!("import id collision id={} reassigned={fresh}", task.id);
            task.id = fresh;
            reassigned += 1;
        }
        seen.insert(task.id.clone());
        next.push(task);
    }
    (next, reassigned)
}

/// Writes a parsed batch into the store in one atomic save.
///
/// A dry run, or an append with nothing staged, leaves the store untouched.
pub fn commit_import(
    store: &TaskStore,
    batch: ImportBatch,
    options: ImportOptions,
    error_preview_limit: usize,
    backup_first: bool,
    now: Timestamp,
) -> Result<ImportReport, StoreError> {
    let ImportBatch {
        staged,
        errors,
        skipped,
    } = batch;
    let imported = staged.len();
    let error_count = errors.len();
    let error_details: Vec<RowError> = errors.into_iter().take(error_preview_limit).collect();

    let write = !options.dry_run && (imported > 0 || options.replace_existing);
    let (reassigned, backup_path) = if write {
        store.transact(now, backup_first, |tasks| {
            Ok(resolve_ids(tasks, staged, options.replace_existing))
        })?
    } else {
        let (_, reassigned) = resolve_ids(&store.tasks(), staged, options.replace_existing);
        (reassigned, None)
    };

    log::info!(
        "import imported={imported} skipped={skipped} errors={error_count} reassigned={reassigned} dry_run={} replace={}",
        options.dry_run,
        options.replace_existing
    );
    Ok(ImportReport {
        imported,
        skipped,
        errors: error_count,
        reassigned,
        error_details,
        dry_run: options.dry_run,
        replaced: write && options.replace_existing,
        backup_path,
    })
}
