use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::error::{ErrorKind, StoreError, ValidationErrors};
use crate::models::{now_local, BackupInfo, Task, TaskInput, Timestamp};
use crate::query::{distinct, query, AggregateField, FilterSpec, SortSpec, TaskStats};
use crate::store::TaskStore;
use crate::transfer::{commit_import, export_csv, export_file_name, parse_import, ImportOptions, ImportReport};

#[derive(Debug, Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Per-field messages when the failure was a validation error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ValidationErrors>,
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

pub trait CommandCtx {
    fn store(&self) -> &TaskStore;
    fn config(&self) -> &Config;
    fn now(&self) -> Timestamp;
}

/// Context used by the running server: the shared store plus the loaded config.
pub struct AppCtx {
    store: TaskStore,
    config: Config,
}

impl AppCtx {
    pub fn new(store: TaskStore, config: Config) -> Self {
        Self { store, config }
    }
}

impl CommandCtx for AppCtx {
    fn store(&self) -> &TaskStore {
        &self.store
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn now(&self) -> Timestamp {
        now_local()
    }
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
        details: None,
        kind: None,
    }
}

fn err<T>(kind: ErrorKind, message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
        details: None,
        kind: Some(kind),
    }
}

fn fail<T>(operation: &str, error: StoreError) -> CommandResult<T> {
    let kind = error.kind();
    match kind {
        ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::InvalidPath => {
            log::warn!("{operation} rejected: {error}");
        }
        ErrorKind::Corrupt | ErrorKind::Io => log::error!("{operation} failed: {error}"),
    }
    let mut result = err(kind, &error.to_string());
    if let StoreError::Validation(errors) = error {
        result.error = Some(errors.to_string());
        result.details = Some(errors);
    }
    result
}

fn respond<T>(operation: &str, outcome: Result<T, StoreError>) -> CommandResult<T> {
    match outcome {
        Ok(data) => ok(data),
        Err(error) => fail(operation, error),
    }
}

pub fn list_tasks_impl(
    ctx: &impl CommandCtx,
    filter: &FilterSpec,
    sort: &SortSpec,
) -> CommandResult<Vec<Task>> {
    ok(query(&ctx.store().tasks(), filter, sort))
}

pub fn get_task_impl(ctx: &impl CommandCtx, task_id: &str) -> CommandResult<Task> {
    respond("get_task", ctx.store().get(task_id))
}

pub fn create_task_impl(ctx: &impl CommandCtx, input: TaskInput) -> CommandResult<Task> {
    respond("create_task", ctx.store().create(&input, ctx.now()))
}

pub fn update_task_impl(
    ctx: &impl CommandCtx,
    task_id: &str,
    input: TaskInput,
) -> CommandResult<Task> {
    respond("update_task", ctx.store().update(task_id, &input, ctx.now()))
}

pub fn delete_task_impl(ctx: &impl CommandCtx, task_id: &str) -> CommandResult<bool> {
    respond(
        "delete_task",
        ctx.store().delete(task_id, ctx.now()).map(|_| true),
    )
}

pub fn stats_impl(ctx: &impl CommandCtx) -> CommandResult<TaskStats> {
    ok(TaskStats::compute(&ctx.store().tasks()))
}

pub fn categories_impl(ctx: &impl CommandCtx) -> CommandResult<Vec<String>> {
    ok(distinct(&ctx.store().tasks(), AggregateField::Category))
}

pub fn tags_impl(ctx: &impl CommandCtx) -> CommandResult<Vec<String>> {
    ok(distinct(&ctx.store().tasks(), AggregateField::Tags))
}

#[derive(Debug, Serialize)]
pub struct ExportFile {
    pub file_name: String,
    pub content: String,
}

pub fn export_tasks_impl(ctx: &impl CommandCtx) -> CommandResult<ExportFile> {
    let outcome = export_csv(&ctx.store().tasks()).and_then(|bytes| {
        String::from_utf8(bytes)
            .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))
    });
    respond(
        "export_tasks",
        outcome.map(|content| ExportFile {
            file_name: export_file_name(ctx.now()),
            content,
        }),
    )
}

pub fn import_tasks_impl(
    ctx: &impl CommandCtx,
    content: &str,
    options: ImportOptions,
) -> CommandResult<ImportReport> {
    let now = ctx.now();
    let config = ctx.config();
    let outcome = parse_import(content, now).and_then(|batch| {
        commit_import(
            ctx.store(),
            batch,
            options,
            config.error_preview_limit,
            config.backup_before_import,
            now,
        )
    });
    respond("import_tasks", outcome)
}

pub fn create_backup_impl(ctx: &impl CommandCtx) -> CommandResult<PathBuf> {
    respond("create_backup", ctx.store().create_backup(ctx.now()))
}

pub fn list_backups_impl(ctx: &impl CommandCtx) -> CommandResult<Vec<BackupInfo>> {
    respond("list_backups", ctx.store().list_backups())
}

pub fn delete_backup_impl(ctx: &impl CommandCtx, backup_path: &str) -> CommandResult<bool> {
    respond("delete_backup", ctx.store().delete_backup(backup_path))
}

pub fn restore_backup_impl(ctx: &impl CommandCtx, backup_path: &str) -> CommandResult<Vec<Task>> {
    respond(
        "restore_backup",
        ctx.store().restore_backup(backup_path, ctx.now()),
    )
}
