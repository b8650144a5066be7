//! HTTP surface over the command layer. Every JSON route answers with the
//! `{ok, data, error}` envelope; the status code comes from the error kind.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::commands::{
    categories_impl, create_backup_impl, create_task_impl, delete_backup_impl, delete_task_impl,
    export_tasks_impl, get_task_impl, import_tasks_impl, list_backups_impl, list_tasks_impl,
    restore_backup_impl, stats_impl, tags_impl, update_task_impl, AppCtx, CommandResult,
};
use crate::error::ErrorKind;
use crate::models::TaskInput;
use crate::query::{FilterSpec, SortSpec};
use crate::transfer::ImportOptions;

type Shared = Arc<AppCtx>;

#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    pub backup_path: String,
}

pub fn router(ctx: Shared) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/stats", get(stats))
        .route("/api/categories", get(categories))
        .route("/api/tags", get(tags))
        .route("/api/export", get(export_tasks))
        .route("/api/import", post(import_tasks))
        .route("/api/backup", post(create_backup))
        .route("/api/backups", get(list_backups))
        .route("/api/backup/delete", post(delete_backup))
        .route("/api/restore", post(restore_backup))
        .with_state(ctx)
}

fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        Some(ErrorKind::Validation) | Some(ErrorKind::InvalidPath) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::Corrupt) | Some(ErrorKind::Io) | None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(result: CommandResult<T>) -> Response {
    reply_with(StatusCode::OK, result)
}

fn reply_with<T: Serialize>(success: StatusCode, result: CommandResult<T>) -> Response {
    let status = if result.ok {
        success
    } else {
        status_for(result.kind)
    };
    (status, Json(result)).into_response()
}

fn bad_request(message: String) -> Response {
    log::warn!("request rejected: {message}");
    let body = CommandResult::<()> {
        ok: false,
        data: None,
        error: Some(message),
        details: None,
        kind: Some(ErrorKind::Validation),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn list_tasks(
    State(ctx): State<Shared>,
    filter: Result<Query<FilterSpec>, QueryRejection>,
    sort: Result<Query<SortSpec>, QueryRejection>,
) -> Response {
    match (filter, sort) {
        (Ok(Query(filter)), Ok(Query(sort))) => reply(list_tasks_impl(ctx.as_ref(), &filter, &sort)),
        (Err(rejection), _) | (_, Err(rejection)) => bad_request(rejection.body_text()),
    }
}

async fn create_task(
    State(ctx): State<Shared>,
    input: Result<Json<TaskInput>, JsonRejection>,
) -> Response {
    match input {
        Ok(Json(input)) => reply_with(StatusCode::CREATED, create_task_impl(ctx.as_ref(), input)),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

async fn get_task(State(ctx): State<Shared>, Path(id): Path<String>) -> Response {
    reply(get_task_impl(ctx.as_ref(), &id))
}

async fn update_task(
    State(ctx): State<Shared>,
    Path(id): Path<String>,
    input: Result<Json<TaskInput>, JsonRejection>,
) -> Response {
    match input {
        Ok(Json(input)) => reply(update_task_impl(ctx.as_ref(), &id, input)),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

async fn delete_task(State(ctx): State<Shared>, Path(id): Path<String>) -> Response {
    reply(delete_task_impl(ctx.as_ref(), &id))
}

async fn stats(State(ctx): State<Shared>) -> Response {
    reply(stats_impl(ctx.as_ref()))
}

async fn categories(State(ctx): State<Shared>) -> Response {
    reply(categories_impl(ctx.as_ref()))
}

async fn tags(State(ctx): State<Shared>) -> Response {
    reply(tags_impl(ctx.as_ref()))
}

async fn export_tasks(State(ctx): State<Shared>) -> Response {
    let result = export_tasks_impl(ctx.as_ref());
    match result.data {
        Some(file) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file.file_name),
                ),
            ],
            file.content,
        )
            .into_response(),
        None => reply(CommandResult::<()> {
            ok: false,
            data: None,
            error: result.error,
            details: result.details,
            kind: result.kind,
        }),
    }
}

async fn import_tasks(
    State(ctx): State<Shared>,
    options: Result<Query<ImportOptions>, QueryRejection>,
    body: String,
) -> Response {
    match options {
        Ok(Query(options)) => reply(import_tasks_impl(ctx.as_ref(), &body, options)),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

async fn create_backup(State(ctx): State<Shared>) -> Response {
    reply_with(StatusCode::CREATED, create_backup_impl(ctx.as_ref()))
}

async fn list_backups(State(ctx): State<Shared>) -> Response {
    reply(list_backups_impl(ctx.as_ref()))
}

async fn delete_backup(
    State(ctx): State<Shared>,
    request: Result<Json<BackupRequest>, JsonRejection>,
) -> Response {
    match request {
        Ok(Json(request)) => reply(delete_backup_impl(ctx.as_ref(), &request.backup_path)),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}

async fn restore_backup(
    State(ctx): State<Shared>,
    request: Result<Json<BackupRequest>, JsonRejection>,
) -> Response {
    match request {
        Ok(Json(request)) => reply(restore_backup_impl(ctx.as_ref(), &request.backup_path)),
        Err(rejection) => bad_request(rejection.body_text()),
    }
}
