//! CSV encoding of the record set.
//!
//! The canonical file, backups and exports all share one layout: a header row with
//! [`CSV_HEADERS`] followed by one row per task.

use std::collections::HashSet;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};

use crate::error::StoreError;
use crate::models::{parse_timestamp, Task, CSV_HEADERS};
use crate::validation::{parse_priority, parse_status};

pub fn encode_tasks(tasks: &[Task]) -> Result<Vec<u8>, StoreError> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;
    for task in tasks {
        writer.write_record(task.to_record())?;
    }
    writer
        .into_inner()
        .map_err(|err| StoreError::Io(err.into_error()))
}

/// Strict decode used for the canonical file and backups: any malformed row makes the
/// whole file corrupt. `source` only labels the error.
pub fn decode_tasks(bytes: &[u8], source: &Path) -> Result<Vec<Task>, StoreError> {
    let bytes = strip_bom(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| StoreError::corrupt(source, Some(1), err.to_string()))?
        .clone();
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    if found != CSV_HEADERS {
        return Err(StoreError::corrupt(
            source,
            Some(1),
            format!("unexpected header '{}'", found.join(",")),
        ));
    }

    let mut tasks = Vec::new();
    let mut seen = HashSet::new();
    for result in reader.records() {
        let record = result.map_err(|err| {
            let row = err.position().map(|pos| pos.line());
            StoreError::corrupt(source, row, err.to_string())
        })?;
        if is_blank(&record) {
            continue;
        }
        let row = record.position().map(|pos| pos.line());
        let task = decode_row(&record).map_err(|message| StoreError::corrupt(source, row, message))?;
        if !seen.insert(task.id.clone()) {
            return Err(StoreError::corrupt(
                source,
                row,
                format!("duplicate id '{}'", task.id),
            ));
        }
        tasks.push(task);
    }
    Ok(tasks)
}

fn decode_row(record: &StringRecord) -> Result<Task, String> {
    if record.len() != CSV_HEADERS.len() {
        return Err(format!(
            "expected {} columns, found {}",
            CSV_HEADERS.len(),
            record.len()
        ));
    }
    let field = |index: usize| record.get(index).unwrap_or_default().trim();

    let id = field(0);
    if id.is_empty() {
        return Err("missing id".to_string());
    }
    let created_date = parse_timestamp(field(4))
        .ok_or_else(|| format!("invalid created_date '{}'", field(4)))?;
    let optional_date = |index: usize, name: &str| -> Result<_, String> {
        let raw = field(index);
        if raw.is_empty() {
            return Ok(None);
        }
        parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| format!("invalid {name} '{raw}'"))
    };

    Ok(Task {
        id: id.to_string(),
        task: field(1).to_string(),
        priority: parse_priority(field(2))?,
        description: field(3).to_string(),
        created_date,
        assignee: field(5).to_string(),
        opened_date: optional_date(6, "opened_date")?,
        status: parse_status(field(7))?,
        completion_date: optional_date(8, "completion_date")?,
        category: field(9).to_string(),
        tags: field(10).to_string(),
    })
}

pub fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|value| value.trim().is_empty())
}

pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}
