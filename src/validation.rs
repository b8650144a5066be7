use crate::error::ValidationErrors;
use crate::models::{parse_timestamp, split_tags, Priority, Status, Task, TaskInput, Timestamp};

pub const MAX_TASK_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_ASSIGNEE_CHARS: usize = 100;
pub const MAX_CATEGORY_CHARS: usize = 50;
pub const MAX_TAGS_CHARS: usize = 200;

/// Applies `input` on top of `target` and checks the result against every field rule.
///
/// `target` is left untouched when any rule fails. A record that ends up `Completed`
/// without a completion date is stamped with `now`.
pub fn apply_input(target: &mut Task, input: &TaskInput, now: Timestamp) -> Result<(), ValidationErrors> {
    let mut next = target.clone();
    let mut errors = ValidationErrors::new();

    if let Some(task) = &input.task {
        next.task = task.trim().to_string();
    }
    if let Some(description) = &input.description {
        next.description = description.trim().to_string();
    }
    if let Some(assignee) = &input.assignee {
        next.assignee = assignee.trim().to_string();
    }
    if let Some(category) = &input.category {
        next.category = category.trim().to_string();
    }
    if let Some(tags) = &input.tags {
        next.tags = tags.trim().to_string();
    }

    if let Some(raw) = &input.priority {
        match parse_priority(raw) {
            Ok(priority) => next.priority = priority,
            Err(message) => errors.push("priority", message),
        }
    }
    if let Some(raw) = &input.status {
        match parse_status(raw) {
            Ok(status) => next.status = status,
            Err(message) => errors.push("status", message),
        }
    }
    if let Some(raw) = &input.opened_date {
        match parse_optional_date(raw) {
            Ok(date) => next.opened_date = date,
            Err(()) => errors.push("opened_date", "Opened date must be a valid ISO date or date-time"),
        }
    }
    if let Some(raw) = &input.completion_date {
        match parse_optional_date(raw) {
            Ok(date) => next.completion_date = date,
            Err(()) => errors.push(
                "completion_date",
                "Completion date must be a valid ISO date or date-time",
            ),
        }
    }

    if next.status == Status::Completed && next.completion_date.is_none() {
        next.completion_date = Some(now);
    }

    check_task(&next, &mut errors);
    errors.into_result()?;
    *target = next;
    Ok(())
}

/// Rules that hold for any stored record regardless of how it was built.
pub fn check_task(task: &Task, errors: &mut ValidationErrors) {
    if task.task.is_empty() {
        errors.push("task", "Task title is required");
    } else if task.task.chars().count() > MAX_TASK_CHARS {
        errors.push("task", format!("Task title must be {MAX_TASK_CHARS} characters or less"));
    }
    if task.description.chars().count() > MAX_DESCRIPTION_CHARS {
        errors.push(
            "description",
            format!("Description must be {MAX_DESCRIPTION_CHARS} characters or less"),
        );
    }
    if task.assignee.chars().count() > MAX_ASSIGNEE_CHARS {
        errors.push(
            "assignee",
            format!("Assignee name must be {MAX_ASSIGNEE_CHARS} characters or less"),
        );
    }
    if task.category.chars().count() > MAX_CATEGORY_CHARS {
        errors.push(
            "category",
            format!("Category must be {MAX_CATEGORY_CHARS} characters or less"),
        );
    }
    check_tags(&task.tags, errors);

    if let (Some(opened), Some(completed)) = (task.opened_date, task.completion_date) {
        if completed < opened {
            errors.push(
                "completion_date",
                "Completion date cannot be earlier than the opened date",
            );
        }
    }
}

fn check_tags(tags: &str, errors: &mut ValidationErrors) {
    if tags.chars().count() > MAX_TAGS_CHARS {
        errors.push("tags", format!("Tags must be {MAX_TAGS_CHARS} characters or less"));
    }
    for tag in split_tags(tags) {
        if !is_valid_tag(tag) {
            errors.push(
                "tags",
                format!(
                    "Tag '{tag}' contains invalid characters. Use only letters, numbers, spaces, hyphens, and underscores"
                ),
            );
        }
    }
}

pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
}

/// Blank means the default; anything else must be an exact label.
pub fn parse_priority(raw: &str) -> Result<Priority, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(Priority::default());
    }
    value.parse::<Priority>().map_err(|_| {
        let labels = Priority::ALL.map(Priority::as_str).join(", ");
        format!("Priority must be one of: {labels}")
    })
}

pub fn parse_status(raw: &str) -> Result<Status, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(Status::default());
    }
    value.parse::<Status>().map_err(|_| {
        let labels = Status::ALL.map(Status::as_str).join(", ");
        format!("Status must be one of: {labels}")
    })
}

fn parse_optional_date(raw: &str) -> Result<Option<Timestamp>, ()> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_timestamp(raw).map(Some).ok_or(())
}
