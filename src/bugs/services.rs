use std::str::FromStr;

use rand::{distributions::Alphanumeric, Rng};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    bugs::{
        dto::{BugQuery, CreateBugRequest, UpdateBugRequest},
        repo::BugRepo,
        repo_types::{Bug, BugFilter, BugStatus, BugType, Environment, Priority, Severity},
    },
    db::RepoError,
    error::AppError,
    projects::repo::ProjectRepo,
};

pub const MAX_TITLE_LEN: usize = 200;
pub const DEFAULT_REPORTER: &str = "Anonymous";
const CREATE_ATTEMPTS: usize = 3;
const UPDATE_ATTEMPTS: usize = 5;
const CONCURRENT_EDIT: &str = "Bug was modified concurrently, please retry";

/// `BUG-<unix millis>-<4 random chars>`.
pub fn generate_bug_number(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("BUG-{millis}-{suffix}")
}

/// Strictly after `previous`, so a guarded write always moves the stamp.
fn next_stamp(previous: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::now_utc().max(previous + time::Duration::microseconds(1))
}

/// Malformed ids can never name a stored record, so callers treat them as absent.
pub fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_enum<T>(raw: Option<String>, errors: &mut Vec<String>) -> Option<T>
where
    T: FromStr<Err = String>,
{
    match non_empty(raw)?.parse() {
        Ok(v) => Some(v),
        Err(msg) => {
            errors.push(msg);
            None
        }
    }
}

pub fn parse_filter(q: BugQuery) -> Result<BugFilter, AppError> {
    let mut errors = Vec::new();
    let filter = BugFilter {
        status: parse_enum::<BugStatus>(q.status, &mut errors),
        priority: parse_enum::<Priority>(q.priority, &mut errors),
        search: non_empty(q.search),
        project_id: match non_empty(q.project_id) {
            None => None,
            Some(raw) => match parse_id(&raw) {
                Some(id) => Some(id),
                None => {
                    errors.push(format!("`{raw}` is not a valid project id"));
                    None
                }
            },
        },
    };
    if errors.is_empty() {
        Ok(filter)
    } else {
        Err(AppError::Validation(errors))
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_due_date(raw: &str) -> Result<OffsetDateTime, String> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| {
            Date::parse(raw, format_description!("[year]-[month]-[day]"))
                .map(|d| d.midnight().assume_utc())
        })
        .map_err(|_| format!("`{raw}` is not a valid due date"))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trimmed, non-empty, first occurrence wins.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in clean_list(tags) {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn clean_environment(env: Environment) -> Environment {
    Environment {
        os: non_empty(env.os),
        browser: non_empty(env.browser),
        device: non_empty(env.device),
        version: non_empty(env.version),
    }
}

/// Copies every field present in `req` onto `bug`. Problems that can be
/// detected while parsing are appended to `errors`.
fn apply_changes(bug: &mut Bug, req: UpdateBugRequest, errors: &mut Vec<String>) {
    if let Some(title) = req.title {
        bug.title = title.trim().to_string();
    }
    if let Some(description) = req.description {
        bug.description = description;
    }
    if let Some(v) = parse_enum(req.status, errors) {
        bug.status = v;
    }
    if let Some(v) = parse_enum(req.priority, errors) {
        bug.priority = v;
    }
    if let Some(v) = parse_enum(req.severity, errors) {
        bug.severity = v;
    }
    if let Some(v) = parse_enum(req.bug_type, errors) {
        bug.bug_type = v;
    }
    if let Some(steps) = req.steps_to_reproduce {
        bug.steps_to_reproduce = clean_list(steps);
    }
    if let Some(v) = req.expected_behavior {
        bug.expected_behavior = non_empty(Some(v));
    }
    if let Some(v) = req.actual_behavior {
        bug.actual_behavior = non_empty(Some(v));
    }
    if let Some(v) = non_empty(req.reporter) {
        bug.reporter = v;
    }
    if let Some(v) = req.assignee {
        bug.assignee = non_empty(Some(v));
    }
    if let Some(raw) = req.due_date {
        match non_empty(Some(raw)) {
            None => bug.due_date = None,
            Some(raw) => match parse_due_date(&raw) {
                Ok(d) => bug.due_date = Some(d),
                Err(msg) => errors.push(msg),
            },
        }
    }
    if let Some(v) = req.estimated_hours {
        bug.estimated_hours = Some(v);
    }
    if let Some(v) = req.actual_hours {
        bug.actual_hours = Some(v);
    }
    if let Some(tags) = req.tags {
        bug.tags = normalize_tags(tags);
    }
    if let Some(env) = req.environment {
        bug.environment = clean_environment(env);
    }
    if let Some(raw) = req.project_id {
        let raw = raw.trim();
        if raw.is_empty() {
            bug.project_id = None;
        } else {
            match parse_id(raw) {
                Some(id) => bug.project_id = Some(id),
                None => errors.push("Project not found".to_string()),
            }
        }
    }
}

/// Schema rules every stored bug satisfies.
pub fn validate(bug: &Bug) -> Vec<String> {
    let mut errors = Vec::new();
    if bug.title.is_empty() {
        errors.push("Title is required".to_string());
    } else if bug.title.chars().count() > MAX_TITLE_LEN {
        errors.push(format!(
            "Title cannot be more than {MAX_TITLE_LEN} characters"
        ));
    }
    if bug.description.trim().is_empty() {
        errors.push("Description is required".to_string());
    }
    if bug.reporter.trim().is_empty() {
        errors.push("Reporter is required".to_string());
    }
    for (label, hours) in [
        ("Estimated hours", bug.estimated_hours),
        ("Actual hours", bug.actual_hours),
    ] {
        if hours.is_some_and(|h| !h.is_finite() || h < 0.0) {
            errors.push(format!("{label} cannot be negative"));
        }
    }
    errors
}

/// Builds a new record from a create request. `default_reporter` is used
/// when the request names none (the authenticated caller, if any).
pub fn new_bug(
    req: CreateBugRequest,
    default_reporter: Option<&str>,
    now: OffsetDateTime,
) -> Result<Bug, AppError> {
    let mut bug = Bug {
        id: Uuid::new_v4(),
        bug_number: generate_bug_number(now),
        title: String::new(),
        description: String::new(),
        status: BugStatus::default(),
        priority: Priority::default(),
        severity: Severity::default(),
        bug_type: BugType::default(),
        steps_to_reproduce: Vec::new(),
        expected_behavior: None,
        actual_behavior: None,
        reporter: default_reporter.unwrap_or(DEFAULT_REPORTER).to_string(),
        assignee: None,
        due_date: None,
        estimated_hours: None,
        actual_hours: None,
        tags: Vec::new(),
        environment: Environment::default(),
        project_id: None,
        created_at: now,
        updated_at: now,
    };

    let mut errors = Vec::new();
    apply_changes(&mut bug, req, &mut errors);
    errors.extend(validate(&bug));
    if errors.is_empty() {
        Ok(bug)
    } else {
        Err(AppError::Validation(errors))
    }
}

/// Merges a partial update and revalidates the whole record.
pub fn merge_update(
    mut bug: Bug,
    req: UpdateBugRequest,
    now: OffsetDateTime,
) -> Result<Bug, AppError> {
    let mut errors = Vec::new();
    apply_changes(&mut bug, req, &mut errors);
    errors.extend(validate(&bug));
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    bug.updated_at = now;
    Ok(bug)
}

async fn ensure_project_exists(
    projects: &dyn ProjectRepo,
    project_id: Option<Uuid>,
    failed: &'static str,
) -> Result<(), AppError> {
    let Some(id) = project_id else {
        return Ok(());
    };
    match projects.find(id).await.map_err(AppError::internal(failed))? {
        Some(_) => Ok(()),
        None => Err(AppError::Validation(vec!["Project not found".to_string()])),
    }
}

pub async fn list_bugs(bugs: &dyn BugRepo, query: BugQuery) -> Result<Vec<Bug>, AppError> {
    let filter = parse_filter(query)?;
    let found = bugs
        .list(&filter)
        .await
        .map_err(AppError::internal("Failed to fetch bugs"))?;
    info!(count = found.len(), "bugs fetched");
    Ok(found)
}

async fn find_bug(bugs: &dyn BugRepo, id: Uuid, failed: &'static str) -> Result<Bug, AppError> {
    bugs.find(id)
        .await
        .map_err(AppError::internal(failed))?
        .ok_or(AppError::NotFound("Bug not found"))
}

pub async fn get_bug(bugs: &dyn BugRepo, raw_id: &str) -> Result<Bug, AppError> {
    let Some(id) = parse_id(raw_id) else {
        return Err(AppError::NotFound("Bug not found"));
    };
    find_bug(bugs, id, "Failed to fetch bug").await
}

pub async fn create_bug(
    bugs: &dyn BugRepo,
    projects: &dyn ProjectRepo,
    req: CreateBugRequest,
    default_reporter: Option<&str>,
) -> Result<Bug, AppError> {
    const FAILED: &str = "Failed to create bug";

    let mut bug = new_bug(req, default_reporter, OffsetDateTime::now_utc())?;
    ensure_project_exists(projects, bug.project_id, FAILED).await?;

    let mut attempt = 1;
    loop {
        match bugs.create(bug.clone()).await {
            Ok(saved) => {
                info!(bug_id = %saved.id, bug_number = %saved.bug_number, "bug created");
                return Ok(saved);
            }
            Err(RepoError::Conflict(field)) if attempt < CREATE_ATTEMPTS => {
                warn!(%field, bug_number = %bug.bug_number, attempt, "bug number collision");
                bug.bug_number = generate_bug_number(OffsetDateTime::now_utc());
                attempt += 1;
            }
            Err(e) => return Err(AppError::internal(FAILED)(e)),
        }
    }
}

/// Merges `req` into the current record and writes it back, guarded by the
/// record's `updated_at`. A concurrent write in between makes the guard miss;
/// the record is then re-read and the same request merged again.
pub async fn update_bug(
    bugs: &dyn BugRepo,
    projects: &dyn ProjectRepo,
    raw_id: &str,
    req: UpdateBugRequest,
) -> Result<Bug, AppError> {
    const FAILED: &str = "Failed to update bug";

    let Some(id) = parse_id(raw_id) else {
        return Err(AppError::NotFound("Bug not found"));
    };

    for attempt in 1..=UPDATE_ATTEMPTS {
        let current = find_bug(bugs, id, FAILED).await?;
        let expected = current.updated_at;
        let previous_project = current.project_id;
        let merged = merge_update(current, req.clone(), next_stamp(expected))?;
        if merged.project_id != previous_project {
            ensure_project_exists(projects, merged.project_id, FAILED).await?;
        }

        match bugs
            .update(&merged, expected)
            .await
            .map_err(AppError::internal(FAILED))?
        {
            Some(saved) => {
                info!(bug_id = %saved.id, status = %saved.status, "bug updated");
                return Ok(saved);
            }
            None => warn!(bug_id = %id, attempt, "bug changed during update, retrying"),
        }
    }
    Err(AppError::Conflict(CONCURRENT_EDIT))
}

/// Moves the bug one step along [`BugStatus::advance`].
pub async fn advance_bug(bugs: &dyn BugRepo, raw_id: &str) -> Result<Bug, AppError> {
    const FAILED: &str = "Failed to update bug";

    let Some(id) = parse_id(raw_id) else {
        return Err(AppError::NotFound("Bug not found"));
    };

    for attempt in 1..=UPDATE_ATTEMPTS {
        let mut bug = find_bug(bugs, id, FAILED).await?;
        let expected = bug.updated_at;
        let from = bug.status;
        bug.status = from.advance();
        bug.updated_at = next_stamp(expected);

        match bugs
            .update(&bug, expected)
            .await
            .map_err(AppError::internal(FAILED))?
        {
            Some(saved) => {
                info!(bug_id = %saved.id, %from, to = %saved.status, "bug status advanced");
                return Ok(saved);
            }
            None => warn!(bug_id = %id, attempt, "bug changed during advance, retrying"),
        }
    }
    Err(AppError::Conflict(CONCURRENT_EDIT))
}

pub async fn delete_bug(bugs: &dyn BugRepo, raw_id: &str) -> Result<Bug, AppError> {
    let Some(id) = parse_id(raw_id) else {
        return Err(AppError::NotFound("Bug not found"));
    };
    let deleted = bugs
        .delete(id)
        .await
        .map_err(AppError::internal("Failed to delete bug"))?
        .ok_or(AppError::NotFound("Bug not found"))?;
    info!(bug_id = %deleted.id, "bug deleted");
    Ok(deleted)
}
