use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::repo_types::User,
    bugs::{repo::BugRepo, repo_types::{Bug, BugFilter}, services::parse_id},
    db::RepoError,
    error::AppError,
    projects::{
        dto::{CreateProjectRequest, UpdateProjectRequest},
        repo::ProjectRepo,
        repo_types::{Project, ProjectStatus},
    },
};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

lazy_static! {
    static ref KEY_RE: Regex = Regex::new(r"^[A-Z][A-Z0-9]{1,9}$").unwrap();
}

/// Keys are stored uppercased; `web` and `WEB` name the same project.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Owner first, then the requested members in order, without duplicates.
fn normalize_members(owner: &str, requested: Vec<String>) -> Vec<String> {
    let mut out = vec![owner.to_string()];
    for m in requested {
        let m = m.trim();
        if !m.is_empty() && !out.iter().any(|x| x == m) {
            out.push(m.to_string());
        }
    }
    out
}

pub fn validate(project: &Project) -> Vec<String> {
    let mut errors = Vec::new();
    if project.name.is_empty() {
        errors.push("Project name is required".to_string());
    } else if project.name.chars().count() > MAX_NAME_LEN {
        errors.push(format!(
            "Project name cannot be more than {MAX_NAME_LEN} characters"
        ));
    }
    if project.key.is_empty() {
        errors.push("Project key is required".to_string());
    } else if !KEY_RE.is_match(&project.key) {
        errors.push(
            "Project key must be 2-10 letters or digits and start with a letter".to_string(),
        );
    }
    if project.description.chars().count() > MAX_DESCRIPTION_LEN {
        errors.push(format!(
            "Description cannot be more than {MAX_DESCRIPTION_LEN} characters"
        ));
    }
    errors
}

fn apply_changes(project: &mut Project, req: UpdateProjectRequest, errors: &mut Vec<String>) {
    if let Some(name) = req.name {
        project.name = name.trim().to_string();
    }
    if let Some(key) = req.key {
        project.key = normalize_key(&key);
    }
    if let Some(description) = req.description {
        project.description = description.trim().to_string();
    }
    if let Some(raw) = req.status.filter(|s| !s.trim().is_empty()) {
        match raw.trim().parse::<ProjectStatus>() {
            Ok(s) => project.status = s,
            Err(msg) => errors.push(msg),
        }
    }
    if let Some(members) = req.members {
        project.members = normalize_members(&project.owner, members);
    }
}

pub fn new_project(
    req: CreateProjectRequest,
    owner: &User,
    now: OffsetDateTime,
) -> Result<Project, AppError> {
    let mut project = Project {
        id: Uuid::new_v4(),
        name: String::new(),
        key: String::new(),
        description: String::new(),
        status: ProjectStatus::default(),
        owner: owner.username.clone(),
        members: vec![owner.username.clone()],
        bug_count: 0,
        created_at: now,
    };
    let mut errors = Vec::new();
    apply_changes(&mut project, req, &mut errors);
    errors.extend(validate(&project));
    if errors.is_empty() {
        Ok(project)
    } else {
        Err(AppError::Validation(errors))
    }
}

fn key_taken(key: &str) -> AppError {
    AppError::Validation(vec![format!("Project key `{key}` is already in use")])
}

async fn find_project(projects: &dyn ProjectRepo, raw_id: &str) -> Result<Project, AppError> {
    let Some(id) = parse_id(raw_id) else {
        return Err(AppError::NotFound("Project not found"));
    };
    projects
        .find(id)
        .await
        .map_err(AppError::internal("Failed to fetch project"))?
        .ok_or(AppError::NotFound("Project not found"))
}

pub async fn list_projects(projects: &dyn ProjectRepo) -> Result<Vec<Project>, AppError> {
    let found = projects
        .list()
        .await
        .map_err(AppError::internal("Failed to fetch projects"))?;
    info!(count = found.len(), "projects fetched");
    Ok(found)
}

pub async fn get_project(projects: &dyn ProjectRepo, raw_id: &str) -> Result<Project, AppError> {
    find_project(projects, raw_id).await
}

pub async fn create_project(
    projects: &dyn ProjectRepo,
    owner: &User,
    req: CreateProjectRequest,
) -> Result<Project, AppError> {
    let project = new_project(req, owner, OffsetDateTime::now_utc())?;
    let key = project.key.clone();
    let saved = projects.create(project).await.map_err(|e| match e {
        RepoError::Conflict(_) => key_taken(&key),
        other => AppError::internal("Failed to create project")(other),
    })?;
    info!(project_id = %saved.id, key = %saved.key, owner = %saved.owner, "project created");
    Ok(saved)
}

pub async fn update_project(
    projects: &dyn ProjectRepo,
    raw_id: &str,
    req: UpdateProjectRequest,
) -> Result<Project, AppError> {
    let mut project = find_project(projects, raw_id).await?;
    let mut errors = Vec::new();
    apply_changes(&mut project, req, &mut errors);
    errors.extend(validate(&project));
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let key = project.key.clone();
    let saved = projects
        .update(&project)
        .await
        .map_err(|e| match e {
            RepoError::Conflict(_) => key_taken(&key),
            other => AppError::internal("Failed to update project")(other),
        })?
        .ok_or(AppError::NotFound("Project not found"))?;
    info!(project_id = %saved.id, status = %saved.status, "project updated");
    Ok(saved)
}

/// Deletes the project. Its bugs survive with `projectId` cleared.
pub async fn delete_project(projects: &dyn ProjectRepo, raw_id: &str) -> Result<Project, AppError> {
    let Some(id) = parse_id(raw_id) else {
        return Err(AppError::NotFound("Project not found"));
    };
    let deleted = projects
        .delete(id)
        .await
        .map_err(AppError::internal("Failed to delete project"))?
        .ok_or(AppError::NotFound("Project not found"))?;
    info!(project_id = %deleted.id, detached_bugs = deleted.bug_count, "project deleted");
    Ok(deleted)
}

pub async fn project_bugs(
    projects: &dyn ProjectRepo,
    bugs: &dyn BugRepo,
    raw_id: &str,
) -> Result<Vec<Bug>, AppError> {
    let project = find_project(projects, raw_id).await?;
    bugs.list(&BugFilter::for_project(project.id))
        .await
        .map_err(AppError::internal("Failed to fetch bugs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::{NewUser, Role};

    fn owner() -> User {
        NewUser {
            username: "sarah".into(),
            email: "sarah@example.com".into(),
            password_hash: "x".into(),
            first_name: "Sarah".into(),
            last_name: "Johnson".into(),
            role: Role::Manager,
        }
        .into_user(OffsetDateTime::now_utc())
    }

    fn request(name: &str, key: &str) -> CreateProjectRequest {
        CreateProjectRequest {
            name: Some(name.into()),
            key: Some(key.into()),
            ..CreateProjectRequest::default()
        }
    }

    fn details(err: AppError) -> Vec<String> {
        match err {
            AppError::Validation(d) => d,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn key_is_uppercased_and_owner_is_a_member() {
        let mut req = request(" Web Frontend ", " web ");
        req.members = Some(vec!["mike".into(), "sarah".into(), "mike".into(), " ".into()]);
        let p = new_project(req, &owner(), OffsetDateTime::now_utc()).unwrap();
        assert_eq!(p.name, "Web Frontend");
        assert_eq!(p.key, "WEB");
        assert_eq!(p.owner, "sarah");
        assert_eq!(p.members, vec!["sarah", "mike"]);
        assert_eq!(p.status, ProjectStatus::Active);
        assert_eq!(p.bug_count, 0);
    }

    #[test]
    fn bad_keys_are_rejected() {
        for key in ["1WEB", "W", "TOOLONGKEY1", "WEB-UI"] {
            let d = details(new_project(request("n", key), &owner(), OffsetDateTime::now_utc()).unwrap_err());
            assert_eq!(d.len(), 1, "{key}: {d:?}");
        }
        assert!(new_project(request("n", "API2"), &owner(), OffsetDateTime::now_utc()).is_ok());
    }

    #[test]
    fn missing_name_and_key_and_bad_status_are_reported() {
        let req = CreateProjectRequest {
            status: Some("frozen".into()),
            ..CreateProjectRequest::default()
        };
        let d = details(new_project(req, &owner(), OffsetDateTime::now_utc()).unwrap_err());
        assert!(d.contains(&"Project name is required".to_string()));
        assert!(d.contains(&"Project key is required".to_string()));
        assert!(d.iter().any(|m| m.contains("frozen")));
    }
}
