use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    bugs::repo_types::Bug,
    error::AppError,
    extract::ApiJson,
    projects::{
        dto::{CreateProjectRequest, DeleteProjectResponse, UpdateProjectRequest},
        repo_types::Project,
        services,
    },
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/projects/:id/bugs", get(project_bugs))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_projects(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Project>>, AppError> {
    let projects = services::list_projects(state.projects.as_ref()).await?;
    Ok(Json(projects))
}

#[instrument(skip_all, fields(project_id = %id))]
pub async fn get_project(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Project>, AppError> {
    let project = services::get_project(state.projects.as_ref(), &id).await?;
    Ok(Json(project))
}

#[instrument(skip_all, fields(owner = %user.username))]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = services::create_project(state.projects.as_ref(), &user, body).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[instrument(skip_all, fields(project_id = %id))]
pub async fn update_project(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<UpdateProjectRequest>,
) -> Result<Json<Project>, AppError> {
    let project = services::update_project(state.projects.as_ref(), &id, body).await?;
    Ok(Json(project))
}

#[instrument(skip_all, fields(project_id = %id))]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteProjectResponse>, AppError> {
    let deleted_project = services::delete_project(state.projects.as_ref(), &id).await?;
    Ok(Json(DeleteProjectResponse {
        message: "Project deleted successfully",
        deleted_project,
    }))
}

#[instrument(skip_all, fields(project_id = %id))]
pub async fn project_bugs(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Bug>>, AppError> {
    let bugs =
        services::project_bugs(state.projects.as_ref(), state.bugs.as_ref(), &id).await?;
    Ok(Json(bugs))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::app::test_support::{register_user, send, test_app};

    #[tokio::test]
    async fn projects_require_a_token() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/api/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "No token, authorization denied");
    }

    #[tokio::test]
    async fn create_list_and_reject_duplicate_key() {
        let (app, _) = test_app();
        let token = register_user(&app, "sarah", "sarah@example.com").await;

        let (status, project) = send(
            &app,
            "POST",
            "/api/projects",
            Some(json!({ "name": "Web App", "key": "web", "members": ["mike"] })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{project}");
        assert_eq!(project["key"], "WEB");
        assert_eq!(project["owner"], "sarah");
        assert_eq!(project["members"], json!(["sarah", "mike"]));
        assert_eq!(project["bugCount"], 0);

        let (status, body) = send(
            &app,
            "POST",
            "/api/projects",
            Some(json!({ "name": "Other", "key": "WEB" })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");

        let (status, list) = send(&app, "GET", "/api/projects", None, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bugs_link_to_projects_and_survive_deletion() {
        let (app, _) = test_app();
        let token = register_user(&app, "sarah", "sarah@example.com").await;
        let (_, project) = send(
            &app,
            "POST",
            "/api/projects",
            Some(json!({ "name": "Mobile", "key": "MOB" })),
            Some(&token),
        )
        .await;
        let pid = project["id"].as_str().unwrap().to_string();

        let (status, bug) = send(
            &app,
            "POST",
            "/api/bugs",
            Some(json!({ "title": "t", "description": "d", "projectId": pid })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{bug}");
        send(&app, "POST", "/api/bugs", Some(json!({ "title": "u", "description": "d" })), None).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/bugs",
            Some(json!({ "title": "t", "description": "d", "projectId": uuid::Uuid::new_v4() })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0], "Project not found");

        let uri = format!("/api/projects/{pid}");
        let (_, fetched) = send(&app, "GET", &uri, None, Some(&token)).await;
        assert_eq!(fetched["bugCount"], 1);

        let (_, linked) = send(&app, "GET", &format!("{uri}/bugs"), None, Some(&token)).await;
        assert_eq!(linked.as_array().unwrap().len(), 1);
        assert_eq!(linked[0]["id"], bug["id"]);

        let (_, filtered) = send(&app, "GET", &format!("/api/bugs?projectId={pid}"), None, None).await;
        assert_eq!(filtered.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "DELETE", &uri, None, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Project deleted successfully");
        assert_eq!(body["deletedProject"]["key"], "MOB");

        let bug_uri = format!("/api/bugs/{}", bug["id"].as_str().unwrap());
        let (status, orphan) = send(&app, "GET", &bug_uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(orphan["projectId"].is_null());

        let (status, _) = send(&app, "GET", &uri, None, Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_to_taken_key_is_400() {
        let (app, _) = test_app();
        let token = register_user(&app, "sarah", "sarah@example.com").await;
        for (name, key) in [("Web", "WEB"), ("Api", "API")] {
            let (status, _) = send(
                &app,
                "POST",
                "/api/projects",
                Some(json!({ "name": name, "key": key })),
                Some(&token),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (_, list) = send(&app, "GET", "/api/projects", None, Some(&token)).await;
        let api = list
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["key"] == "API")
            .unwrap();
        let uri = format!("/api/projects/{}", api["id"].as_str().unwrap());

        let (status, body) = send(&app, "PUT", &uri, Some(json!({ "key": "web" })), Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"][0], "Project key `WEB` is already in use");

        let (_, unchanged) = send(&app, "GET", &uri, None, Some(&token)).await;
        assert_eq!(unchanged["key"], "API");
    }

    #[tokio::test]
    async fn update_changes_status_and_keeps_owner() {
        let (app, _) = test_app();
        let token = register_user(&app, "sarah", "sarah@example.com").await;
        let (_, project) = send(
            &app,
            "POST",
            "/api/projects",
            Some(json!({ "name": "API", "key": "API" })),
            Some(&token),
        )
        .await;
        let uri = format!("/api/projects/{}", project["id"].as_str().unwrap());

        let (status, updated) = send(
            &app,
            "PUT",
            &uri,
            Some(json!({ "status": "completed", "members": ["lisa"] })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{updated}");
        assert_eq!(updated["status"], "completed");
        assert_eq!(updated["members"], json!(["sarah", "lisa"]));
        assert_eq!(updated["name"], "API");

        let (status, _) = send(&app, "PUT", &uri, Some(json!({ "status": "frozen" })), Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
