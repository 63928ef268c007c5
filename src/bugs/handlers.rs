use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::MaybeAuthUser,
    bugs::{
        dto::{BugQuery, CreateBugRequest, DeleteBugResponse, UpdateBugRequest},
        repo_types::Bug,
        services,
    },
    error::AppError,
    extract::{ApiJson, ApiQuery},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/bugs", get(list_bugs))
        .route("/bugs/:id", get(get_bug))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/bugs", post(create_bug))
        .route("/bugs/:id", axum::routing::put(update_bug).delete(delete_bug))
        .route("/bugs/:id/advance", post(advance_bug))
}

#[instrument(skip_all, fields(status = ?q.status, priority = ?q.priority, search = ?q.search))]
pub async fn list_bugs(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<BugQuery>,
) -> Result<Json<Vec<Bug>>, AppError> {
    let bugs = services::list_bugs(state.bugs.as_ref(), q).await?;
    Ok(Json(bugs))
}

#[instrument(skip_all, fields(bug_id = %id))]
pub async fn get_bug(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bug>, AppError> {
    let bug = services::get_bug(state.bugs.as_ref(), &id).await?;
    Ok(Json(bug))
}

#[instrument(skip_all, fields(reporter = ?caller.as_ref().map(|u| &u.username)))]
pub async fn create_bug(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    ApiJson(body): ApiJson<CreateBugRequest>,
) -> Result<(StatusCode, Json<Bug>), AppError> {
    let bug = services::create_bug(
        state.bugs.as_ref(),
        state.projects.as_ref(),
        body,
        caller.as_ref().map(|u| u.username.as_str()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(bug)))
}

#[instrument(skip_all, fields(bug_id = %id))]
pub async fn update_bug(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<UpdateBugRequest>,
) -> Result<Json<Bug>, AppError> {
    let bug =
        services::update_bug(state.bugs.as_ref(), state.projects.as_ref(), &id, body).await?;
    Ok(Json(bug))
}

#[instrument(skip_all, fields(bug_id = %id))]
pub async fn advance_bug(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bug>, AppError> {
    let bug = services::advance_bug(state.bugs.as_ref(), &id).await?;
    Ok(Json(bug))
}

#[instrument(skip_all, fields(bug_id = %id))]
pub async fn delete_bug(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteBugResponse>, AppError> {
    let deleted_bug = services::delete_bug(state.bugs.as_ref(), &id).await?;
    Ok(Json(DeleteBugResponse {
        message: "Bug deleted successfully",
        deleted_bug,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::app::test_support::{register_user, send, test_app};

    async fn create(app: &axum::Router, body: Value) -> Value {
        let (status, created) = send(app, "POST", "/api/bugs", Some(body), None).await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        created
    }

    fn titles(list: &Value) -> Vec<&str> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|b| b["title"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn create_assigns_number_and_defaults() {
        let (app, _) = test_app();
        let bug = create(
            &app,
            json!({
                "title": "  Checkout button misaligned  ",
                "description": "Overlaps the footer on small screens",
                "type": "enhancement",
                "stepsToReproduce": ["open cart", "resize to 320px"],
                "environment": { "os": "iOS", "browser": "Safari" },
                "bugNumber": "BUG-HIJACK"
            }),
        )
        .await;
        assert_eq!(bug["title"], "Checkout button misaligned");
        assert_eq!(bug["status"], "open");
        assert_eq!(bug["priority"], "medium");
        assert_eq!(bug["severity"], "minor");
        assert_eq!(bug["type"], "enhancement");
        assert_eq!(bug["reporter"], "Anonymous");
        assert_eq!(bug["environment"], json!({ "os": "iOS", "browser": "Safari" }));
        assert_eq!(bug["stepsToReproduce"][1], "resize to 320px");
        let number = bug["bugNumber"].as_str().unwrap();
        assert!(number.starts_with("BUG-"));
        assert_ne!(number, "BUG-HIJACK");
        assert!(bug["createdAt"].is_string());
    }

    #[tokio::test]
    async fn create_uses_caller_as_reporter() {
        let (app, _) = test_app();
        let token = register_user(&app, "sarah", "sarah@example.com").await;
        let (status, bug) = send(
            &app,
            "POST",
            "/api/bugs",
            Some(json!({ "title": "t", "description": "d" })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(bug["reporter"], "sarah");

        let (status, _) = send(
            &app,
            "POST",
            "/api/bugs",
            Some(json!({ "title": "t", "description": "d" })),
            Some("forged"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn overlong_title_fails_validation() {
        let (app, state) = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/bugs",
            Some(json!({ "title": "a".repeat(201), "description": "d" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"][0], "Title cannot be more than 200 characters");
        assert!(state
            .bugs
            .list(&Default::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_filters_on_status_and_priority() {
        let (app, _) = test_app();
        create(&app, json!({ "title": "A", "description": "d", "priority": "high" })).await;
        create(&app, json!({ "title": "B", "description": "d", "priority": "low" })).await;
        create(
            &app,
            json!({ "title": "C", "description": "d", "priority": "high", "status": "closed" }),
        )
        .await;
        create(&app, json!({ "title": "D", "description": "d", "priority": "high" })).await;

        let (status, list) = send(&app, "GET", "/api/bugs?status=open&priority=high", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles(&list), vec!["D", "A"]);
        for bug in list.as_array().unwrap() {
            assert_eq!(bug["status"], "open");
            assert_eq!(bug["priority"], "high");
        }

        let (status, body) = send(&app, "GET", "/api/bugs?priority=urgent", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
    }

    #[tokio::test]
    async fn search_matches_title_or_description_case_insensitively() {
        let (app, _) = test_app();
        create(&app, json!({ "title": "LOGIN page blank", "description": "white screen" })).await;
        create(&app, json!({ "title": "Crash on start", "description": "after Login succeeds" })).await;
        create(&app, json!({ "title": "Typo", "description": "footer text" })).await;

        let (status, list) = send(&app, "GET", "/api/bugs?search=login", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles(&list), vec!["Crash on start", "LOGIN page blank"]);

        let (_, all) = send(&app, "GET", "/api/bugs?search=&status=", None, None).await;
        assert_eq!(all.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn get_missing_or_malformed_id_is_404() {
        let (app, _) = test_app();
        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/bugs/{}", uuid::Uuid::new_v4()),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Bug not found");

        let (status, _) = send(&app, "GET", "/api/bugs/not-an-id", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_status_round_trips() {
        let (app, _) = test_app();
        let bug = create(&app, json!({ "title": "t", "description": "d", "tags": ["ui"] })).await;
        let uri = format!("/api/bugs/{}", bug["id"].as_str().unwrap());

        let (status, updated) = send(&app, "PUT", &uri, Some(json!({ "status": "in-progress" })), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "in-progress");
        assert_eq!(updated["tags"], json!(["ui"]));
        assert_eq!(updated["bugNumber"], bug["bugNumber"]);

        let (_, fetched) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(fetched["status"], "in-progress");

        let (status, body) = send(&app, "PUT", &uri, Some(json!({ "severity": "fatal" })), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");

        let missing = format!("/api/bugs/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app, "PUT", &missing, Some(json!({ "status": "closed" })), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn advance_cycles_status() {
        let (app, _) = test_app();
        let bug = create(&app, json!({ "title": "t", "description": "d" })).await;
        let uri = format!("/api/bugs/{}/advance", bug["id"].as_str().unwrap());

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (status, b) = send(&app, "POST", &uri, None, None).await;
            assert_eq!(status, StatusCode::OK);
            seen.push(b["status"].as_str().unwrap().to_string());
        }
        assert_eq!(seen, vec!["in-progress", "resolved", "open"]);
    }

    #[tokio::test]
    async fn delete_returns_record_and_missing_is_404() {
        let (app, _) = test_app();
        let bug = create(&app, json!({ "title": "t", "description": "d" })).await;

        let missing = format!("/api/bugs/{}", uuid::Uuid::new_v4());
        let (status, _) = send(&app, "DELETE", &missing, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, list) = send(&app, "GET", "/api/bugs", None, None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let uri = format!("/api/bugs/{}", bug["id"].as_str().unwrap());
        let (status, body) = send(&app, "DELETE", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Bug deleted successfully");
        assert_eq!(body["deletedBug"]["id"], bug["id"]);

        let (status, _) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
