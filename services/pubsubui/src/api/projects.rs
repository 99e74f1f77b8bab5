use crate::api::error::{ApiError, api_not_ready};
use crate::api::types::ListProjectsResponse;
use crate::app::AppState;
use crate::readiness::Stage;
use axum::Json;
use axum::extract::State;

pub(crate) async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<ListProjectsResponse>, ApiError> {
    let projects = state
        .readiness
        .projects()
        .ok_or_else(|| api_not_ready(&format!("Waiting for {}", Stage::Projects.reason())))?;
    Ok(Json(ListProjectsResponse {
        projects: projects.as_ref().clone(),
    }))
}
