//! Template store HTTP endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::store::{CreateTemplate, ProcessedTemplate, Template, UpdateTemplate};
use crate::error::{Error, Result};
use crate::notify::model::NotificationType;
use crate::state::AppState;

fn parse_type(raw: &str) -> Result<NotificationType> {
    NotificationType::parse(raw)
        .ok_or_else(|| Error::Validation(format!("Unknown notification type: {}", raw)))
}

/// `POST /api/v1/templates`
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplate>,
) -> Result<(StatusCode, Json<Template>)> {
    let template = state.templates.create(request)?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// `PUT /api/v1/templates/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTemplate>,
) -> Result<Json<Template>> {
    Ok(Json(state.templates.update(id, request)?))
}

/// `DELETE /api/v1/templates/{id}`
pub async fn delete(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.templates.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct FindQuery {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub language: Option<String>,
}

/// `GET /api/v1/templates[?type&language]`
pub async fn find(
    State(state): State<AppState>,
    Query(query): Query<FindQuery>,
) -> Result<Json<Vec<Template>>> {
    match (query.notification_type, query.language) {
        (Some(raw_type), Some(language)) => {
            let notification_type = parse_type(&raw_type)?;
            let template = state
                .templates
                .find(notification_type, &language)
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "No template for type {} and language {}",
                        notification_type, language
                    ))
                })?;
            Ok(Json(vec![template]))
        }
        (Some(raw_type), None) => {
            let notification_type = parse_type(&raw_type)?;
            let mut templates = state.templates.list();
            templates.retain(|t| t.notification_type == notification_type);
            Ok(Json(templates))
        }
        _ => Ok(Json(state.templates.list())),
    }
}

/// `GET /api/v1/templates/languages/{type}`
pub async fn languages(
    State(state): State<AppState>,
    Path(raw_type): Path<String>,
) -> Result<Json<Vec<String>>> {
    let notification_type = parse_type(&raw_type)?;
    Ok(Json(state.templates.list_languages(notification_type)))
}

/// `GET /api/v1/templates/statistics`
pub async fn statistics(State(state): State<AppState>) -> Json<HashMap<String, usize>> {
    Json(state.templates.statistics())
}

#[derive(Debug, Serialize)]
pub struct BulkCreateResponse {
    pub created: Vec<Template>,
    pub errors: Vec<String>,
}

/// `POST /api/v1/templates/bulk`
pub async fn bulk_create(
    State(state): State<AppState>,
    Json(requests): Json<Vec<CreateTemplate>>,
) -> Result<(StatusCode, Json<BulkCreateResponse>)> {
    let (created, errors) = state.templates.bulk_create(requests);
    let status = if created.is_empty() && !errors.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(BulkCreateResponse { created, errors })))
}

/// `POST /api/v1/templates/{type}/{lang}/process`
pub async fn process(
    State(state): State<AppState>,
    Path((raw_type, language)): Path<(String, String)>,
    Json(variables): Json<HashMap<String, String>>,
) -> Result<Json<ProcessedTemplate>> {
    let notification_type = parse_type(&raw_type)?;
    let processed = state
        .templates
        .render(notification_type, Some(&language), &variables)?;
    Ok(Json(processed))
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    pub variables: Vec<String>,
}

/// `GET /api/v1/templates/{type}/{lang}/variables`
pub async fn variables(
    State(state): State<AppState>,
    Path((raw_type, language)): Path<(String, String)>,
) -> Result<Json<VariablesResponse>> {
    let notification_type = parse_type(&raw_type)?;
    let variables = state
        .templates
        .extract_variables(notification_type, &language)?;
    Ok(Json(VariablesResponse {
        variables: variables.into_iter().collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ValidateVariablesResponse {
    pub valid: bool,
    pub missing: Vec<String>,
}

/// `POST /api/v1/templates/{type}/{lang}/validate`
pub async fn validate_variables(
    State(state): State<AppState>,
    Path((raw_type, language)): Path<(String, String)>,
    Json(supplied): Json<HashMap<String, String>>,
) -> Result<Json<ValidateVariablesResponse>> {
    let notification_type = parse_type(&raw_type)?;
    let missing = state
        .templates
        .validate_variables(notification_type, &language, &supplied)?;
    Ok(Json(ValidateVariablesResponse {
        valid: missing.is_empty(),
        missing,
    }))
}
