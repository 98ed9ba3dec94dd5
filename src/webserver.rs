use crate::controller;
use crate::error::ImageTagError;
use crate::record::ImageRecord;
use crate::rollout::{self, UpdateTarget};
use crate::state::AppContext;
use crate::store::ImageRecordStore;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub async fn readiness_probe(State(ctx): State<AppContext>) -> impl IntoResponse {
    if ctx.store.read().status().refreshed_at.is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

impl ImageTagError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownResource(_) | Self::UnknownImage { .. } => StatusCode::NOT_FOUND,
            Self::EmptyTag { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ApplicationFetch { .. }
            | Self::ManifestFetch { .. }
            | Self::PatchSubmission { .. } => StatusCode::BAD_GATEWAY,
            Self::HistorySnapshotParse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ImageTagError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A record as the panel shows it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordView {
    #[serde(flatten)]
    record: ImageRecord,
    updating: bool,
    tag_options: Vec<String>,
}

impl RecordView {
    fn new(store: &ImageRecordStore, record: &ImageRecord) -> Self {
        Self {
            updating: store.is_updating(&record.resource),
            tag_options: record.tag_options(),
            record: record.clone(),
        }
    }

    fn find(store: &ImageRecordStore, key: &str) -> Result<Self, ImageTagError> {
        store
            .get(key)
            .map(|record| Self::new(store, record))
            .ok_or_else(|| ImageTagError::UnknownResource(key.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectionRequest {
    image_url: String,
}

#[derive(Debug, Deserialize)]
struct TagRequest {
    tag: String,
}

fn resource_key(kind: &str, name: &str) -> String {
    format!("{}/{}", kind, name)
}

async fn list_records(
    State(ctx): State<AppContext>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<RecordView>> {
    let store = ctx.store.read();
    Json(
        store
            .search(&query.search)
            .map(|record| RecordView::new(&store, record))
            .collect(),
    )
}

async fn get_record(
    State(ctx): State<AppContext>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<RecordView>, ImageTagError> {
    RecordView::find(&ctx.store.read(), &resource_key(&kind, &name)).map(Json)
}

async fn select_image(
    State(ctx): State<AppContext>,
    Path((kind, name)): Path<(String, String)>,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<RecordView>, ImageTagError> {
    let key = resource_key(&kind, &name);
    let mut store = ctx.store.write();
    store.select_image(&key, &request.image_url)?;
    RecordView::find(&store, &key).map(Json)
}

async fn set_tag(
    State(ctx): State<AppContext>,
    Path((kind, name)): Path<(String, String)>,
    Json(request): Json<TagRequest>,
) -> Result<Json<RecordView>, ImageTagError> {
    let key = resource_key(&kind, &name);
    let mut store = ctx.store.write();
    store.set_new_tag(&key, &request.tag)?;
    RecordView::find(&store, &key).map(Json)
}

async fn confirm_update(
    State(ctx): State<AppContext>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ImageTagError> {
    let key = resource_key(&kind, &name);
    let store = ctx.store.read();
    let record = store
        .get(&key)
        .ok_or_else(|| ImageTagError::UnknownResource(key.clone()))?;
    let target = UpdateTarget::from_record(record)?;
    Ok(Json(json!({ "message": target.to_string(), "target": target })))
}

async fn update(
    State(ctx): State<AppContext>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<RecordView>, ImageTagError> {
    let key = resource_key(&kind, &name);
    rollout::update_image_tag(ctx.api.as_ref(), &ctx.application, &ctx.store, &key).await?;
    RecordView::find(&ctx.store.read(), &key).map(Json)
}

async fn refresh(State(ctx): State<AppContext>) -> Result<impl IntoResponse, ImageTagError> {
    let report = controller::refresh(ctx.api.as_ref(), &ctx.application, &ctx.store).await?;
    Ok(Json(report))
}

async fn status(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.store.read().status().clone())
}

pub fn create_app(ctx: AppContext) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/api/records", get(list_records))
        .route("/api/records/{kind}/{name}", get(get_record))
        .route("/api/records/{kind}/{name}/selection", put(select_image))
        .route("/api/records/{kind}/{name}/tag", put(set_tag))
        .route(
            "/api/records/{kind}/{name}/update",
            get(confirm_update).post(update),
        )
        .route("/api/refresh", post(refresh))
        .route("/api/status", get(status))
        .with_state(ctx)
}
