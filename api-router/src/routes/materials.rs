use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use common::{
    error::AppError,
    storage::types::{
        ingestion_task::IngestionTask,
        material::{Material, MaterialStatus},
    },
};
use mime_guess::from_path;
use serde::Serialize;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::OwnerId};

#[derive(Debug, TryFromMultipart)]
pub struct MaterialUpload {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
}

#[derive(Debug, Serialize)]
pub struct MaterialView {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub status: String,
    pub chunk_count: u32,
    pub error_message: Option<String>,
}

impl From<Material> for MaterialView {
    fn from(material: Material) -> Self {
        let status = match material.status {
            MaterialStatus::Pending => "pending",
            MaterialStatus::Processing => "processing",
            MaterialStatus::Completed => "completed",
            MaterialStatus::Failed => "failed",
        };

        Self {
            id: material.id,
            file_name: material.file_name,
            content_type: material.content_type,
            status: status.to_string(),
            chunk_count: material.chunk_count,
            error_message: material.error_message,
        }
    }
}

fn sanitize_file_name(file_name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect()
    };

    match file_name.rfind('.') {
        Some(idx) => {
            let (name, ext) = file_name.split_at(idx);
            format!("{}{}", sanitize(name), ext)
        }
        None => sanitize(file_name),
    }
}

/// Accepts a single multipart file, stores its bytes, and enqueues an ingestion task. The
/// response carries the pending Material immediately; ingestion happens out of band.
pub async fn upload_material(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    TypedMultipart(input): TypedMultipart<MaterialUpload>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input
        .file
        .metadata
        .file_name
        .as_deref()
        .map(sanitize_file_name)
        .unwrap_or_else(|| "upload.bin".to_string());

    let content_type = input.file.metadata.content_type.clone().unwrap_or_else(|| {
        from_path(&file_name)
            .first()
            .map_or_else(|| "application/octet-stream".to_string(), |m| m.to_string())
    });

    let bytes = tokio::fs::read(input.file.contents.path())
        .await
        .map_err(AppError::Io)?;

    let storage_path = format!("{owner_id}/{}/{file_name}", Uuid::new_v4());
    state
        .storage
        .put(&storage_path, Bytes::from(bytes))
        .await
        .map_err(|err| AppError::Ingestion(format!("failed to store upload: {err}")))?;

    let material = Material::new(owner_id.clone(), file_name, storage_path, content_type);
    state.db.store_item(material.clone()).await.map_err(AppError::Database)?;
    IngestionTask::enqueue(material.id.clone(), owner_id, &state.db).await?;

    Ok((StatusCode::ACCEPTED, Json(MaterialView::from(material))))
}

pub async fn list_materials(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
) -> Result<impl IntoResponse, ApiError> {
    let materials = Material::list_for_owner(&owner_id, &state.db).await?;
    let views: Vec<MaterialView> = materials.into_iter().map(MaterialView::from).collect();
    Ok(Json(views))
}

pub async fn get_material(
    State(state): State<ApiState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let material = Material::get_for_owner(&id, &owner_id, &state.db).await?;
    Ok(Json(MaterialView::from(material)))
}
