use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MaterialStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

stored_object!(Material, "material", {
    owner_id: String,
    file_name: String,
    storage_path: String,
    content_type: String,
    status: MaterialStatus,
    #[serde(default)]
    chunk_count: u32,
    error_message: Option<String>,
    #[serde(default)]
    archived: bool
});

impl Material {
    pub fn new(
        owner_id: String,
        file_name: String,
        storage_path: String,
        content_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            file_name,
            storage_path,
            content_type,
            status: MaterialStatus::Pending,
            chunk_count: 0,
            error_message: None,
            archived: false,
        }
    }

    /// Idempotent pending→processing transition at the start of an ingestion run.
    pub async fn mark_processing(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", MaterialStatus::Processing))
            .patch(PatchOp::replace("/updated_at", Utc::now()))
            .await?;

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    pub async fn mark_completed(
        id: &str,
        chunk_count: u32,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", MaterialStatus::Completed))
            .patch(PatchOp::replace("/chunk_count", chunk_count))
            .patch(PatchOp::replace("/error_message", Option::<String>::None))
            .patch(PatchOp::replace("/updated_at", Utc::now()))
            .await?;

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    pub async fn mark_failed(
        id: &str,
        error_message: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", MaterialStatus::Failed))
            .patch(PatchOp::replace("/error_message", Some(error_message)))
            .patch(PatchOp::replace("/updated_at", Utc::now()))
            .await?;

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    pub async fn list_for_owner(
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let materials: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE owner_id = $owner_id ORDER BY created_at DESC")
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;

        Ok(materials)
    }

    pub async fn get_for_owner(
        id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let material: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        if material.owner_id != owner_id {
            return Err(AppError::Ownership(format!(
                "material {id} is not owned by this user"
            )));
        }

        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db")
    }

    #[tokio::test]
    async fn new_material_starts_pending_with_zero_chunks() {
        let material = Material::new(
            "owner".to_string(),
            "notes.pdf".to_string(),
            "owner/uuid/notes.pdf".to_string(),
            "application/pdf".to_string(),
        );
        assert_eq!(material.status, MaterialStatus::Pending);
        assert_eq!(material.chunk_count, 0);
        assert!(!material.archived);
    }

    #[tokio::test]
    async fn lifecycle_transitions_persist() {
        let db = seeded_db().await;
        let material = Material::new(
            "owner".to_string(),
            "notes.pdf".to_string(),
            "path".to_string(),
            "application/pdf".to_string(),
        );
        db.store_item(material.clone()).await.expect("store");

        Material::mark_processing(&material.id, &db).await.expect("processing");
        let completed = Material::mark_completed(&material.id, 12, &db).await.expect("completed");
        assert_eq!(completed.status, MaterialStatus::Completed);
        assert_eq!(completed.chunk_count, 12);
    }

    #[tokio::test]
    async fn mark_failed_records_error_message() {
        let db = seeded_db().await;
        let material = Material::new(
            "owner".to_string(),
            "notes.pdf".to_string(),
            "path".to_string(),
            "application/pdf".to_string(),
        );
        db.store_item(material.clone()).await.expect("store");

        let failed = Material::mark_failed(&material.id, "parser exploded".to_string(), &db)
            .await
            .expect("failed");
        assert_eq!(failed.status, MaterialStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("parser exploded"));
    }

    #[tokio::test]
    async fn get_for_owner_rejects_non_owner() {
        let db = seeded_db().await;
        let material = Material::new(
            "owner-1".to_string(),
            "notes.pdf".to_string(),
            "path".to_string(),
            "application/pdf".to_string(),
        );
        db.store_item(material.clone()).await.expect("store");

        let result = Material::get_for_owner(&material.id, "owner-2", &db).await;
        assert!(matches!(result, Err(AppError::Ownership(_))));
    }

    #[tokio::test]
    async fn list_for_owner_orders_newest_first() {
        let db = seeded_db().await;
        let owner = "owner-1";
        let mut first = Material::new(owner.to_string(), "a.pdf".to_string(), "a".to_string(), "application/pdf".to_string());
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let second = Material::new(owner.to_string(), "b.pdf".to_string(), "b".to_string(), "application/pdf".to_string());

        db.store_item(first.clone()).await.expect("store first");
        db.store_item(second.clone()).await.expect("store second");

        let listed = Material::list_for_owner(owner, &db).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
    }
}
