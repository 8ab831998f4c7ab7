use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chunk, "chunk", {
    material_id: String,
    owner_id: String,
    ordinal: u32,
    char_start: usize,
    char_end: usize,
    page_hint: Option<u32>,
    text: String,
    embedding: Vec<f32>,
    section_heading: Option<String>
});

/// A chunk hydrated with its retrieval score, returned from vector/FTS search.
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        material_id: String,
        owner_id: String,
        ordinal: u32,
        char_start: usize,
        char_end: usize,
        page_hint: Option<u32>,
        text: String,
        embedding: Vec<f32>,
        section_heading: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            material_id,
            owner_id,
            ordinal,
            char_start,
            char_end,
            page_hint,
            text,
            embedding,
            section_heading,
        }
    }

    /// Persists a batch of chunks for a Material in one transaction, preserving insertion
    /// order. Used by the ingestion pipeline's persist stage.
    pub async fn store_batch(chunks: Vec<Chunk>, db: &SurrealDbClient) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut query = db.client.query("BEGIN TRANSACTION;");
        for chunk in &chunks {
            query = query
                .query(format!(
                    "CREATE type::thing('{table}', $id_{id}) CONTENT $content_{id};",
                    table = Self::table_name(),
                    id = chunk.id.replace('-', "_"),
                ))
                .bind((format!("id_{}", chunk.id.replace('-', "_")), chunk.id.clone()))
                .bind((
                    format!("content_{}", chunk.id.replace('-', "_")),
                    chunk.clone(),
                ));
        }
        query = query.query("COMMIT TRANSACTION;");

        let response = query.await.map_err(AppError::Database)?;
        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Atomically replaces every chunk belonging to a Material with `chunks` and marks the
    /// Material completed with the final chunk count, in one transaction. Used by the
    /// ingestion pipeline's persist stage so a crash can never leave chunks persisted with a
    /// stale Material status/chunk_count, or a Material with zero chunks after a re-run wiped
    /// the prior failed attempt's rows.
    pub async fn replace_for_material(
        material_id: &str,
        chunks: Vec<Chunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunk_count = u32::try_from(chunks.len())
            .map_err(|_| AppError::Ingestion("chunk count overflowed u32".to_string()))?;

        let mut query = db.client.query("BEGIN TRANSACTION;");
        query = query
            .query(format!(
                "DELETE FROM {} WHERE material_id = $material_id;",
                Self::table_name()
            ))
            .bind(("material_id", material_id.to_string()));

        for chunk in &chunks {
            let suffix = chunk.id.replace('-', "_");
            query = query
                .query(format!(
                    "CREATE type::thing('{table}', $id_{suffix}) CONTENT $content_{suffix};",
                    table = Self::table_name(),
                ))
                .bind((format!("id_{suffix}"), chunk.id.clone()))
                .bind((format!("content_{suffix}"), chunk.clone()));
        }

        query = query
            .query(format!(
                "UPDATE type::thing('{table}', $material_id) SET \
                     status = 'completed', chunk_count = $chunk_count, error_message = NONE, \
                     updated_at = time::now();",
                table = crate::storage::types::material::Material::table_name(),
            ))
            .bind(("chunk_count", chunk_count));

        query = query.query("COMMIT TRANSACTION;");

        let response = query.await.map_err(AppError::Database)?;
        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Top-k cosine similarity search scoped to an owner, optionally filtered to a set of
    /// Materials. Results are sorted by similarity descending, ties broken by ascending id.
    pub async fn vector_search(
        owner_id: &str,
        query_embedding: &[f32],
        k: usize,
        material_ids: Option<&[String]>,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: Chunk,
            score: f32,
        }

        let material_filter = if material_ids.is_some() {
            "AND material_id IN $material_ids"
        } else {
            ""
        };

        let sql = format!(
            "SELECT *, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {table} \
             WHERE owner_id = $owner_id {material_filter} \
               AND embedding <|{k},100|> $embedding \
             ORDER BY score DESC, id ASC \
             LIMIT {k};",
            table = Self::table_name(),
        );

        let mut request = db
            .client
            .query(sql)
            .bind(("embedding", query_embedding.to_vec()))
            .bind(("owner_id", owner_id.to_string()));
        if let Some(ids) = material_ids {
            request = request.bind(("material_ids", ids.to_vec()));
        }

        let rows: Vec<Row> = request.await.map_err(AppError::Database)?.take(0).map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: r.chunk,
                score: r.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized(3).await.expect("init indexes");
        db
    }

    fn sample_chunk(material_id: &str, owner_id: &str, ordinal: u32, embedding: Vec<f32>) -> Chunk {
        Chunk::new(
            material_id.to_string(),
            owner_id.to_string(),
            ordinal,
            ordinal as usize * 100,
            ordinal as usize * 100 + 80,
            Some(1),
            format!("chunk text {ordinal}"),
            embedding,
            None,
        )
    }

    #[tokio::test]
    async fn store_batch_persists_all_chunks_in_order() {
        let db = seeded_db().await;
        let chunks = vec![
            sample_chunk("mat-1", "owner-1", 0, vec![0.1, 0.2, 0.3]),
            sample_chunk("mat-1", "owner-1", 1, vec![0.2, 0.3, 0.4]),
        ];

        Chunk::store_batch(chunks.clone(), &db).await.expect("store batch");

        let stored: Option<Chunk> = db.get_item(&chunks[0].id).await.expect("get chunk 0");
        assert!(stored.is_some());
        let stored: Option<Chunk> = db.get_item(&chunks[1].id).await.expect("get chunk 1");
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn vector_search_orders_by_similarity() {
        let db = seeded_db().await;
        let close = sample_chunk("mat-1", "owner-1", 0, vec![0.0, 1.0, 0.0]);
        let far = sample_chunk("mat-1", "owner-1", 1, vec![1.0, 0.0, 0.0]);
        Chunk::store_batch(vec![close.clone(), far.clone()], &db).await.expect("store");

        let results = Chunk::vector_search("owner-1", &[0.0, 1.0, 0.0], 2, None, &db)
            .await
            .expect("search");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, close.id);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn vector_search_respects_owner_scoping() {
        let db = seeded_db().await;
        let mine = sample_chunk("mat-1", "owner-1", 0, vec![0.1, 0.2, 0.3]);
        let theirs = sample_chunk("mat-1", "owner-2", 0, vec![0.1, 0.2, 0.3]);
        Chunk::store_batch(vec![mine.clone(), theirs], &db).await.expect("store");

        let results = Chunk::vector_search("owner-1", &[0.1, 0.2, 0.3], 5, None, &db)
            .await
            .expect("search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, mine.id);
    }

    #[tokio::test]
    async fn replace_for_material_persists_chunks_and_completes_material() {
        use crate::storage::types::material::{Material, MaterialStatus};

        let db = seeded_db().await;
        let material = Material::new(
            "owner-1".to_string(),
            "notes.pdf".to_string(),
            "owner-1/x/notes.pdf".to_string(),
            "application/pdf".to_string(),
        );
        db.store_item(material.clone()).await.expect("store material");

        let chunks = vec![
            sample_chunk(&material.id, "owner-1", 0, vec![0.1, 0.2, 0.3]),
            sample_chunk(&material.id, "owner-1", 1, vec![0.2, 0.3, 0.4]),
        ];

        Chunk::replace_for_material(&material.id, chunks.clone(), &db)
            .await
            .expect("replace for material");

        let stored: Option<Chunk> = db.get_item(&chunks[0].id).await.expect("get chunk 0");
        assert!(stored.is_some());

        let updated: Material = db
            .get_item(&material.id)
            .await
            .expect("get material")
            .expect("material exists");
        assert_eq!(updated.status, MaterialStatus::Completed);
        assert_eq!(updated.chunk_count, 2);
        assert!(updated.error_message.is_none());
    }

    #[tokio::test]
    async fn replace_for_material_clears_chunks_left_by_a_prior_failed_run() {
        use crate::storage::types::material::Material;

        let db = seeded_db().await;
        let material = Material::new(
            "owner-1".to_string(),
            "notes.pdf".to_string(),
            "owner-1/x/notes.pdf".to_string(),
            "application/pdf".to_string(),
        );
        db.store_item(material.clone()).await.expect("store material");

        let stale = sample_chunk(&material.id, "owner-1", 0, vec![0.9, 0.9, 0.9]);
        Chunk::store_batch(vec![stale.clone()], &db).await.expect("store stale chunk");

        let fresh = vec![sample_chunk(&material.id, "owner-1", 0, vec![0.1, 0.2, 0.3])];
        Chunk::replace_for_material(&material.id, fresh.clone(), &db)
            .await
            .expect("replace for material");

        assert!(db.get_item::<Chunk>(&stale.id).await.unwrap().is_none());
        assert!(db.get_item::<Chunk>(&fresh[0].id).await.unwrap().is_some());

        let updated: Material = db
            .get_item(&material.id)
            .await
            .expect("get material")
            .expect("material exists");
        assert_eq!(updated.chunk_count, 1);
    }
}
