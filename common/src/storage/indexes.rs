use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FTS_ANALYZER_NAME: &str = "app_en_fts_analyzer";

const HNSW_INDEX_NAME: &str = "idx_embedding_chunk";
const HNSW_TABLE: &str = "chunk";
const HNSW_OPTIONS: &str = "DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY";

const FTS_INDEX_NAME: &str = "idx_fts_chunk_text";
const FTS_TABLE: &str = "chunk";
const FTS_FIELD: &str = "text";

fn hnsw_definition_if_not_exists(dimension: usize) -> String {
    format!(
        "DEFINE INDEX IF NOT EXISTS {HNSW_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS embedding HNSW DIMENSION {dimension} {HNSW_OPTIONS};"
    )
}

fn hnsw_definition_overwrite(dimension: usize) -> String {
    format!(
        "DEFINE INDEX OVERWRITE {HNSW_INDEX_NAME} ON TABLE {HNSW_TABLE} \
         FIELDS embedding HNSW DIMENSION {dimension} {HNSW_OPTIONS};"
    )
}

fn fts_definition() -> String {
    format!(
        "DEFINE INDEX IF NOT EXISTS {FTS_INDEX_NAME} ON TABLE {FTS_TABLE} \
         FIELDS {FTS_FIELD} SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25 CONCURRENTLY;"
    )
}

/// Build the runtime Surreal indexes (FTS + HNSW) using concurrent creation with readiness
/// polling. Idempotent: safe to call multiple times, and will overwrite the HNSW definition
/// when the embedding dimension changes.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    ensure_runtime_indexes_inner(db, embedding_dimension)
        .await
        .map_err(|err| AppError::Ingestion(err.to_string()))
}

/// Rebuild the known FTS and HNSW indexes, skipping any that are not yet defined.
pub async fn rebuild_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    rebuild_indexes_inner(db)
        .await
        .map_err(|err| AppError::Ingestion(err.to_string()))
}

async fn ensure_runtime_indexes_inner(db: &SurrealDbClient, embedding_dimension: usize) -> Result<()> {
    create_fts_analyzer(db).await?;

    if !index_exists(db, FTS_TABLE, FTS_INDEX_NAME).await? {
        create_index_with_polling(db, fts_definition(), FTS_INDEX_NAME, FTS_TABLE).await?;
    }

    match existing_hnsw_dimension(db).await? {
        None => {
            create_index_with_polling(
                db,
                hnsw_definition_if_not_exists(embedding_dimension),
                HNSW_INDEX_NAME,
                HNSW_TABLE,
            )
            .await?;
        }
        Some(current) if current == embedding_dimension => {}
        Some(current) => {
            debug!(
                existing_dimension = current,
                target_dimension = embedding_dimension,
                "overwriting HNSW index to match new embedding dimension"
            );
            create_index_with_polling(
                db,
                hnsw_definition_overwrite(embedding_dimension),
                HNSW_INDEX_NAME,
                HNSW_TABLE,
            )
            .await?;
        }
    }

    Ok(())
}

async fn rebuild_indexes_inner(db: &SurrealDbClient) -> Result<()> {
    create_fts_analyzer(db).await?;

    if index_exists(db, FTS_TABLE, FTS_INDEX_NAME).await? {
        create_index_with_polling(db, fts_definition(), FTS_INDEX_NAME, FTS_TABLE).await?;
    }

    if let Some(dimension) = existing_hnsw_dimension(db).await? {
        create_index_with_polling(
            db,
            hnsw_definition_overwrite(dimension),
            HNSW_INDEX_NAME,
            HNSW_TABLE,
        )
        .await?;
    }

    Ok(())
}

async fn existing_hnsw_dimension(db: &SurrealDbClient) -> Result<Option<usize>> {
    let Some(indexes) = table_index_definitions(db, HNSW_TABLE).await? else {
        return Ok(None);
    };

    let Some(definition) = indexes
        .get(HNSW_INDEX_NAME)
        .and_then(|details| details.get("Strand"))
        .and_then(|v| v.as_str())
    else {
        return Ok(None);
    };

    Ok(extract_dimension(definition))
}

fn extract_dimension(definition: &str) -> Option<usize> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<usize>().ok())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let snowball_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);"
    );

    match db.client.query(snowball_query).await {
        Ok(res) if res.check().is_ok() => return Ok(()),
        Ok(_) | Err(_) => {
            warn!("snowball analyzer unavailable, falling back to ascii-only filters");
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
            TOKENIZERS class
            FILTERS lowercase, ascii;"
    );

    db.client
        .query(fallback_query)
        .await
        .context("creating fallback FTS analyzer")?
        .check()
        .context("fallback FTS analyzer definition failed")?;

    Ok(())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let expected_total = count_table_rows(db, table).await.ok();

    let mut attempts = 0;
    const MAX_ATTEMPTS: usize = 3;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .with_context(|| format!("creating index {index_name} on table {table}"))?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(err).with_context(|| {
                    format!("index definition failed for {index_name} on {table}")
                });
            }
        }
    }

    poll_index_build_status(db, index_name, table, expected_total, INDEX_POLL_INTERVAL).await
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
    total_rows: Option<u64>,
    poll_every: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(poll_every).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db
            .client
            .query(info_query)
            .await
            .with_context(|| format!("checking index build status for {index_name} on {table}"))?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(snapshot) = parse_index_build_info(info, total_rows) else {
            break;
        };

        if snapshot.is_ready() || snapshot.status.eq_ignore_ascii_case("error") {
            debug!(index = %index_name, table = %table, status = %snapshot.status, "index build finished");
            break;
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
struct IndexBuildSnapshot {
    status: String,
    initial: u64,
    updated: u64,
}

impl IndexBuildSnapshot {
    fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
    }
}

fn parse_index_build_info(info: Option<Value>, _total_rows: Option<u64>) -> Option<IndexBuildSnapshot> {
    let info = info?;
    let building = info.get("building");

    let status = building
        .and_then(|b| b.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("ready")
        .to_string();
    let initial = building.and_then(|b| b.get("initial")).and_then(Value::as_u64).unwrap_or(0);
    let updated = building.and_then(|b| b.get("updated")).and_then(Value::as_u64).unwrap_or(0);

    Some(IndexBuildSnapshot {
        status,
        initial,
        updated,
    })
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

async fn count_table_rows(db: &SurrealDbClient, table: &str) -> Result<u64> {
    let query = format!("SELECT count() AS count FROM {table} GROUP ALL;");
    let mut response = db
        .client
        .query(query)
        .await
        .with_context(|| format!("counting rows in {table}"))?;
    let rows: Vec<CountRow> = response
        .take(0)
        .context("failed to deserialize count() response")?;
    Ok(rows.first().map_or(0, |r| r.count))
}

async fn table_index_definitions(db: &SurrealDbClient, table: &str) -> Result<Option<Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;

    let info: surrealdb::Value = response.take(0).context("failed to take table info response")?;
    let info_json: Value = serde_json::to_value(info).context("serializing table info to JSON")?;

    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    let Some(indexes) = table_index_definitions(db, table).await? else {
        return Ok(false);
    };
    Ok(indexes.contains_key(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_dimension_parses_value() {
        let definition = "DEFINE INDEX idx_embedding_chunk ON TABLE chunk FIELDS embedding HNSW DIMENSION 1536 DIST COSINE TYPE F32 EFC 100 M 8;";
        assert_eq!(extract_dimension(definition), Some(1536));
    }

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let namespace = "indexes_ns";
        let database = &uuid::Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory db");

        ensure_runtime_indexes(&db, 1536).await.expect("initial index creation");
        ensure_runtime_indexes(&db, 1536).await.expect("second index creation");
    }

    #[tokio::test]
    async fn ensure_hnsw_index_overwrites_dimension() {
        let namespace = "indexes_dim";
        let database = &uuid::Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory db");

        ensure_runtime_indexes(&db, 1536).await.expect("initial index creation");
        ensure_runtime_indexes(&db, 128).await.expect("overwritten index creation");
    }
}
