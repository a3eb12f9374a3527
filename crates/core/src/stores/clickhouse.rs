use crate::config::ClickHouseConfig;
use crate::distance::{check_vector, rank_hits};
use crate::models::{DistanceMetric, VectorHit};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const TABLE: &str = "chunk_embeddings";

/// Vector index on ClickHouse over its HTTP interface. Only embeddings live
/// here, keyed by the relational chunk id.
pub struct ClickHouseIndex {
    endpoint: Url,
    database: String,
    user: String,
    password: String,
    client: Client,
    vector_size: usize,
    metric: DistanceMetric,
}

#[derive(Serialize)]
struct EmbeddingRow<'a> {
    chunk_id: i64,
    embedding: &'a [f32],
}

#[derive(Deserialize)]
struct HitRow {
    chunk_id: i64,
    distance: f64,
}

impl ClickHouseIndex {
    pub fn new(
        config: &ClickHouseConfig,
        vector_size: usize,
        metric: DistanceMetric,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            endpoint: Url::parse(&config.url)?,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            client,
            vector_size,
            metric,
        })
    }

    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.execute(create_table_sql()).await?;
        Ok(())
    }

    async fn execute(&self, sql: String) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[
                ("database", self.database.as_str()),
                ("output_format_json_quote_64bit_integers", "0"),
            ])
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql)
            .send()
            .await
            .map_err(|error| StoreError::from(error).into_unavailable())?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(StoreError::IndexUnavailable(body));
        }
        if !status.is_success() {
            return Err(StoreError::BackendResponse {
                backend: "clickhouse".to_string(),
                details: format!("{status}: {}", body.trim()),
            });
        }

        Ok(body)
    }
}

fn create_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {TABLE} (\
            chunk_id Int64, \
            embedding Array(Float32), \
            updated_at DateTime64(3) DEFAULT now64(3)\
        ) ENGINE = ReplacingMergeTree(updated_at) ORDER BY chunk_id"
    )
}

fn insert_sql(chunk_id: i64, vector: &[f32]) -> Result<String, StoreError> {
    let row = serde_json::to_string(&EmbeddingRow {
        chunk_id,
        embedding: vector,
    })?;
    Ok(format!(
        "INSERT INTO {TABLE} (chunk_id, embedding) FORMAT JSONEachRow\n{row}\n"
    ))
}

fn delete_sql(chunk_ids: &[i64]) -> String {
    let ids = chunk_ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("DELETE FROM {TABLE} WHERE chunk_id IN ({ids})")
}

fn search_sql(metric: DistanceMetric, query_vector: &[f32], top_k: usize) -> String {
    let function = match metric {
        DistanceMetric::L2 => "L2Distance",
        DistanceMetric::Cosine => "cosineDistance",
    };
    let literal = crate::distance::format_vector(query_vector);
    format!(
        "SELECT chunk_id, toFloat64({function}(embedding, CAST({literal} AS Array(Float32)))) AS distance \
         FROM {TABLE} FINAL \
         ORDER BY distance ASC, chunk_id ASC \
         LIMIT {top_k} FORMAT JSONEachRow"
    )
}

fn parse_hits(body: &str) -> Result<Vec<VectorHit>, StoreError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: HitRow = serde_json::from_str(line)?;
            Ok(VectorHit {
                chunk_id: row.chunk_id,
                distance: row.distance,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()
}

#[async_trait]
impl VectorIndex for ClickHouseIndex {
    fn dimensions(&self) -> usize {
        self.vector_size
    }

    async fn upsert_embedding(&self, chunk_id: i64, vector: &[f32]) -> Result<(), StoreError> {
        check_vector(self.vector_size, vector)?;
        self.execute(insert_sql(chunk_id, vector)?).await?;
        debug!(chunk_id, "clickhouse embedding upserted");
        Ok(())
    }

    async fn remove_embeddings(&self, chunk_ids: &[i64]) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        self.execute(delete_sql(chunk_ids)).await?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError> {
        check_vector(self.vector_size, query_vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let body = self
            .execute(search_sql(self.metric, query_vector, top_k))
            .await?;
        Ok(rank_hits(parse_hits(&body)?, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_uses_native_engine() {
        let sql = create_table_sql();
        assert!(sql.contains("ReplacingMergeTree(updated_at)"));
        assert!(!sql.contains("ON DUPLICATE KEY"));
    }

    #[test]
    fn search_sql_orders_by_distance_then_chunk_id() {
        let sql = search_sql(DistanceMetric::L2, &[1.0, 0.0, 0.0], 4);
        assert!(sql.contains("L2Distance(embedding, CAST([1,0,0] AS Array(Float32)))"));
        assert!(sql.contains("ORDER BY distance ASC, chunk_id ASC"));
        assert!(sql.contains("LIMIT 4"));

        let cosine = search_sql(DistanceMetric::Cosine, &[1.0], 1);
        assert!(cosine.contains("cosineDistance"));
    }

    #[test]
    fn insert_sql_emits_json_each_row() {
        let sql = insert_sql(5, &[1.0, 0.5]).unwrap();
        assert!(sql.ends_with("{\"chunk_id\":5,\"embedding\":[1.0,0.5]}\n"));
    }

    #[test]
    fn delete_sql_lists_ids() {
        assert_eq!(
            delete_sql(&[3, 1, 2]),
            "DELETE FROM chunk_embeddings WHERE chunk_id IN (3, 1, 2)"
        );
    }

    #[test]
    fn hits_parse_from_json_each_row() {
        let body = "{\"chunk_id\":7,\"distance\":0.25}\n{\"chunk_id\":2,\"distance\":0}\n";
        let hits = parse_hits(body).unwrap();
        assert_eq!(
            hits,
            vec![
                VectorHit { chunk_id: 7, distance: 0.25 },
                VectorHit { chunk_id: 2, distance: 0.0 },
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_index_unavailable() {
        let config = ClickHouseConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let index = ClickHouseIndex::new(&config, 3, DistanceMetric::L2, Duration::from_secs(2))
            .unwrap();

        let result = index.search(&[1.0, 0.0, 0.0], 1).await;
        assert!(matches!(result, Err(StoreError::IndexUnavailable(_))));
    }

    #[tokio::test]
    async fn wrong_dimension_fails_before_any_request() {
        let config = ClickHouseConfig::default();
        let index = ClickHouseIndex::new(&config, 3, DistanceMetric::L2, Duration::from_secs(1))
            .unwrap();
        let result = index.search(&[1.0], 1).await;
        assert!(matches!(result, Err(StoreError::DimensionMismatch { expected: 3, actual: 1 })));
    }

    #[tokio::test]
    async fn non_finite_vector_fails_before_any_request() {
        let config = ClickHouseConfig::default();
        let index = ClickHouseIndex::new(&config, 3, DistanceMetric::L2, Duration::from_secs(1))
            .unwrap();
        let upsert = index.upsert_embedding(7, &[0.0, f32::NAN, 0.0]).await;
        assert!(matches!(upsert, Err(StoreError::NonFiniteVector { index: 1, .. })));
        let search = index.search(&[f32::INFINITY, 0.0, 0.0], 1).await;
        assert!(matches!(search, Err(StoreError::NonFiniteVector { index: 0, .. })));
    }
}
