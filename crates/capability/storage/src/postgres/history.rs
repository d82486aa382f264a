//! Postgres 按点位分表的历史存储
//!
//! 每个点位一张表：`(ts timestamptz primary key, value double precision, quality text)`。
//! 表名只来自 [`prefixed_table_name`]，执行前再经 [`ensure_identifier`] 校验。

use crate::error::StorageError;
use crate::models::SampleQuery;
use crate::naming::prefixed_table_name;
use crate::traits::HistoryStore;
use crate::validation::ensure_identifier;
use domain::Sample;
use sqlx::{PgPool, Row};

pub struct PgHistoryStore {
    pub pool: PgPool,
    prefix: String,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for PgHistoryStore {
    fn table_name(&self, device_name: &str, point_name: &str) -> String {
        prefixed_table_name(&self.prefix, device_name, point_name)
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StorageError> {
        ensure_identifier(table)?;
        let sql = format!(
            "create table if not exists {table} ( \
               ts timestamptz primary key, \
               value double precision not null, \
               quality text not null default 'good' \
             )"
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn append_sample(&self, table: &str, sample: &Sample) -> Result<bool, StorageError> {
        ensure_identifier(table)?;
        let sql = format!(
            "insert into {table} (ts, value, quality) \
             values (to_timestamp($1 / 1000.0), $2, $3) \
             on conflict (ts) do nothing"
        );
        let result = sqlx::query(&sql)
            .bind(sample.ts_ms as f64)
            .bind(sample.value)
            .bind(&sample.quality)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_samples(
        &self,
        table: &str,
        query: SampleQuery,
    ) -> Result<Vec<Sample>, StorageError> {
        ensure_identifier(table)?;
        if query.limit <= 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select (extract(epoch from ts) * 1000)::bigint as ts_ms, value, quality \
             from {table} \
             where ($1::bigint is null or ts >= to_timestamp($1 / 1000.0)) \
             and ($2::bigint is null or ts <= to_timestamp($2 / 1000.0)) \
             order by ts asc \
             limit $3"
        );
        let rows = sqlx::query(&sql)
            .bind(query.from_ms)
            .bind(query.to_ms)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;
        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            samples.push(Sample {
                ts_ms: row.try_get("ts_ms")?,
                value: row.try_get("value")?,
                quality: row.try_get("quality")?,
            });
        }
        Ok(samples)
    }

    async fn prune_before(&self, table: &str, cutoff_ms: i64) -> Result<u64, StorageError> {
        ensure_identifier(table)?;
        let sql = format!("delete from {table} where ts < to_timestamp($1 / 1000.0)");
        let result = sqlx::query(&sql)
            .bind(cutoff_ms as f64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
