//! Postgres 导出视图
//!
//! 视图定义为所有已建表点位的 `union all`，整体用 `create or replace view` 替换；
//! 没有任何点位时定义一个同结构、恒为空的视图。

use crate::error::StorageError;
use crate::models::{ExportRow, ProvisionedPoint, SampleQuery};
use crate::traits::ExportViewStore;
use crate::validation::{ensure_identifier, quote_literal};
use sqlx::{PgPool, Row};
use std::collections::HashSet;

pub struct PgExportViewStore {
    pub pool: PgPool,
    view_name: String,
}

impl PgExportViewStore {
    pub fn new(pool: PgPool, view_name: impl Into<String>) -> Self {
        Self {
            pool,
            view_name: view_name.into(),
        }
    }
}

/// 生成视图定义 SQL。
///
/// 同一张表只出现一次（命名冲突的点位共享一张表时避免重复行）。
pub fn build_export_view_sql(
    view_name: &str,
    sources: &[ProvisionedPoint],
) -> Result<String, StorageError> {
    ensure_identifier(view_name)?;
    let mut seen = HashSet::new();
    let mut clauses = Vec::with_capacity(sources.len());
    for source in sources {
        ensure_identifier(&source.table_name)?;
        if !seen.insert(source.table_name.as_str()) {
            continue;
        }
        clauses.push(format!(
            "select ts, value, quality, {}::text as device_name, {}::text as point_name from {}",
            quote_literal(&source.device_name),
            quote_literal(&source.point_name),
            source.table_name
        ));
    }
    let body = if clauses.is_empty() {
        "select null::timestamptz as ts, null::double precision as value, \
         null::text as quality, null::text as device_name, null::text as point_name \
         where false"
            .to_string()
    } else {
        clauses.join(" union all ")
    };
    Ok(format!("create or replace view {} as {}", view_name, body))
}

#[async_trait::async_trait]
impl ExportViewStore for PgExportViewStore {
    fn view_name(&self) -> &str {
        &self.view_name
    }

    async fn replace_export_view(&self, sources: &[ProvisionedPoint]) -> Result<(), StorageError> {
        let sql = build_export_view_sql(&self.view_name, sources)?;
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn query_export(&self, query: SampleQuery) -> Result<Vec<ExportRow>, StorageError> {
        ensure_identifier(&self.view_name)?;
        if query.limit <= 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "select (extract(epoch from ts) * 1000)::bigint as ts_ms, value, quality, \
             device_name, point_name \
             from {} \
             where ($1::bigint is null or ts >= to_timestamp($1 / 1000.0)) \
             and ($2::bigint is null or ts <= to_timestamp($2 / 1000.0)) \
             order by ts asc, device_name, point_name \
             limit $3",
            self.view_name
        );
        let rows = sqlx::query(&sql)
            .bind(query.from_ms)
            .bind(query.to_ms)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(ExportRow {
                ts_ms: row.try_get("ts_ms")?,
                value: row.try_get("value")?,
                quality: row.try_get("quality")?,
                device_name: row.try_get("device_name")?,
                point_name: row.try_get("point_name")?,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(point_id: i64, device: &str, point: &str, table: &str) -> ProvisionedPoint {
        ProvisionedPoint {
            point_id,
            device_name: device.to_string(),
            point_name: point.to_string(),
            table_name: table.to_string(),
        }
    }

    #[test]
    fn test_view_sql_unions_every_source() {
        let sql = build_export_view_sql(
            "history_export",
            &[
                source(1, "AHU-1", "SAT", "hist_ahu_1_sat"),
                source(2, "AHU-1", "RAT", "hist_ahu_1_rat"),
                source(3, "Meter's", "kW", "hist_meter_s_kw"),
            ],
        )
        .unwrap();
        assert!(sql.starts_with("create or replace view history_export as select"));
        assert_eq!(sql.matches(" union all ").count(), 2);
        assert!(sql.contains("from hist_ahu_1_sat"));
        assert!(sql.contains("from hist_ahu_1_rat"));
        assert!(sql.contains("'Meter''s'::text as device_name"));
    }

    #[test]
    fn test_view_sql_empty_keeps_shape() {
        let sql = build_export_view_sql("history_export", &[]).unwrap();
        assert!(sql.contains("null::timestamptz as ts"));
        assert!(sql.contains("null::text as point_name"));
        assert!(sql.ends_with("where false"));
    }

    #[test]
    fn test_view_sql_rejects_bad_identifiers() {
        assert!(build_export_view_sql("bad view", &[]).is_err());
        assert!(
            build_export_view_sql("history_export", &[source(1, "d", "p", "x; drop table points")])
                .is_err()
        );
    }

    #[test]
    fn test_view_sql_skips_duplicate_tables() {
        let sql = build_export_view_sql(
            "history_export",
            &[
                source(1, "AHU 1", "SAT", "hist_ahu_1_sat"),
                source(2, "AHU-1", "SAT", "hist_ahu_1_sat"),
            ],
        )
        .unwrap();
        assert_eq!(sql.matches("from hist_ahu_1_sat").count(), 1);
    }
}
