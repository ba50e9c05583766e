//! Store boundary for measurement rows.
//!
//! Components never talk to PostgreSQL directly; they hold a
//! [`MeasurementStore`] handle injected at construction. [`PgStore`] is the
//! production implementation, [`MemoryStore`] backs isolated tests. Identity
//! uniqueness lives here: the unique `(timestamp, group)` indexes are what the
//! upsert contract keys on.

use std::collections::BTreeMap;

use aqua_core::{FlowRecord, Location, Parameter, QualityRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

pub const CRATE_NAME: &str = "aqua-store";

pub const QUALITY_TABLE: &str = "water_quality";
pub const FLOW_TABLE: &str = "flow_rate";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connecting to store: {0}")]
    Connect(String),
    #[error("writing {table} ({identity}): {detail}")]
    Write {
        table: &'static str,
        identity: String,
        detail: String,
    },
    #[error("querying {table}: {detail}")]
    Query {
        table: &'static str,
        detail: String,
    },
}

/// Single-row insert/upsert surface shared by the loader, the replay
/// scheduler, and the live simulator.
///
/// `insert_*` are plain inserts and fail on a duplicate identity; `upsert_*`
/// update value fields in place when the identity already exists and never
/// create a second row.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn insert_quality(&self, records: &[QualityRecord]) -> Result<u64, StoreError>;
    async fn insert_flow(&self, records: &[FlowRecord]) -> Result<u64, StoreError>;
    async fn upsert_quality(&self, record: &QualityRecord) -> Result<(), StoreError>;
    async fn upsert_flow(&self, record: &FlowRecord) -> Result<(), StoreError>;
    async fn quality_count(&self, parameter: Parameter) -> Result<u64, StoreError>;
    async fn flow_count(&self, location: Location) -> Result<u64, StoreError>;
    async fn reset(&self) -> Result<(), StoreError>;
}

fn quality_identity(record: &QualityRecord) -> String {
    format!("{} {}", record.timestamp.to_rfc3339(), record.parameter_name)
}

fn flow_identity(record: &FlowRecord) -> String {
    format!("{} {}", record.timestamp.to_rfc3339(), record.location_name)
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

const SCHEMA_DDL: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS water_quality (
        id BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMPTZ NOT NULL,
        parameter_name TEXT NOT NULL CHECK (parameter_name IN (
            'HUMIDITY', 'ETP (TDS)', 'ETP (pH)', 'STP (TDS)',
            'STP (TSS)', 'STP (BOD)', 'STP (pH)', 'STP (COD)')),
        value DOUBLE PRECISION NOT NULL,
        safe_min DOUBLE PRECISION NOT NULL,
        safe_max DOUBLE PRECISION NOT NULL,
        UNIQUE (timestamp, parameter_name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS flow_rate (
        id BIGSERIAL PRIMARY KEY,
        timestamp TIMESTAMPTZ NOT NULL,
        location_name TEXT NOT NULL CHECK (location_name IN (
            'Corporation Water', 'Ground Water Source 1', 'Ground Water Source 2',
            'Industrial Process', 'Tanker Water Supply')),
        totalizer DOUBLE PRECISION NOT NULL,
        UNIQUE (timestamp, location_name)
    )"#,
];

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|err| StoreError::Connect(err.to_string()))?;
        info!("connected to measurement store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Minimal DDL the upsert contract depends on: the two tables, the
    /// enumeration checks, and the unique identity indexes.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for ddl in SCHEMA_DDL {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|err| StoreError::Query {
                    table: "schema",
                    detail: err.to_string(),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl MeasurementStore for PgStore {
    async fn insert_quality(&self, records: &[QualityRecord]) -> Result<u64, StoreError> {
        for record in records {
            sqlx::query(
                "INSERT INTO water_quality (timestamp, parameter_name, value, safe_min, safe_max) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(record.timestamp)
            .bind(record.parameter_name.as_str())
            .bind(record.value)
            .bind(record.safe_min)
            .bind(record.safe_max)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::Write {
                table: QUALITY_TABLE,
                identity: quality_identity(record),
                detail: err.to_string(),
            })?;
        }
        Ok(records.len() as u64)
    }

    async fn insert_flow(&self, records: &[FlowRecord]) -> Result<u64, StoreError> {
        for record in records {
            sqlx::query(
                "INSERT INTO flow_rate (timestamp, location_name, totalizer) VALUES ($1, $2, $3)",
            )
            .bind(record.timestamp)
            .bind(record.location_name.as_str())
            .bind(record.totalizer)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::Write {
                table: FLOW_TABLE,
                identity: flow_identity(record),
                detail: err.to_string(),
            })?;
        }
        Ok(records.len() as u64)
    }

    async fn upsert_quality(&self, record: &QualityRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO water_quality (timestamp, parameter_name, value, safe_min, safe_max) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (timestamp, parameter_name) DO UPDATE SET \
             value = EXCLUDED.value, safe_min = EXCLUDED.safe_min, safe_max = EXCLUDED.safe_max",
        )
        .bind(record.timestamp)
        .bind(record.parameter_name.as_str())
        .bind(record.value)
        .bind(record.safe_min)
        .bind(record.safe_max)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::Write {
            table: QUALITY_TABLE,
            identity: quality_identity(record),
            detail: err.to_string(),
        })?;
        Ok(())
    }

    async fn upsert_flow(&self, record: &FlowRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO flow_rate (timestamp, location_name, totalizer) VALUES ($1, $2, $3) \
             ON CONFLICT (timestamp, location_name) DO UPDATE SET totalizer = EXCLUDED.totalizer",
        )
        .bind(record.timestamp)
        .bind(record.location_name.as_str())
        .bind(record.totalizer)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::Write {
            table: FLOW_TABLE,
            identity: flow_identity(record),
            detail: err.to_string(),
        })?;
        Ok(())
    }

    async fn quality_count(&self, parameter: Parameter) -> Result<u64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM water_quality WHERE parameter_name = $1")
                .bind(parameter.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|err| StoreError::Query {
                    table: QUALITY_TABLE,
                    detail: err.to_string(),
                })?;
        Ok(row.0 as u64)
    }

    async fn flow_count(&self, location: Location) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flow_rate WHERE location_name = $1")
            .bind(location.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| StoreError::Query {
                table: FLOW_TABLE,
                detail: err.to_string(),
            })?;
        Ok(row.0 as u64)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        for (table, sql) in [
            (QUALITY_TABLE, "DELETE FROM water_quality"),
            (FLOW_TABLE, "DELETE FROM flow_rate"),
        ] {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|err| StoreError::Query {
                    table,
                    detail: err.to_string(),
                })?;
        }
        info!("measurement store reset");
        Ok(())
    }
}

/// In-memory store keyed by record identity; the same contract as [`PgStore`]
/// without a database, for isolated tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    quality: Mutex<BTreeMap<(DateTime<Utc>, Parameter), QualityRecord>>,
    flow: Mutex<BTreeMap<(DateTime<Utc>, Location), FlowRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn quality_rows(&self) -> Vec<QualityRecord> {
        self.quality.lock().await.values().cloned().collect()
    }

    pub async fn flow_rows(&self) -> Vec<FlowRecord> {
        self.flow.lock().await.values().cloned().collect()
    }

    /// Drop one stored row for a parameter; returns whether a row existed.
    pub async fn remove_one_quality(&self, parameter: Parameter) -> bool {
        let mut rows = self.quality.lock().await;
        let key = rows
            .keys()
            .find(|(_, p)| *p == parameter)
            .copied();
        match key {
            Some(key) => rows.remove(&key).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn insert_quality(&self, records: &[QualityRecord]) -> Result<u64, StoreError> {
        let mut rows = self.quality.lock().await;
        for record in records {
            if rows.contains_key(&record.identity()) {
                return Err(StoreError::Write {
                    table: QUALITY_TABLE,
                    identity: quality_identity(record),
                    detail: "duplicate identity".to_string(),
                });
            }
            rows.insert(record.identity(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn insert_flow(&self, records: &[FlowRecord]) -> Result<u64, StoreError> {
        let mut rows = self.flow.lock().await;
        for record in records {
            if rows.contains_key(&record.identity()) {
                return Err(StoreError::Write {
                    table: FLOW_TABLE,
                    identity: flow_identity(record),
                    detail: "duplicate identity".to_string(),
                });
            }
            rows.insert(record.identity(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn upsert_quality(&self, record: &QualityRecord) -> Result<(), StoreError> {
        self.quality
            .lock()
            .await
            .insert(record.identity(), record.clone());
        Ok(())
    }

    async fn upsert_flow(&self, record: &FlowRecord) -> Result<(), StoreError> {
        self.flow
            .lock()
            .await
            .insert(record.identity(), record.clone());
        Ok(())
    }

    async fn quality_count(&self, parameter: Parameter) -> Result<u64, StoreError> {
        let rows = self.quality.lock().await;
        Ok(rows.keys().filter(|(_, p)| *p == parameter).count() as u64)
    }

    async fn flow_count(&self, location: Location) -> Result<u64, StoreError> {
        let rows = self.flow.lock().await;
        Ok(rows.keys().filter(|(_, l)| *l == location).count() as u64)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.quality.lock().await.clear();
        self.flow.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, 0, 0).single().unwrap()
    }

    fn quality(hour: u32, value: f64) -> QualityRecord {
        QualityRecord::new(ts(hour), Parameter::Humidity, value).unwrap()
    }

    #[tokio::test]
    async fn upsert_same_identity_keeps_one_row_with_last_value() {
        let store = MemoryStore::new();
        store.upsert_quality(&quality(8, 45.0)).await.unwrap();
        store.upsert_quality(&quality(8, 52.5)).await.unwrap();

        let rows = store.quality_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 52.5);
    }

    #[tokio::test]
    async fn plain_insert_rejects_duplicate_identity() {
        let store = MemoryStore::new();
        store.insert_quality(&[quality(8, 45.0)]).await.unwrap();
        let err = store.insert_quality(&[quality(8, 46.0)]).await.unwrap_err();
        assert!(matches!(err, StoreError::Write { table: "water_quality", .. }));
    }

    #[tokio::test]
    async fn counts_are_per_group() {
        let store = MemoryStore::new();
        store
            .insert_quality(&[quality(8, 45.0), quality(9, 46.0)])
            .await
            .unwrap();
        store
            .insert_quality(&[QualityRecord::new(ts(8), Parameter::StpBod, 2.0).unwrap()])
            .await
            .unwrap();

        assert_eq!(store.quality_count(Parameter::Humidity).await.unwrap(), 2);
        assert_eq!(store.quality_count(Parameter::StpBod).await.unwrap(), 1);
        assert_eq!(store.quality_count(Parameter::EtpTds).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_empties_both_tables() {
        let store = MemoryStore::new();
        store.insert_quality(&[quality(8, 45.0)]).await.unwrap();
        store
            .insert_flow(&[FlowRecord::new(ts(8), Location::CorporationWater, 100.0).unwrap()])
            .await
            .unwrap();

        store.reset().await.unwrap();
        assert!(store.quality_rows().await.is_empty());
        assert!(store.flow_rows().await.is_empty());
    }
}
