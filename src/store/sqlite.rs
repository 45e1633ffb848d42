// =============================================================================
// SQLite store — sqlx-backed adapter with WAL journaling
// =============================================================================
//
// Owns its two tables and creates them on connect:
//
//   candles  (symbol, timeframe, open_time)  primary key, plain insert —
//            a duplicate key maps to StoreError::Duplicate
//   signals  autoincrement row id, unique client uid, levels, confidences,
//            analyzer verdicts as a JSON column
//
// Startup connectivity failures bubble up as anyhow errors so the process
// can exit; everything after that speaks StoreError.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::market_data::Candle;
use crate::store::{SignalStore, StoreError};
use crate::types::{AnalyzerKind, AnalyzerResult, Direction, FusionTier, Signal};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and initialise the schema. Any failure here is fatal to the
    /// caller.
    pub async fn connect(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .context("invalid database url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Every pooled connection to `:memory:` opens a distinct database;
        // in-memory stores must stay on a single connection.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite database")?;

        info!(url = %database_url, "store connected");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol          TEXT    NOT NULL,
                timeframe       TEXT    NOT NULL,
                open_time       INTEGER NOT NULL,
                close_time      INTEGER NOT NULL,
                open            REAL    NOT NULL,
                high            REAL    NOT NULL,
                low             REAL    NOT NULL,
                close           REAL    NOT NULL,
                volume          REAL    NOT NULL,
                quote_volume    REAL    NOT NULL DEFAULT 0,
                trade_count     INTEGER NOT NULL DEFAULT 0,
                taker_buy_base  REAL    NOT NULL DEFAULT 0,
                taker_buy_quote REAL    NOT NULL DEFAULT 0,
                PRIMARY KEY (symbol, timeframe, open_time)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create candles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                uid              TEXT    NOT NULL UNIQUE,
                symbol           TEXT    NOT NULL,
                timeframe        TEXT    NOT NULL,
                direction        TEXT    NOT NULL,
                entry_price      REAL    NOT NULL,
                stop_loss        REAL    NOT NULL,
                take_profit_1    REAL    NOT NULL,
                take_profit_2    REAL    NOT NULL,
                take_profit_3    REAL    NOT NULL,
                confidence       REAL    NOT NULL,
                fusion_tier      REAL    NOT NULL,
                fusion_reason    TEXT    NOT NULL,
                analyzer_results TEXT    NOT NULL,
                generated_at     INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create signals table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_signals_key_time
            ON signals (symbol, timeframe, generated_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create signals index")?;

        Ok(())
    }

    fn map_err(err: sqlx::Error) -> StoreError {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }

    fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> Result<Signal, StoreError> {
        let uid: String = row.try_get("uid").map_err(Self::map_err)?;
        let direction: String = row.try_get("direction").map_err(Self::map_err)?;
        let tier: f64 = row.try_get("fusion_tier").map_err(Self::map_err)?;
        let verdicts: String = row.try_get("analyzer_results").map_err(Self::map_err)?;

        let analyzer_results: Vec<(AnalyzerKind, AnalyzerResult)> =
            serde_json::from_str(&verdicts)
                .map_err(|e| StoreError::Query(format!("bad analyzer_results column: {e}")))?;

        Ok(Signal {
            id: uuid::Uuid::parse_str(&uid)
                .map_err(|e| StoreError::Query(format!("bad uid column: {e}")))?,
            symbol: row.try_get("symbol").map_err(Self::map_err)?,
            timeframe: row.try_get("timeframe").map_err(Self::map_err)?,
            direction: parse_direction(&direction)?,
            entry_price: row.try_get("entry_price").map_err(Self::map_err)?,
            stop_loss: row.try_get("stop_loss").map_err(Self::map_err)?,
            take_profit_1: row.try_get("take_profit_1").map_err(Self::map_err)?,
            take_profit_2: row.try_get("take_profit_2").map_err(Self::map_err)?,
            take_profit_3: row.try_get("take_profit_3").map_err(Self::map_err)?,
            confidence: row.try_get("confidence").map_err(Self::map_err)?,
            fusion_tier: FusionTier::from_f64(tier)
                .ok_or_else(|| StoreError::Query(format!("bad fusion_tier column: {tier}")))?,
            fusion_reason: row.try_get("fusion_reason").map_err(Self::map_err)?,
            analyzer_results,
            generated_at: row.try_get("generated_at").map_err(Self::map_err)?,
        })
    }
}

fn parse_direction(value: &str) -> Result<Direction, StoreError> {
    match value {
        "LONG" => Ok(Direction::Long),
        "SHORT" => Ok(Direction::Short),
        other => Err(StoreError::Query(format!("bad direction column: {other}"))),
    }
}

#[async_trait]
impl SignalStore for SqliteStore {
    async fn upsert_candle(&self, candle: &Candle) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO candles
                (symbol, timeframe, open_time, close_time,
                 open, high, low, close, volume,
                 quote_volume, trade_count, taker_buy_base, taker_buy_quote)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&candle.symbol)
        .bind(&candle.timeframe)
        .bind(candle.open_time)
        .bind(candle.close_time)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.quote_volume)
        .bind(candle.trade_count as i64)
        .bind(candle.taker_buy_base)
        .bind(candle.taker_buy_quote)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<i64, StoreError> {
        let verdicts = serde_json::to_string(&signal.analyzer_results)
            .map_err(|e| StoreError::Query(format!("failed to encode analyzer results: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO signals
                (uid, symbol, timeframe, direction,
                 entry_price, stop_loss, take_profit_1, take_profit_2, take_profit_3,
                 confidence, fusion_tier, fusion_reason, analyzer_results, generated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.symbol)
        .bind(&signal.timeframe)
        .bind(signal.direction.to_string())
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(signal.take_profit_1)
        .bind(signal.take_profit_2)
        .bind(signal.take_profit_3)
        .bind(signal.confidence)
        .bind(signal.fusion_tier.as_f64())
        .bind(&signal.fusion_reason)
        .bind(verdicts)
        .bind(signal.generated_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;

        Ok(result.last_insert_rowid())
    }

    async fn recent_signals(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Signal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM signals
            WHERE symbol = ? AND timeframe = ?
            ORDER BY generated_at DESC
            LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        rows.iter().map(Self::row_to_signal).collect()
    }

    async fn delete_candles_older_than(&self, cutoff_ms: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM candles WHERE open_time < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_candles_outside(&self, timeframes: &[String]) -> Result<u64, StoreError> {
        if timeframes.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; timeframes.len()].join(", ");
        let sql =
            format!("DELETE FROM candles WHERE timeframe NOT IN ({placeholders})");

        let mut query = sqlx::query(&sql);
        for timeframe in timeframes {
            query = query.bind(timeframe);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(result.rows_affected())
    }
}
