use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::SinkError;
use crate::model::OutputRow;
use crate::schema::traffic_windows;
use crate::sink::RowSink;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

// ==================== ORM 模型 ====================
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = traffic_windows)]
struct NewTrafficWindow<'a> {
    window_start: NaiveDateTime,
    client_ip: &'a str,
    protocol: &'a str,
    bytes_in: i64,
    bytes_out: i64,
}

impl<'a> From<&'a OutputRow> for NewTrafficWindow<'a> {
    fn from(row: &'a OutputRow) -> Self {
        Self {
            window_start: row.window_start_local(),
            client_ip: &row.client_address,
            protocol: &row.protocol,
            bytes_in: i64::try_from(row.bytes_in).unwrap_or(i64::MAX),
            bytes_out: i64::try_from(row.bytes_out).unwrap_or(i64::MAX),
        }
    }
}

/// SQLite 输出端，每批数据在一个事务中写入
pub struct SqliteSink {
    db_path: String,
    conn: SqliteConnection,
}

impl SqliteSink {
    pub fn open(db_path: &str) -> Result<Self, SinkError> {
        let mut conn = SqliteConnection::establish(db_path)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| SinkError::Migration(e.to_string()))?;
        info!(db = db_path, migrations = applied.len(), "数据库已就绪");

        Ok(Self {
            db_path: db_path.to_string(),
            conn,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }
}

impl RowSink for SqliteSink {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let records: Vec<NewTrafficWindow<'_>> = rows.iter().map(NewTrafficWindow::from).collect();

        self.conn.transaction(|conn| {
            diesel::insert_into(traffic_windows::table)
                .values(&records)
                .execute(conn)
        })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
