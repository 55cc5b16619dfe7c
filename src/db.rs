// ==========================================
// 工作簿 ETL - SQLite 连接初始化
// ==========================================
// 统一 PRAGMA 与 busy_timeout；建表幂等
// ==========================================

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 文档表结构（path = "{collection_path}/{doc_id}"）
const DOCUMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    path            TEXT PRIMARY KEY,
    collection_path TEXT NOT NULL,
    doc_id          TEXT NOT NULL,
    data            TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_path);
"#;

pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 内存库（测试用）
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(conn)
}

pub fn ensure_document_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DOCUMENT_SCHEMA)
}
