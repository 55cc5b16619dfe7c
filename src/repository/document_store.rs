// ==========================================
// 工作簿 ETL - 文档存储端口与 SQLite 实现
// ==========================================
// 端口: DocumentStore（按集合路径批量 upsert）
// 实现: SqliteDocumentStore（JSON 文档，键为完整路径，一批一事务）
// 红线: 存储层不含业务规则，只做文档读写
// ==========================================

use crate::db::{ensure_document_schema, open_in_memory, open_sqlite_connection};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 文档 = 顶层 JSON 对象，必须带字符串 "id"
pub type Document = Map<String, Value>;

// ==========================================
// DocumentStore Trait
// ==========================================
// 实现者: SqliteDocumentStore / 测试替身
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 批量 upsert 到集合路径（如 "orgs/acme/transactions"）
    ///
    /// # 返回
    /// - Ok(usize): 写入的文档数
    /// - Err: 整批回滚
    async fn batch_upsert(&self, collection_path: &str, documents: &[Document], merge: bool) -> RepositoryResult<usize>;
}

pub fn document_id(doc: &Document) -> RepositoryResult<&str> {
    doc.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RepositoryError::FieldValueError {
            field: "id".to_string(),
            message: "文档缺少字符串 id".to_string(),
        })
}

// ==========================================
// SqliteDocumentStore
// ==========================================
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    pub fn open(db_path: &Path) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> RepositoryResult<Self> {
        let conn = open_in_memory().map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> RepositoryResult<Self> {
        ensure_document_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在事务中写入一个文档（merge 时顶层字段合并）
    fn upsert_tx(tx: &Transaction, collection_path: &str, doc: &Document, merge: bool, now: &str) -> RepositoryResult<()> {
        let id = document_id(doc)?;
        let path = format!("{}/{}", collection_path, id);

        let data = if merge {
            let existing: Option<String> = tx
                .query_row("SELECT data FROM documents WHERE path = ?1", params![path], |row| row.get(0))
                .optional()?;
            match existing {
                Some(raw) => {
                    let mut merged: Document = serde_json::from_str(&raw)?;
                    merged.extend(doc.clone());
                    merged
                }
                None => doc.clone(),
            }
        } else {
            doc.clone()
        };

        tx.execute(
            r#"
            INSERT OR REPLACE INTO documents (path, collection_path, doc_id, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![path, collection_path, id, serde_json::to_string(&data)?, now],
        )?;
        Ok(())
    }

    /// 读取单个文档
    pub fn get(&self, collection_path: &str, id: &str) -> RepositoryResult<Option<Document>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE path = ?1",
                params![format!("{}/{}", collection_path, id)],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| serde_json::from_str(&r).map_err(RepositoryError::from))
            .transpose()
    }

    /// 集合内文档数
    pub fn count(&self, collection_path: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection_path = ?1",
            params![collection_path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 集合内全部文档（按 id 排序）
    pub fn list(&self, collection_path: &str) -> RepositoryResult<Vec<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM documents WHERE collection_path = ?1 ORDER BY doc_id")?;
        let rows = stmt.query_map(params![collection_path], |row| row.get::<_, String>(0))?;

        let mut docs = Vec::new();
        for raw in rows {
            docs.push(serde_json::from_str(&raw?)?);
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn batch_upsert(&self, collection_path: &str, documents: &[Document], merge: bool) -> RepositoryResult<usize> {
        if collection_path.trim_matches('/').is_empty() {
            return Err(RepositoryError::InvalidPath(collection_path.to_string()));
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        for doc in documents {
            Self::upsert_tx(&tx, collection_path, doc, merge, &now)?;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        debug!(collection_path, count = documents.len(), merge, "文档批量写入完成");
        Ok(documents.len())
    }
}
