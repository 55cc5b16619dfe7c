// ==========================================
// 工作簿 ETL - 文档存储层
// ==========================================
// 职责: 目标文档库的写入端口，屏蔽存储细节
// 约束: 所有查询使用参数化
// ==========================================

pub mod document_store;
pub mod error;

pub use document_store::{document_id, Document, DocumentStore, SqliteDocumentStore};
pub use error::{RepositoryError, RepositoryResult};
