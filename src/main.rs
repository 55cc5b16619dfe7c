// ==========================================
// 工作簿 ETL - 命令行入口
// ==========================================
// 用法: workbook-etl <file.xlsx> [file2.xlsx ...]
// 运行参数通过环境变量传入（见 config::config_keys）
// 默认 dry run，输出写入 WORKBOOK_ETL_OUTPUT_DIR
// ==========================================

use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use workbook_etl::config::pipeline_config::{is_true, parse_steps};
use workbook_etl::config::{config_keys, PipelineConfig, SheetProfileRegistry};
use workbook_etl::domain::{PipelineInput, PipelineStep};
use workbook_etl::importer::{CalamineWorkbookReader, PipelineOrchestrator};
use workbook_etl::llm::AnthropicClient;
use workbook_etl::repository::SqliteDocumentStore;
use workbook_etl::logging;

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| is_true(&v)).unwrap_or(false)
}

fn build_input(files: Vec<PathBuf>) -> anyhow::Result<PipelineInput> {
    let org_id = std::env::var(config_keys::ORG_ID).unwrap_or_default();
    let mut input = PipelineInput::new(files, org_id)
        .with_commit(env_flag(config_keys::COMMIT))
        .with_llm(env_flag(config_keys::USE_LLM))
        .with_allow_sheet_errors(env_flag(config_keys::ALLOW_SHEET_ERRORS));

    if let Ok(raw) = std::env::var(config_keys::STEPS) {
        if !raw.trim().is_empty() {
            input.steps = parse_steps(&raw)?
                .into_iter()
                .filter_map(PipelineStep::from_number)
                .collect();
        }
    }
    Ok(input)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var(config_keys::LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    tracing::info!("==================================================");
    tracing::info!("工作簿 ETL - 多租户文档库导入管道");
    tracing::info!("系统版本: {}", workbook_etl::VERSION);
    tracing::info!("==================================================");

    let files: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        bail!("用法: workbook-etl <工作簿文件> [更多文件...]");
    }

    let config = PipelineConfig::from_env().context("读取配置失败")?;
    let input = build_input(files).context("读取运行参数失败")?;

    let reader = Arc::new(CalamineWorkbookReader::new());
    let registry = Arc::new(SheetProfileRegistry::builtin());
    let mut orchestrator = PipelineOrchestrator::new(reader, registry, config.clone());

    if input.use_llm {
        match AnthropicClient::from_settings(&config.llm) {
            Ok(client) => {
                tracing::info!(model = %config.llm.model, "已启用推理服务");
                orchestrator = orchestrator.with_completion_client(Arc::new(client));
            }
            Err(e) => tracing::warn!(error = %e, "推理服务不可用"),
        }
    }

    if input.commit {
        let store_path = config.require_store_path()?;
        tracing::info!("使用文档库: {}", store_path.display());
        let store = SqliteDocumentStore::open(store_path)
            .with_context(|| format!("无法打开文档库: {}", store_path.display()))?;
        orchestrator = orchestrator.with_document_store(Arc::new(store));
    }

    let output = orchestrator.run(&input).await.context("导入管道运行失败")?;

    tracing::info!(
        manifests = output.manifests.len(),
        validations = output.validations.len(),
        documents_written = output.documents_written(),
        file_failures = output.file_failures.len(),
        "运行结束，汇总写入 {}",
        config.output_dir.display()
    );
    Ok(())
}
