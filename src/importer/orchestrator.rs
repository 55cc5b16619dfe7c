// ==========================================
// 工作簿 ETL - 管道编排器
// ==========================================
// 流程: 发现 → 映射 → 抽取 → 校验 → 写入（严格单向）
// 每个阶段结束后，若下一步未被请求则提前返回
// 致命错误: 输入文件不存在 / commit 缺少文档库或 orgId / 汇总文件写入失败
// 文件级错误记入 file_failures，其余文件继续
// ==========================================

use crate::config::{config_keys, ConfigError, PipelineConfig, SheetProfileRegistry};
use crate::domain::pipeline::{FileFailure, PipelineInput, PipelineOutput, RunSummary};
use crate::domain::record::ExtractionResult;
use crate::domain::types::{Collection, PipelineStep};
use crate::domain::validation::{ValidationIssue, ValidationReport, ValidationStats};
use crate::importer::error::{PipelineError, PipelineResult};
use crate::importer::loader::{LoadOptions, Loader};
use crate::importer::record_extractor::RecordExtractor;
use crate::importer::schema_mapper::{map_manifest, LlmSchemaMapper, SchemaMapper, StaticSchemaMapper};
use crate::importer::sheet_discovery::SheetDiscovery;
use crate::importer::validator::Validator;
use crate::importer::workbook_reader::{display_name, WorkbookReader};
use crate::llm::{CompletionClient, CompletionOptions};
use crate::repository::DocumentStore;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub const SUMMARY_FILE: &str = "pipeline-summary.json";
pub const ISSUES_FILE: &str = "validation-issues.json";

/// validation-issues.json 中按工作表分组的条目
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetIssues<'a> {
    file_name: &'a str,
    sheet_name: &'a str,
    collection: Collection,
    stats: &'a ValidationStats,
    issues: &'a [ValidationIssue],
}

pub struct PipelineOrchestrator {
    reader: Arc<dyn WorkbookReader>,
    registry: Arc<SheetProfileRegistry>,
    config: PipelineConfig,
    completion: Option<Arc<dyn CompletionClient>>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl PipelineOrchestrator {
    pub fn new(reader: Arc<dyn WorkbookReader>, registry: Arc<SheetProfileRegistry>, config: PipelineConfig) -> Self {
        Self {
            reader,
            registry,
            config,
            completion: None,
            store: None,
        }
    }

    pub fn with_completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ==========================================
    // 运行前检查
    // ==========================================
    fn preflight(&self, input: &PipelineInput) -> PipelineResult<()> {
        if let Some(missing) = input.files.iter().find(|f| !self.reader.exists(f)) {
            return Err(PipelineError::InputFileNotFound(missing.clone()));
        }

        if input.commit && input.requests(PipelineStep::Load) {
            if input.org_id.trim().is_empty() {
                return Err(PipelineError::InvalidInput("commit 模式需要 orgId".to_string()));
            }
            if self.store.is_none() {
                return Err(PipelineError::Config(ConfigError::Missing {
                    key: config_keys::STORE_PATH.to_string(),
                    message: "commit 模式需要配置文档库".to_string(),
                }));
            }
        }
        Ok(())
    }

    fn llm_client(&self, input: &PipelineInput) -> Option<Arc<dyn CompletionClient>> {
        if !input.use_llm {
            return None;
        }
        if self.completion.is_none() {
            warn!("请求了 LLM 但未配置推理服务，改用静态映射与规则校验");
        }
        self.completion.clone()
    }

    fn mapper(&self, client: Option<&Arc<dyn CompletionClient>>) -> Box<dyn SchemaMapper> {
        match client {
            Some(c) => Box::new(LlmSchemaMapper::new(
                c.clone(),
                CompletionOptions::from_settings(&self.config.llm),
                self.config.mapping_sample_rows,
            )),
            None => Box::new(StaticSchemaMapper::new()),
        }
    }

    fn validator(&self, client: Option<&Arc<dyn CompletionClient>>) -> Validator {
        match client {
            Some(c) => Validator::with_llm(
                c.clone(),
                CompletionOptions::from_settings(&self.config.llm),
                self.config.validation_sample_size,
            ),
            None => Validator::rules_only(),
        }
    }

    fn loader(&self, input: &PipelineInput) -> Loader {
        match (&self.store, input.commit) {
            (Some(store), true) => Loader::commit(store.clone(), self.config.load_batch_size),
            _ => Loader::dry_run(&self.config.output_dir),
        }
    }

    // ==========================================
    // 主流程
    // ==========================================
    #[instrument(skip(self, input), fields(files = input.files.len(), commit = input.commit, use_llm = input.use_llm))]
    pub async fn run(&self, input: &PipelineInput) -> PipelineResult<PipelineOutput> {
        let started = Instant::now();
        self.preflight(input)?;

        let client = self.llm_client(input);
        let loader = self.loader(input);
        let mut output = PipelineOutput::default();

        info!(files = input.files.len(), steps = ?input.steps, "开始运行导入管道");

        // ===== 步骤 1: 发现 =====
        if !input.requests(PipelineStep::Discover) {
            return self.finish(input, output, started);
        }
        let discovery = SheetDiscovery::new(self.reader.clone(), self.registry.clone());
        for file in &input.files {
            match discovery.discover(file) {
                Ok(manifest) => output.manifests.push(manifest),
                Err(e) => {
                    error!(file = %file.display(), error = %e, "工作簿读取失败，跳过该文件");
                    output.file_failures.push(FileFailure {
                        file_name: display_name(file),
                        step: PipelineStep::Discover,
                        message: e.to_string(),
                    });
                }
            }
        }
        output.completed_steps.push(PipelineStep::Discover);

        // ===== 步骤 2: 映射 =====
        if !input.requests(PipelineStep::Map) {
            return self.finish(input, output, started);
        }
        let mapper = self.mapper(client.as_ref());
        for manifest in &output.manifests {
            let mappings = map_manifest(mapper.as_ref(), manifest).await;
            output.mappings.extend(mappings);
        }
        output.completed_steps.push(PipelineStep::Map);

        // ===== 步骤 3: 抽取 =====
        if !input.requests(PipelineStep::Extract) {
            return self.finish(input, output, started);
        }
        output.extractions = self.extract_all(&output);
        output.completed_steps.push(PipelineStep::Extract);

        // ===== 步骤 4: 校验 =====
        if !input.requests(PipelineStep::Validate) {
            return self.finish(input, output, started);
        }
        let validator = self.validator(client.as_ref());
        for extraction in &output.extractions {
            let report = validator.validate(extraction, client.is_some()).await;
            output.validations.push(report);
        }
        self.write_issues(&output.validations)?;
        output.completed_steps.push(PipelineStep::Validate);

        // ===== 步骤 5: 写入 =====
        if !input.requests(PipelineStep::Load) {
            return self.finish(input, output, started);
        }
        let options = LoadOptions::new(input.org_id.clone())
            .with_allow_sheet_errors(input.allow_sheet_errors_on_commit);
        output.loads = loader.load(&output.validations, &options).await;
        output.completed_steps.push(PipelineStep::Load);

        self.finish(input, output, started)
    }

    fn extract_all(&self, output: &PipelineOutput) -> Vec<ExtractionResult> {
        let extractor = RecordExtractor::new();
        let mut extractions = Vec::new();

        for manifest in &output.manifests {
            let active = output
                .mappings
                .iter()
                .filter(|m| m.belongs_to(manifest) && !m.skipped);

            for mapping in active {
                let Some(collection) = mapping.target_collection else {
                    continue;
                };
                let overrides = manifest
                    .sheet(&mapping.sheet_name)
                    .map(|s| s.overrides)
                    .unwrap_or_default();

                let result = match self
                    .reader
                    .parse_sheet(&manifest.file_path, &mapping.sheet_name, &overrides)
                {
                    Ok(parsed) => extractor.extract(&parsed, mapping, collection),
                    Err(e) => {
                        warn!(sheet = %mapping.sheet_name, error = %e, "工作表重新读取失败");
                        RecordExtractor::unreadable(mapping, collection, format!("시트를 다시 읽을 수 없음: {}", e))
                    }
                };
                extractions.push(result);
            }
        }
        extractions
    }

    // ==========================================
    // 汇总输出
    // ==========================================
    fn write_json<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> PipelineResult<PathBuf> {
        let dir = &self.config.output_dir;
        let path = dir.join(file_name);
        let write_error = |path: &Path, e: std::io::Error| PipelineError::OutputWrite {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        fs::create_dir_all(dir).map_err(|e| write_error(dir, e))?;
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).map_err(|e| write_error(&path, e))?;
        debug!(path = %path.display(), "汇总文件写入完成");
        Ok(path)
    }

    fn write_issues(&self, reports: &[ValidationReport]) -> PipelineResult<PathBuf> {
        let grouped: Vec<SheetIssues<'_>> = reports
            .iter()
            .map(|r| SheetIssues {
                file_name: &r.file_name,
                sheet_name: &r.sheet_name,
                collection: r.collection,
                stats: &r.stats,
                issues: &r.issues,
            })
            .collect();
        self.write_json(ISSUES_FILE, &grouped)
    }

    fn finish(&self, input: &PipelineInput, mut output: PipelineOutput, started: Instant) -> PipelineResult<PipelineOutput> {
        output.duration = started.elapsed();
        let summary = RunSummary::from_output(input, &output);
        self.write_json(SUMMARY_FILE, &summary)?;

        info!(
            completed_steps = ?output.completed_steps,
            file_failures = output.file_failures.len(),
            records = summary.totals.extracted_records,
            cleaned = summary.totals.cleaned_records,
            written = summary.totals.documents_written,
            duration_ms = summary.duration_ms,
            "导入管道运行完成"
        );
        Ok(output)
    }
}
