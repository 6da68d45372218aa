use crate::adapters::artifacts::{render_all, ArtifactOptions};
use crate::adapters::sheet::{self, HeaderMapping, SheetFormat, SheetLoader};
use crate::config::toml_config::NormalizerConfig;
use crate::core::auditor::{allocate_run_dir, RunContext};
use crate::core::batch::BatchProcessor;
use crate::core::schema::ColumnAliases;
use crate::core::{ConfigProvider, Pipeline, Storage};
use crate::domain::model::{RawBatch, RunArtifacts};
use crate::utils::error::Result;

/// 讀取試算表、正規化、檢查規則並寫出執行目錄的管道
pub struct NormalizePipeline<S: Storage, C: ConfigProvider> {
    pub(crate) storage: S,
    pub(crate) config: C,
    settings: NormalizerConfig,
    aliases: ColumnAliases,
    processor: BatchProcessor,
    run: RunContext,
}

/// dry run 的結果：表頭對照與缺少的必要欄位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunReport {
    pub mappings: Vec<HeaderMapping>,
    pub missing_columns: Vec<String>,
    pub untyped_columns: Vec<String>,
}

impl<S: Storage, C: ConfigProvider> NormalizePipeline<S, C> {
    pub fn new(storage: S, config: C, settings: NormalizerConfig) -> Self {
        let run = RunContext::start(config.input_path(), config.strict());
        Self::with_run_context(storage, config, settings, run)
    }

    /// 指定執行時間（測試或重播時使用）
    pub fn with_run_context(storage: S, config: C, settings: NormalizerConfig, run: RunContext) -> Self {
        let processor = BatchProcessor::new(
            settings.build_normalizer(),
            settings.build_rule_engine(),
            config.workers(),
        );
        Self {
            aliases: settings.column_aliases(),
            storage,
            config,
            settings,
            processor,
            run,
        }
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    /// 只讀表頭並回報對照結果，不處理任何記錄也不寫檔
    pub async fn dry_run(&self) -> Result<DryRunReport> {
        let input = self.config.input_path();
        let format = SheetFormat::from_path(input)?;
        let data = self
            .storage
            .read_file(input)
            .await
            .map_err(|e| e.reading_input(input))?;
        let headers = sheet::read_headers(&data, format)?;

        let loader = SheetLoader::new(&self.aliases, self.settings.mandatory_fields());
        let mappings = loader.map_headers(&headers);
        let missing_columns = self
            .settings
            .mandatory_fields()
            .iter()
            .filter(|column| !mappings.iter().any(|m| &m.resolved == *column))
            .cloned()
            .collect();
        let untyped_columns = mappings
            .iter()
            .filter(|m| !m.resolved.is_empty() && !self.settings.schema.columns.contains_key(&m.resolved))
            .map(|m| m.resolved.clone())
            .collect();

        Ok(DryRunReport {
            mappings,
            missing_columns,
            untyped_columns,
        })
    }
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider> Pipeline for NormalizePipeline<S, C> {
    async fn extract(&self) -> Result<RawBatch> {
        let input = self.config.input_path();
        let format = SheetFormat::from_path(input)?;

        tracing::debug!("Reading {:?} input from {}", format, input);
        let data = self
            .storage
            .read_file(input)
            .await
            .map_err(|e| e.reading_input(input))?;

        let loader = SheetLoader::new(&self.aliases, self.settings.mandatory_fields());
        loader.load(input, &data, format)
    }

    async fn transform(&self, batch: RawBatch) -> Result<RunArtifacts> {
        tracing::debug!(
            "Run {} started at {} (strict: {})",
            self.run.run_id,
            self.run.started_at,
            self.run.strict
        );
        self.processor.run(batch, self.run.clone()).await
    }

    async fn load(&self, mut artifacts: RunArtifacts) -> Result<String> {
        let run_dir = allocate_run_dir(&self.storage, &self.run.run_id).await?;
        let output_path = format!("{}/{}", self.config.output_dir().trim_end_matches('/'), run_dir);
        artifacts.summary.output_dir = Some(output_path.clone());

        let options = ArtifactOptions {
            formats: self.config.output_formats(),
            cleaned_name: self.settings.cleaned_name(),
            bundle: self.config.bundle(),
        };
        let files = render_all(&artifacts, &options)?;

        for file in &files {
            let path = format!("{}/{}", run_dir, file.name);
            tracing::debug!("Writing {} ({} bytes)", path, file.data.len());
            self.storage.write_file(&path, &file.data).await?;
        }

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{OutputFormat, RunSummary};
    use crate::utils::error::NormalizerError;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const INPUT: &str = "\
Nome Cliente,Nr Contrato,Data de Emissão,Vlr Liberado,Pago,Data Pagamento,Valor Pago
Ana,CT-1,02/01/2025,\"R$ 3.000,00\",sim,10/01/2025,\"3.000,00\"
Bruno,CT-2,99/99/2025,\"1,500.00\",não,,
Carla,CT-3,2025-01-05,\"-250,00\",N,,
";

    #[derive(Clone)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn with_input(data: &str) -> Self {
            let mut files = HashMap::new();
            files.insert("input.csv".to_string(), data.as_bytes().to_vec());
            Self {
                files: Arc::new(Mutex::new(files)),
            }
        }

        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.get_file(path).await.ok_or_else(|| {
                NormalizerError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    path.to_string(),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn create_dir(&self, path: &str) -> Result<bool> {
            let mut files = self.files.lock().await;
            let marker = format!("{}/", path);
            if files.contains_key(&marker) {
                return Ok(false);
            }
            files.insert(marker, Vec::new());
            Ok(true)
        }
    }

    struct MockConfig {
        input: String,
        strict: bool,
        formats: Vec<OutputFormat>,
        bundle: bool,
    }

    impl ConfigProvider for MockConfig {
        fn input_path(&self) -> &str {
            &self.input
        }

        fn output_dir(&self) -> &str {
            "/tmp/out"
        }

        fn strict(&self) -> bool {
            self.strict
        }

        fn workers(&self) -> usize {
            2
        }

        fn output_formats(&self) -> &[OutputFormat] {
            &self.formats
        }

        fn bundle(&self) -> bool {
            self.bundle
        }
    }

    fn pipeline(storage: MockStorage, strict: bool, formats: Vec<OutputFormat>, bundle: bool) -> NormalizePipeline<MockStorage, MockConfig> {
        let config = MockConfig {
            input: "input.csv".to_string(),
            strict,
            formats,
            bundle,
        };
        let at = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let run = RunContext::at(at, "input.csv", strict);
        NormalizePipeline::with_run_context(storage, config, NormalizerConfig::builtin().unwrap(), run)
    }

    async fn run(pipeline: &NormalizePipeline<MockStorage, MockConfig>) -> String {
        let batch = pipeline.extract().await.unwrap();
        let artifacts = pipeline.transform(batch).await.unwrap();
        pipeline.load(artifacts).await.unwrap()
    }

    #[tokio::test]
    async fn test_strict_run_writes_all_artifacts() {
        let storage = MockStorage::with_input(INPUT);
        let pipeline = pipeline(storage.clone(), true, vec![OutputFormat::Csv], false);

        let output = run(&pipeline).await;
        assert_eq!(output, "/tmp/out/runs/20250601-120000");

        let summary: RunSummary = serde_json::from_slice(
            &storage.get_file("runs/20250601-120000/summary.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.records_with_error, 2);
        assert_eq!(summary.cleaned_records, 1);
        assert_eq!(summary.excluded_records, 2);
        assert_eq!(summary.output_dir.as_deref(), Some("/tmp/out/runs/20250601-120000"));
        assert_eq!(summary.findings_by_rule.get("mandatory-field"), Some(&1));
        assert_eq!(summary.findings_by_rule.get("no-negative-amounts"), Some(&1));

        let cleaned = String::from_utf8(
            storage.get_file("runs/20250601-120000/cleaned.csv").await.unwrap(),
        )
        .unwrap();
        let lines: Vec<_> = cleaned.lines().collect();
        assert_eq!(
            lines[0],
            "Cliente,Contrato,Emissão,Vlr Liberado,Pago,Data Pagamento,VALOR PAGO"
        );
        assert_eq!(lines[1], "Ana,CT-1,2025-01-02,3000.00,SIM,2025-01-10,3000.00");
        assert_eq!(lines.len(), 2);

        let issues = String::from_utf8(
            storage.get_file("runs/20250601-120000/issues.csv").await.unwrap(),
        )
        .unwrap();
        assert!(issues.contains("2,CT-2,finding,mandatory-field,ERROR,Emissão"));
        assert!(issues.contains("3,CT-3,finding,no-negative-amounts,ERROR,Vlr Liberado"));
        assert!(issues.contains("2,CT-2,note,,,Emissão,99/99/2025,,unparseable-date"));
    }

    #[tokio::test]
    async fn test_lenient_run_keeps_every_record() {
        let storage = MockStorage::with_input(INPUT);
        let pipeline = pipeline(storage.clone(), false, vec![OutputFormat::Csv, OutputFormat::Json], true);

        run(&pipeline).await;

        let summary: RunSummary = serde_json::from_slice(
            &storage.get_file("runs/20250601-120000/summary.json").await.unwrap(),
        )
        .unwrap();
        assert_eq!(summary.cleaned_records, 3);
        assert_eq!(summary.excluded_records, 0);

        assert!(storage.get_file("runs/20250601-120000/cleaned.json").await.is_some());
        assert!(storage.get_file("runs/20250601-120000/artifacts.zip").await.is_some());
    }

    #[tokio::test]
    async fn test_second_run_in_same_second_gets_suffix() {
        let storage = MockStorage::with_input(INPUT);
        let first = pipeline(storage.clone(), false, vec![OutputFormat::Csv], false);
        let second = pipeline(storage.clone(), false, vec![OutputFormat::Csv], false);

        assert_eq!(run(&first).await, "/tmp/out/runs/20250601-120000");
        assert_eq!(run(&second).await, "/tmp/out/runs/20250601-120000-2");
    }

    #[tokio::test]
    async fn test_missing_columns_abort_before_processing() {
        let storage = MockStorage::with_input("Cliente,Contrato\nAna,CT-1\n");
        let pipeline = pipeline(storage.clone(), false, vec![OutputFormat::Csv], false);

        match pipeline.extract().await {
            Err(NormalizerError::MissingColumnsError { columns }) => {
                assert_eq!(columns, vec!["Emissão", "Vlr Liberado"]);
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.records.len())),
        }
    }

    #[tokio::test]
    async fn test_unreadable_input_is_reported_as_input_error() {
        let storage = MockStorage {
            files: Arc::new(Mutex::new(HashMap::new())),
        };
        let pipeline = pipeline(storage, false, vec![OutputFormat::Csv], false);

        let err = pipeline.extract().await.unwrap_err();
        assert!(matches!(err, NormalizerError::InputReadError { ref path, .. } if path == "input.csv"));
        assert_eq!(err.category(), crate::utils::error::ErrorCategory::Input);

        let err = pipeline.dry_run().await.unwrap_err();
        assert!(matches!(err, NormalizerError::InputReadError { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_reports_header_mapping() {
        let storage = MockStorage::with_input("Nr Contrato,Observação\nCT-1,x\n");
        let pipeline = pipeline(storage.clone(), false, vec![OutputFormat::Csv], false);

        let report = pipeline.dry_run().await.unwrap();
        assert_eq!(report.mappings[0].resolved, "Contrato");
        assert_eq!(report.missing_columns, vec!["Cliente", "Emissão", "Vlr Liberado"]);
        assert_eq!(report.untyped_columns, vec!["Observação"]);

        let files = storage.files.lock().await;
        assert_eq!(files.len(), 1);
    }
}
