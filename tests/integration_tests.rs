use chrono::NaiveDate;
use sheet_normalizer::core::auditor::RunContext;
use sheet_normalizer::core::Pipeline;
use sheet_normalizer::domain::model::{OutputFormat, RunSummary};
use sheet_normalizer::utils::error::{ErrorCategory, ErrorSeverity};
use sheet_normalizer::{CliConfig, EtlEngine, LocalStorage, NormalizePipeline, NormalizerConfig};
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

const LOAN_SHEET: &str = "\
Nome Cliente,Nr Contrato,Data de Emissão,Vlr Liberado,Pago,Data Pagamento,Valor Pago
Ana,CT-1,02/01/2025,\"R$ 3.000,00\",sim,10/01/2025,\"3.000,00\"
Bruno,CT-2,99/99/2025,\"1,500.00\",não,,
Carla,CT-3,2025-01-05,\"-250,00\",N,,
";

fn cli_config(input: &Path, output_dir: &Path, strict: bool) -> CliConfig {
    CliConfig {
        input: input.to_str().unwrap().to_string(),
        output_dir: output_dir.to_str().unwrap().to_string(),
        config: None,
        strict,
        no_strict: false,
        workers: Some(2),
        formats: vec![],
        bundle: false,
        no_bundle: false,
        verbose: false,
        log_json: false,
        monitor: false,
        dry_run: false,
    }
}

fn fixed_run(input: &Path, strict: bool) -> RunContext {
    let at = NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap();
    RunContext::at(at, input.to_str().unwrap(), strict)
}

fn write_input(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn read_summary(run_dir: &Path) -> RunSummary {
    let data = std::fs::read(run_dir.join("summary.json")).unwrap();
    serde_json::from_slice(&data).unwrap()
}

#[tokio::test]
async fn test_end_to_end_strict_run() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let input = write_input(&input_dir, "emprestimos.csv", LOAN_SHEET);

    let config = cli_config(&input, output_dir.path(), true);
    let storage = LocalStorage::new(output_dir.path());
    let pipeline = NormalizePipeline::new(storage, config, NormalizerConfig::builtin().unwrap());

    let engine = EtlEngine::new_with_monitoring(pipeline, true);
    let output_path = engine.run().await.unwrap();

    let run_dir = Path::new(&output_path);
    assert!(run_dir.starts_with(output_dir.path().join("runs")));
    assert!(run_dir.join("cleaned.csv").exists());
    assert!(run_dir.join("issues.csv").exists());
    assert!(!run_dir.join("artifacts.zip").exists());

    let summary = read_summary(run_dir);
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.records_with_error, 2);
    assert_eq!(summary.cleaned_records, 1);
    assert_eq!(summary.excluded_records, 2);
    assert!(summary.strict);

    let cleaned = std::fs::read_to_string(run_dir.join("cleaned.csv")).unwrap();
    assert_eq!(cleaned.lines().count(), 2);
    assert!(cleaned.contains("CT-1,2025-01-02,3000.00,SIM"));

    // 被排除的記錄仍然出現在問題報告中
    let issues = std::fs::read_to_string(run_dir.join("issues.csv")).unwrap();
    assert!(issues.contains("CT-2,finding,mandatory-field"));
    assert!(issues.contains("CT-3,finding,no-negative-amounts"));
}

#[tokio::test]
async fn test_strict_mode_record_accounting() {
    let dir = TempDir::new().unwrap();
    let mut sheet = String::from("Cliente,Contrato,Emissão,Vlr Liberado\n");
    for row in 1..=40 {
        let date = if row % 5 == 0 { "31/02/2025" } else { "15/03/2025" };
        let amount = if row % 3 == 0 { "-10,00" } else { "10,00" };
        sheet.push_str(&format!("C{row},CT-{row},{date},\"{amount}\"\n"));
    }
    let input = write_input(&dir, "lote.csv", &sheet);

    for strict in [true, false] {
        let out = TempDir::new().unwrap();
        let pipeline = NormalizePipeline::with_run_context(
            LocalStorage::new(out.path()),
            cli_config(&input, out.path(), strict),
            NormalizerConfig::builtin().unwrap(),
            fixed_run(&input, strict),
        );
        let batch = pipeline.extract().await.unwrap();
        let artifacts = pipeline.transform(batch).await.unwrap();
        let summary = &artifacts.summary;

        // rows divisible by 5 or 3: 8 + 13 - 2
        assert_eq!(summary.records_with_error, 19);
        if strict {
            assert_eq!(
                artifacts.cleaned.len() + summary.records_with_error,
                summary.total_records
            );
        } else {
            assert_eq!(artifacts.cleaned.len(), summary.total_records);
        }
    }
}

#[tokio::test]
async fn test_summary_is_independent_of_row_order() {
    let dir = TempDir::new().unwrap();
    let mut lines: Vec<&str> = LOAN_SHEET.lines().collect();
    let header = lines.remove(0);
    lines.reverse();
    let reversed = format!("{}\n{}\n", header, lines.join("\n"));

    let original = write_input(&dir, "a.csv", LOAN_SHEET);
    let shuffled = write_input(&dir, "b.csv", &reversed);

    let mut summaries = Vec::new();
    for input in [&original, &shuffled] {
        let pipeline = NormalizePipeline::with_run_context(
            LocalStorage::new(dir.path()),
            cli_config(input, dir.path(), true),
            NormalizerConfig::builtin().unwrap(),
            // 相同的 run context，讓摘要可以直接比較
            fixed_run(&original, true),
        );
        let batch = pipeline.extract().await.unwrap();
        summaries.push(pipeline.transform(batch).await.unwrap().summary);
    }

    assert_eq!(summaries[0], summaries[1]);
}

#[tokio::test]
async fn test_cleaned_output_is_a_fixed_point() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "emprestimos.csv", LOAN_SHEET);

    let first_out = TempDir::new().unwrap();
    let first = NormalizePipeline::with_run_context(
        LocalStorage::new(first_out.path()),
        cli_config(&input, first_out.path(), false),
        NormalizerConfig::builtin().unwrap(),
        fixed_run(&input, false),
    );
    let first_dir = EtlEngine::new(first).run().await.unwrap();
    let first_cleaned = Path::new(&first_dir).join("cleaned.csv");
    assert!(!read_summary(Path::new(&first_dir)).corrections_by_field.is_empty());

    let second_out = TempDir::new().unwrap();
    let second = NormalizePipeline::with_run_context(
        LocalStorage::new(second_out.path()),
        cli_config(&first_cleaned, second_out.path(), false),
        NormalizerConfig::builtin().unwrap(),
        fixed_run(&first_cleaned, false),
    );
    let second_dir = EtlEngine::new(second).run().await.unwrap();

    let summary = read_summary(Path::new(&second_dir));
    assert!(summary.corrections_by_field.is_empty());
    assert_eq!(
        std::fs::read_to_string(&first_cleaned).unwrap(),
        std::fs::read_to_string(Path::new(&second_dir).join("cleaned.csv")).unwrap()
    );
}

#[tokio::test]
async fn test_custom_config_tsv_json_and_bundle() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("regras.toml");
    std::fs::write(
        &config_path,
        r#"
[pipeline]
name = "pedidos"
description = "Pedidos de compra"
version = "0.1"

[schema]
record_key = "Pedido"
mandatory_fields = ["Pedido"]

[schema.columns]
"Pedido" = "text"
"Data" = "date"
"Total" = "money"

[aliases]
"numero do pedido" = "Pedido"

[[rules]]
id = "total-ceiling"
severity = "WARN"
message = "{column} {value} acima de {limit}"
kind = "ceiling"
column = "Total"
max = "100.00"

[output]
formats = ["json", "tsv"]
bundle = true
cleaned_name = "pedidos"
"#,
    )
    .unwrap();
    let input = write_input(
        &dir,
        "pedidos.tsv",
        "Número do Pedido\tData\tTotal\nP-1\t2025-02-03\t\"1.250,00\"\nP-2\t03/02/2025\t99.90\n",
    );

    let settings = NormalizerConfig::from_file(&config_path).unwrap();
    let mut config = cli_config(&input, dir.path(), false);
    config.config = Some(config_path.to_str().unwrap().to_string());
    config.merge_file_options(&settings);
    assert_eq!(config.formats, vec![OutputFormat::Json, OutputFormat::Tsv]);

    let pipeline = NormalizePipeline::new(LocalStorage::new(dir.path()), config, settings);
    let output_path = EtlEngine::new(pipeline).run().await.unwrap();
    let run_dir = Path::new(&output_path);

    let summary = read_summary(run_dir);
    assert_eq!(summary.total_records, 2);
    assert_eq!(summary.records_with_warn, 1);
    assert_eq!(summary.findings_by_rule.get("total-ceiling"), Some(&1));

    let tsv = std::fs::read_to_string(run_dir.join("pedidos.tsv")).unwrap();
    assert_eq!(tsv, "Pedido\tData\tTotal\nP-1\t2025-02-03\t1250.00\nP-2\t2025-02-03\t99.90\n");

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(run_dir.join("pedidos.json")).unwrap()).unwrap();
    assert_eq!(json[1]["Total"], "99.90");

    let zip_data = std::fs::read(run_dir.join("artifacts.zip")).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_data)).unwrap();
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["issues.csv", "pedidos.json", "pedidos.tsv", "summary.json"]
    );
    let mut summary_in_zip = String::new();
    archive
        .by_name("summary.json")
        .unwrap()
        .read_to_string(&mut summary_in_zip)
        .unwrap();
    assert!(summary_in_zip.contains("\"total_records\": 2"));
}

#[tokio::test]
async fn test_missing_mandatory_column_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let input = write_input(&dir, "incompleta.csv", "Cliente,Contrato\nAna,CT-1\n");

    let pipeline = NormalizePipeline::new(
        LocalStorage::new(out.path()),
        cli_config(&input, out.path(), false),
        NormalizerConfig::builtin().unwrap(),
    );
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    assert!(matches!(
        err,
        sheet_normalizer::NormalizerError::MissingColumnsError { .. }
    ));
    assert!(!out.path().join("runs").exists());
}

#[tokio::test]
async fn test_missing_input_file_is_an_input_error() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let input = dir.path().join("planilha.csv");

    let pipeline = NormalizePipeline::new(
        LocalStorage::new(out.path()),
        cli_config(&input, out.path(), false),
        NormalizerConfig::builtin().unwrap(),
    );
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    assert!(matches!(
        err,
        sheet_normalizer::NormalizerError::InputReadError { .. }
    ));
    assert_eq!(err.category(), ErrorCategory::Input);
    assert_eq!(err.severity(), ErrorSeverity::High);
    assert!(!out.path().join("runs").exists());
}
