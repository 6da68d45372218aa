use anyhow::Context;
use clap::Parser;
use sheet_normalizer::utils::error::ErrorSeverity;
use sheet_normalizer::utils::{logger, validation::Validate};
use sheet_normalizer::{
    CliConfig, EtlEngine, LocalStorage, NormalizePipeline, NormalizerConfig, NormalizerError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = CliConfig::parse();

    // 初始化日誌
    if config.log_json {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting sheet-normalizer CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    let settings = match prepare(&mut config) {
        Ok(settings) => settings,
        Err(e) => fail(e),
    };

    // 相對路徑的輸入以目前目錄為準，不受輸出目錄影響
    config.input = std::path::absolute(&config.input)
        .with_context(|| format!("cannot resolve input path {}", config.input))?
        .to_string_lossy()
        .into_owned();

    let monitor_enabled = config.monitor;
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let dry_run = config.dry_run;
    let storage = LocalStorage::new(config.output_dir.clone());
    let pipeline = NormalizePipeline::new(storage, config, settings);

    if dry_run {
        match pipeline.dry_run().await {
            Ok(report) => {
                for mapping in &report.mappings {
                    println!("  {:<30} → {}", mapping.original, mapping.resolved);
                }
                if !report.untyped_columns.is_empty() {
                    println!("ℹ️ Columns kept as-is: {}", report.untyped_columns.join(", "));
                }
                if report.missing_columns.is_empty() {
                    println!("✅ Configuration and headers look good");
                } else {
                    fail(NormalizerError::MissingColumnsError {
                        columns: report.missing_columns,
                    });
                }
            }
            Err(e) => fail(e),
        }
        return Ok(());
    }

    let engine = EtlEngine::new_with_monitoring(pipeline, monitor_enabled);

    match engine.run().await {
        Ok(output_path) => {
            tracing::info!("✅ Normalization completed successfully!");
            println!("✅ Normalization completed successfully!");
            println!("📁 Run artifacts saved to: {}", output_path);
        }
        Err(e) => fail(e),
    }

    Ok(())
}

fn prepare(config: &mut CliConfig) -> sheet_normalizer::Result<NormalizerConfig> {
    config.validate()?;
    let settings = config.load_settings()?;
    settings.validate()?;
    config.merge_file_options(&settings);
    config.validate()?;

    tracing::info!(
        "📋 Using schema '{}' ({} columns, {} rules)",
        settings.pipeline.name,
        settings.schema.columns.len(),
        settings.rules.len()
    );
    Ok(settings)
}

fn fail(e: NormalizerError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
