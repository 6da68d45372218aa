pub mod toml_config;

#[cfg(feature = "cli")]
use crate::adapters::sheet::SUPPORTED_EXTENSIONS;
#[cfg(feature = "cli")]
use crate::core::ConfigProvider;
#[cfg(feature = "cli")]
use crate::domain::model::OutputFormat;
#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use crate::utils::validation::{self, Validate};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "cli")]
use toml_config::NormalizerConfig;

#[cfg(feature = "cli")]
const DEFAULT_FORMATS: &[OutputFormat] = &[OutputFormat::Csv];

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "sheet-normalizer")]
#[command(about = "Normalize, validate and audit loan spreadsheets")]
pub struct CliConfig {
    #[arg(short, long, help = "Input spreadsheet (.csv, .tsv, .xlsx, .xls)")]
    pub input: String,

    #[arg(short, long, default_value = "./output")]
    pub output_dir: String,

    #[arg(short, long, help = "TOML file with columns, aliases and rules (built-in schema if omitted)")]
    pub config: Option<String>,

    #[arg(
        long,
        overrides_with = "no_strict",
        help = "Exclude records with ERROR findings from the cleaned output"
    )]
    pub strict: bool,

    #[arg(
        long,
        overrides_with = "strict",
        help = "Keep records with ERROR findings even if the config file sets strict"
    )]
    pub no_strict: bool,

    #[arg(long, help = "Worker threads for record processing")]
    pub workers: Option<usize>,

    #[arg(long = "format", value_enum, help = "Cleaned output format, repeatable")]
    pub formats: Vec<OutputFormat>,

    #[arg(
        long,
        overrides_with = "no_bundle",
        help = "Also write artifacts.zip with every file of the run"
    )]
    pub bundle: bool,

    #[arg(
        long,
        overrides_with = "bundle",
        help = "Skip artifacts.zip even if the config file sets bundle"
    )]
    pub no_bundle: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[arg(long, help = "Log phase timings and memory usage")]
    pub monitor: bool,

    #[arg(long, help = "Only check the configuration and header mapping")]
    pub dry_run: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 載入 `--config` 指定的設定，沒有指定時使用內建設定
    pub fn load_settings(&self) -> Result<NormalizerConfig> {
        match &self.config {
            Some(path) => NormalizerConfig::from_file(path),
            None => NormalizerConfig::builtin(),
        }
    }

    /// 命令列未指定的選項由設定檔 `[output]` 補上；`--no-strict` / `--no-bundle` 優先
    pub fn merge_file_options(&mut self, settings: &NormalizerConfig) {
        let output = settings.output();
        if !self.strict && !self.no_strict {
            self.strict = output.strict.unwrap_or(false);
        }
        if !self.bundle && !self.no_bundle {
            self.bundle = output.bundle.unwrap_or(false);
        }
        if self.workers.is_none() {
            self.workers = output.workers;
        }
        if self.formats.is_empty() {
            self.formats = output.formats.unwrap_or_default();
        }
    }
}

#[cfg(feature = "cli")]
impl ConfigProvider for CliConfig {
    fn input_path(&self) -> &str {
        &self.input
    }

    fn output_dir(&self) -> &str {
        &self.output_dir
    }

    fn strict(&self) -> bool {
        self.strict && !self.no_strict
    }

    fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    fn output_formats(&self) -> &[OutputFormat] {
        if self.formats.is_empty() {
            DEFAULT_FORMATS
        } else {
            &self.formats
        }
    }

    fn bundle(&self) -> bool {
        self.bundle && !self.no_bundle
    }
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_path("input", &self.input)?;
        validation::validate_file_extension("input", &self.input, SUPPORTED_EXTENSIONS)?;
        validation::validate_path("output_dir", &self.output_dir)?;
        if let Some(config) = &self.config {
            validation::validate_path("config", config)?;
        }
        if let Some(workers) = self.workers {
            validation::validate_positive_number("workers", workers, 1)?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        CliConfig::parse_from(std::iter::once("sheet-normalizer").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--input", "planilha.xlsx"]);
        assert_eq!(config.output_dir, "./output");
        assert!(!config.strict);
        assert_eq!(config.output_formats(), &[OutputFormat::Csv]);
        assert!(config.workers() >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_repeated_format_flag() {
        let config = parse(&["-i", "a.csv", "--format", "tsv", "--format", "json", "--strict"]);
        assert_eq!(config.output_formats(), &[OutputFormat::Tsv, OutputFormat::Json]);
        assert!(config.strict());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(parse(&["-i", "notes.txt"]).validate().is_err());
        assert!(parse(&["-i", "a.csv", "--workers", "0"]).validate().is_err());
    }

    #[test]
    fn test_merge_file_options_only_fills_gaps() {
        let mut settings = NormalizerConfig::builtin().unwrap();
        settings.output = Some(toml_config::OutputConfig {
            formats: Some(vec![OutputFormat::Json]),
            bundle: Some(true),
            strict: Some(true),
            workers: Some(3),
            cleaned_name: None,
        });

        let mut config = parse(&["-i", "a.csv", "--workers", "8"]);
        config.merge_file_options(&settings);
        assert!(config.strict);
        assert!(config.bundle);
        assert_eq!(config.workers(), 8);
        assert_eq!(config.output_formats(), &[OutputFormat::Json]);
    }

    #[test]
    fn test_negated_flags_override_config_file() {
        let mut settings = NormalizerConfig::builtin().unwrap();
        settings.output = Some(toml_config::OutputConfig {
            formats: None,
            bundle: Some(true),
            strict: Some(true),
            workers: None,
            cleaned_name: None,
        });

        let mut config = parse(&["-i", "a.csv", "--no-strict", "--no-bundle"]);
        config.merge_file_options(&settings);
        assert!(!config.strict());
        assert!(!config.bundle());

        // the last of --strict / --no-strict wins
        let config = parse(&["-i", "a.csv", "--strict", "--no-strict"]);
        assert!(!config.strict());
        let config = parse(&["-i", "a.csv", "--no-strict", "--strict"]);
        assert!(config.strict());
    }
}
