use crate::core::normalizer::RecordNormalizer;
use crate::core::rules::{RuleDefinition, RuleEngine, MANDATORY_RULE_ID};
use crate::core::schema::ColumnAliases;
use crate::domain::model::{FieldType, OutputFormat};
use crate::utils::error::{NormalizerError, Result};
use crate::utils::validation::{self, Validate};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// 內建的預設設定（巴西貸款明細表）
pub const DEFAULT_CONFIG: &str = include_str!("default.toml");

const DEFAULT_RECORD_KEY: &str = "Contrato";
const DEFAULT_CLEANED_NAME: &str = "cleaned";

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    pub pipeline: PipelineInfo,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    pub description: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// 欄位名稱 → 型別；未列出的欄位原樣保留
    pub columns: IndexMap<String, FieldType>,
    #[serde(default)]
    pub mandatory_fields: Vec<String>,
    /// 用來識別記錄的欄位，預設 `Contrato`
    pub record_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub formats: Option<Vec<OutputFormat>>,
    pub bundle: Option<bool>,
    pub strict: Option<bool>,
    pub workers: Option<usize>,
    pub cleaned_name: Option<String>,
}

impl NormalizerConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| NormalizerError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| NormalizerError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 內建設定
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(DEFAULT_CONFIG)
    }

    /// 替換環境變數 (例如 ${CUTOFF_DATE})；找不到的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if self.schema.columns.is_empty() {
            return Err(NormalizerError::MissingConfigError {
                field: "schema.columns".to_string(),
            });
        }
        for name in self.schema.columns.keys() {
            validation::validate_non_empty_string("schema.columns", name)?;
        }
        for field in &self.schema.mandatory_fields {
            validation::validate_non_empty_string("schema.mandatory_fields", field)?;
        }
        if let Some(key) = &self.schema.record_key {
            validation::validate_non_empty_string("schema.record_key", key)?;
        }
        for (alias, target) in &self.aliases {
            validation::validate_non_empty_string("aliases", alias)?;
            validation::validate_non_empty_string("aliases", target)?;
        }

        validation::validate_unique("rules.id", self.rules.iter().map(|r| r.id.as_str()))?;
        for rule in &self.rules {
            self.validate_rule(rule)?;
        }

        if let Some(output) = &self.output {
            if let Some(workers) = output.workers {
                validation::validate_positive_number("output.workers", workers, 1)?;
            }
            if let Some(name) = &output.cleaned_name {
                validation::validate_path("output.cleaned_name", name)?;
                if name.contains(['/', '\\']) {
                    return Err(NormalizerError::InvalidConfigValueError {
                        field: "output.cleaned_name".to_string(),
                        value: name.clone(),
                        reason: "Must be a bare file name without directories".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_rule(&self, rule: &RuleDefinition) -> Result<()> {
        let field = format!("rules.{}", rule.id);
        validation::validate_non_empty_string("rules.id", &rule.id)?;
        if rule.id == MANDATORY_RULE_ID {
            return Err(NormalizerError::InvalidConfigValueError {
                field,
                value: rule.id.clone(),
                reason: "Reserved for schema.mandatory_fields".to_string(),
            });
        }
        validation::validate_non_empty_string(&format!("{}.message", field), &rule.message)?;

        let referenced = rule.check.referenced_columns();
        if referenced.is_empty() {
            return Err(NormalizerError::ConfigValidationError {
                field,
                message: "Rule must reference at least one column".to_string(),
            });
        }

        for (column, required_type) in referenced {
            validation::validate_non_empty_string(&format!("{}.columns", field), column)?;
            let Some(required) = required_type else {
                continue;
            };
            match self.schema.columns.get(column) {
                Some(declared) if *declared == required => {}
                Some(declared) => {
                    return Err(NormalizerError::InvalidConfigValueError {
                        field,
                        value: column.to_string(),
                        reason: format!(
                            "Column is declared as {:?} but the rule needs {:?}",
                            declared, required
                        ),
                    })
                }
                None => {
                    return Err(NormalizerError::InvalidConfigValueError {
                        field,
                        value: column.to_string(),
                        reason: format!("Column must be declared in schema.columns as {:?}", required),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn record_key(&self) -> &str {
        self.schema
            .record_key
            .as_deref()
            .unwrap_or(DEFAULT_RECORD_KEY)
    }

    pub fn mandatory_fields(&self) -> &[String] {
        &self.schema.mandatory_fields
    }

    pub fn column_types(&self) -> HashMap<String, FieldType> {
        self.schema
            .columns
            .iter()
            .map(|(name, field_type)| (name.clone(), *field_type))
            .collect()
    }

    pub fn column_aliases(&self) -> ColumnAliases {
        ColumnAliases::new(&self.aliases)
    }

    pub fn build_normalizer(&self) -> RecordNormalizer {
        RecordNormalizer::new(self.column_types(), Some(self.record_key().to_string()))
    }

    pub fn build_rule_engine(&self) -> RuleEngine {
        RuleEngine::with_mandatory_fields(&self.schema.mandatory_fields, self.rules.clone())
    }

    pub fn output(&self) -> OutputConfig {
        self.output.clone().unwrap_or_default()
    }

    pub fn cleaned_name(&self) -> &str {
        self.output
            .as_ref()
            .and_then(|o| o.cleaned_name.as_deref())
            .unwrap_or(DEFAULT_CLEANED_NAME)
    }
}

impl Validate for NormalizerConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
