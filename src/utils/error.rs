use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Cannot read input '{path}': {source}")]
    InputReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Spreadsheet error: {message}")]
    SpreadsheetError { message: String },

    #[error("Unsupported input format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Missing required columns: {}", columns.join(", "))]
    MissingColumnsError { columns: Vec<String> },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Output,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl NormalizerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::InputReadError { .. }
            | Self::SpreadsheetError { .. }
            | Self::UnsupportedFormat { .. }
            | Self::MissingColumnsError { .. }
            | Self::CsvError(_) => ErrorCategory::Input,
            Self::IoError(_) | Self::ZipError(_) | Self::SerializationError(_) => {
                ErrorCategory::Output
            }
            Self::ProcessingError { .. } => ErrorCategory::Processing,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Input => ErrorSeverity::High,
            // 寫入失敗通常是暫時性的（磁碟、權限），可以重試
            ErrorCategory::Output => ErrorSeverity::Medium,
            ErrorCategory::Processing => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::IoError(_) => "Check that the output directory is writable".to_string(),
            Self::InputReadError { path, .. } => {
                format!("Check that '{}' exists and is readable", path)
            }
            Self::CsvError(_) => {
                "Make sure the input is a well-formed CSV/TSV with a header row".to_string()
            }
            Self::SerializationError(_) => "Retry the run; the summary could not be encoded".to_string(),
            Self::ZipError(_) => "Retry without --bundle or free disk space".to_string(),
            Self::SpreadsheetError { .. } => {
                "Open the workbook and check that the first sheet has a header row".to_string()
            }
            Self::UnsupportedFormat { .. } => {
                "Convert the input to .csv, .tsv, .xlsx or .xls".to_string()
            }
            Self::MissingColumnsError { columns } => format!(
                "Add the columns ({}) or map their headers through [aliases] in the config",
                columns.join(", ")
            ),
            Self::ConfigError { .. }
            | Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. } => {
                "Fix the configuration file and run again".to_string()
            }
            Self::MissingConfigError { field } => format!("Set '{}' in the configuration", field),
            Self::ProcessingError { .. } => "Re-run with --verbose and report the log".to_string(),
        }
    }

    /// 讀取輸入檔時的 IO 錯誤歸類為輸入錯誤，其餘錯誤原樣傳回
    pub fn reading_input(self, path: &str) -> Self {
        match self {
            Self::IoError(source) => Self::InputReadError {
                path: path.to_string(),
                source,
            },
            other => other,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Input => format!("Could not read the input batch: {}", self),
            ErrorCategory::Output => format!("Could not write run artifacts: {}", self),
            ErrorCategory::Processing => format!("Batch processing failed: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, NormalizerError>;
