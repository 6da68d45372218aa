use chrono::NaiveDate;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 試算表儲存格的原始值（尚未解讀型別）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// 儲存格原樣的文字表示
    pub fn raw_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Number(_) => false,
            CellValue::Text(s) => s.trim().is_empty(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

/// 一列原始資料，欄位順序即試算表欄位順序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 資料列序號（從 1 開始，不含表頭）
    pub row: usize,
    pub cells: IndexMap<String, CellValue>,
}

impl RawRecord {
    pub fn new(row: usize, cells: IndexMap<String, CellValue>) -> Self {
        Self { row, cells }
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

/// 一次載入的整批資料
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub source: String,
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Date,
    Money,
    Flag,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidReason {
    #[serde(rename = "unparseable-date")]
    UnparseableDate,
    #[serde(rename = "unparseable-amount")]
    UnparseableAmount,
    #[serde(rename = "unknown-flag-token")]
    UnknownFlagToken,
}

impl InvalidReason {
    pub fn code(&self) -> &'static str {
        match self {
            InvalidReason::UnparseableDate => "unparseable-date",
            InvalidReason::UnparseableAmount => "unparseable-amount",
            InvalidReason::UnknownFlagToken => "unknown-flag-token",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 正規化後的欄位值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Date(NaiveDate),
    Money(Decimal),
    Flag(bool),
    Text(String),
    Missing,
    Invalid { raw: String, reason: InvalidReason },
}

pub const FLAG_TRUE: &str = "SIM";
pub const FLAG_FALSE: &str = "NÃO";

impl FieldValue {
    /// 標準格式輸出；再次解析會得到相同的值
    pub fn render(&self) -> String {
        match self {
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Money(amount) => {
                let mut amount = *amount;
                amount.rescale(2);
                amount.to_string()
            }
            FieldValue::Flag(true) => FLAG_TRUE.to_string(),
            FieldValue::Flag(false) => FLAG_FALSE.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Missing => String::new(),
            FieldValue::Invalid { raw, .. } => raw.clone(),
        }
    }

    /// 有可用的值（非缺漏、非無效、非空白文字）
    pub fn is_present(&self) -> bool {
        match self {
            FieldValue::Missing | FieldValue::Invalid { .. } => false,
            FieldValue::Text(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, FieldValue::Invalid { .. })
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_money(&self) -> Option<Decimal> {
        match self {
            FieldValue::Money(amount) => Some(*amount),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

/// 單一欄位的轉換紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationNote {
    pub column: String,
    pub original: String,
    pub normalized: String,
    pub corrected: bool,
    pub reason: Option<InvalidReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub row: usize,
    pub key: Option<String>,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "row {} ({})", self.row, key),
            None => write!(f, "row {}", self.row),
        }
    }
}

static MISSING: FieldValue = FieldValue::Missing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: RecordId,
    pub fields: IndexMap<String, FieldValue>,
    pub notes: Vec<TransformationNote>,
}

impl NormalizedRecord {
    /// 取欄位值；欄位不存在視為缺漏
    pub fn field(&self, column: &str) -> &FieldValue {
        self.fields.get(column).unwrap_or(&MISSING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warn => f.write_str("WARN"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub record: RecordId,
    pub message: String,
    pub columns: Vec<String>,
}

/// 一筆記錄處理完的結果（正規化 + 規則檢查）
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub record: NormalizedRecord,
    pub findings: Vec<Finding>,
}

impl RecordOutcome {
    pub fn has_severity(&self, severity: Severity) -> bool {
        self.findings.iter().any(|f| f.severity == severity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Tsv,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
            OutputFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStats {
    pub non_empty_before: usize,
    pub valid_after: usize,
    pub became_invalid: usize,
    pub corrections: usize,
}

/// 整次執行的統計摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub input_file: String,
    /// 產出目錄，load 階段寫入前填上
    #[serde(default)]
    pub output_dir: Option<String>,
    pub strict: bool,
    pub columns: usize,
    pub total_records: usize,
    pub records_with_warn: usize,
    pub records_with_error: usize,
    pub excluded_records: usize,
    pub cleaned_records: usize,
    pub warn_findings: usize,
    pub error_findings: usize,
    pub findings_by_rule: BTreeMap<String, usize>,
    pub corrections_by_field: BTreeMap<String, usize>,
    pub field_stats: BTreeMap<String, FieldStats>,
}

/// 報告中依記錄分組的問題與轉換紀錄
#[derive(Debug, Clone, PartialEq)]
pub struct RecordReport {
    pub record: RecordId,
    pub findings: Vec<Finding>,
    pub notes: Vec<TransformationNote>,
}

/// 問題報告（issues.csv）的一列：一個 Finding 或一個 TransformationNote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub row: usize,
    pub key: String,
    pub kind: String,
    pub rule_id: String,
    pub severity: String,
    pub columns: String,
    pub original: String,
    pub normalized: String,
    pub message: String,
}

impl ReportRow {
    pub fn from_finding(finding: &Finding) -> Self {
        Self {
            row: finding.record.row,
            key: finding.record.key.clone().unwrap_or_default(),
            kind: "finding".to_string(),
            rule_id: finding.rule_id.clone(),
            severity: finding.severity.to_string(),
            columns: finding.columns.join("|"),
            original: String::new(),
            normalized: String::new(),
            message: finding.message.clone(),
        }
    }

    pub fn from_note(record: &RecordId, note: &TransformationNote) -> Self {
        let message = match note.reason {
            Some(reason) => reason.code().to_string(),
            None => "corrected".to_string(),
        };
        Self {
            row: record.row,
            key: record.key.clone().unwrap_or_default(),
            kind: "note".to_string(),
            rule_id: String::new(),
            severity: String::new(),
            columns: note.column.clone(),
            original: note.original.clone(),
            normalized: note.normalized.clone(),
            message,
        }
    }
}

/// transform 階段的產出，load 階段負責寫入
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub columns: Vec<String>,
    pub cleaned: Vec<NormalizedRecord>,
    pub report: Vec<RecordReport>,
    pub summary: RunSummary,
}
