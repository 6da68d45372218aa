use crate::domain::model::{
    FieldStats, FieldValue, NormalizedRecord, RecordOutcome, RecordReport, RunArtifacts,
    RunSummary, Severity,
};
use crate::domain::ports::Storage;
use crate::utils::error::{NormalizerError, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;

const RUNS_DIR: &str = "runs";
const MAX_DIR_ATTEMPTS: usize = 100;

/// 執行識別碼，格式 `YYYYMMDD-HHMMSS`，可依字典序排序
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunId(String);

impl RunId {
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.format("%Y%m%d-%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 批次開始時擷取一次的執行資訊，整次執行都不會再讀取時鐘
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: NaiveDateTime,
    pub input_file: String,
    pub strict: bool,
}

impl RunContext {
    pub fn start(input_file: impl Into<String>, strict: bool) -> Self {
        Self::at(Local::now().naive_local(), input_file, strict)
    }

    pub fn at(started_at: NaiveDateTime, input_file: impl Into<String>, strict: bool) -> Self {
        Self {
            run_id: RunId::from_datetime(started_at),
            started_at,
            input_file: input_file.into(),
            strict,
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.started_at.date()
    }
}

/// 把每筆記錄的結果折疊成三份產出與摘要。
///
/// 所有統計都是可交換、可結合的計數，因此結果與記錄處理順序無關；
/// `finalize` 取得所有權，摘要只能產生一次。
#[derive(Debug)]
pub struct RunAuditor {
    run: RunContext,
    columns: Vec<String>,
    total_records: usize,
    records_with_warn: usize,
    records_with_error: usize,
    excluded_records: usize,
    warn_findings: usize,
    error_findings: usize,
    findings_by_rule: BTreeMap<String, usize>,
    corrections_by_field: BTreeMap<String, usize>,
    field_stats: BTreeMap<String, FieldStats>,
    cleaned: Vec<NormalizedRecord>,
    report: Vec<RecordReport>,
}

impl RunAuditor {
    pub fn new(run: RunContext, columns: Vec<String>) -> Self {
        Self {
            run,
            columns,
            total_records: 0,
            records_with_warn: 0,
            records_with_error: 0,
            excluded_records: 0,
            warn_findings: 0,
            error_findings: 0,
            findings_by_rule: BTreeMap::new(),
            corrections_by_field: BTreeMap::new(),
            field_stats: BTreeMap::new(),
            cleaned: Vec::new(),
            report: Vec::new(),
        }
    }

    pub fn observe(&mut self, outcome: RecordOutcome) {
        self.total_records += 1;

        let has_warn = outcome.has_severity(Severity::Warn);
        let has_error = outcome.has_severity(Severity::Error);
        if has_warn {
            self.records_with_warn += 1;
        }
        if has_error {
            self.records_with_error += 1;
        }

        for finding in &outcome.findings {
            match finding.severity {
                Severity::Warn => self.warn_findings += 1,
                Severity::Error => self.error_findings += 1,
            }
            *self.findings_by_rule.entry(finding.rule_id.clone()).or_default() += 1;
        }

        let RecordOutcome { record, findings } = outcome;
        self.tally_fields(&record);

        if !findings.is_empty() || !record.notes.is_empty() {
            self.report.push(RecordReport {
                record: record.id.clone(),
                findings,
                notes: record.notes.clone(),
            });
        }

        if self.run.strict && has_error {
            tracing::debug!("🚫 {} excluded from cleaned output (strict mode)", record.id);
            self.excluded_records += 1;
        } else {
            self.cleaned.push(record);
        }
    }

    fn tally_fields(&mut self, record: &NormalizedRecord) {
        for (column, value) in &record.fields {
            let stats = self.field_stats.entry(column.clone()).or_default();
            if !matches!(value, FieldValue::Missing) {
                stats.non_empty_before += 1;
            }
            if value.is_invalid() {
                stats.became_invalid += 1;
            } else if !matches!(value, FieldValue::Missing) {
                stats.valid_after += 1;
            }
        }

        for note in record.notes.iter().filter(|n| n.corrected) {
            *self.corrections_by_field.entry(note.column.clone()).or_default() += 1;
            self.field_stats.entry(note.column.clone()).or_default().corrections += 1;
        }
    }

    pub fn finalize(self) -> RunArtifacts {
        let summary = RunSummary {
            run_id: self.run.run_id.to_string(),
            started_at: self.run.started_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            input_file: self.run.input_file,
            output_dir: None,
            strict: self.run.strict,
            columns: self.columns.len(),
            total_records: self.total_records,
            records_with_warn: self.records_with_warn,
            records_with_error: self.records_with_error,
            excluded_records: self.excluded_records,
            cleaned_records: self.cleaned.len(),
            warn_findings: self.warn_findings,
            error_findings: self.error_findings,
            findings_by_rule: self.findings_by_rule,
            corrections_by_field: self.corrections_by_field,
            field_stats: self.field_stats,
        };

        RunArtifacts {
            columns: self.columns,
            cleaned: self.cleaned,
            report: self.report,
            summary,
        }
    }
}

/// 在 `<root>/runs/` 下建立本次執行的目錄；同一秒內重複執行時加上 `-2`、`-3` 後綴
pub async fn allocate_run_dir<S: Storage>(storage: &S, run_id: &RunId) -> Result<String> {
    for attempt in 1..=MAX_DIR_ATTEMPTS {
        let name = if attempt == 1 {
            run_id.to_string()
        } else {
            format!("{}-{}", run_id, attempt)
        };
        let dir = format!("{}/{}", RUNS_DIR, name);
        if storage.create_dir(&dir).await? {
            return Ok(dir);
        }
        tracing::debug!("Run directory {} already exists, trying next suffix", dir);
    }

    Err(NormalizerError::ProcessingError {
        message: format!(
            "could not allocate a run directory for {} after {} attempts",
            run_id, MAX_DIR_ATTEMPTS
        ),
    })
}
