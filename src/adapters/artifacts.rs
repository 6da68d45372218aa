use crate::domain::model::{
    FieldValue, NormalizedRecord, OutputFormat, RecordReport, ReportRow, RunArtifacts, RunSummary,
};
use crate::utils::error::Result;
use indexmap::IndexMap;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const ISSUES_FILE: &str = "issues.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const BUNDLE_FILE: &str = "artifacts.zip";

const REPORT_HEADERS: [&str; 9] = [
    "row",
    "key",
    "kind",
    "rule_id",
    "severity",
    "columns",
    "original",
    "normalized",
    "message",
];

/// 一個要寫入執行目錄的檔案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArtifactFile {
    fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// 輸出設定
#[derive(Debug, Clone)]
pub struct ArtifactOptions<'a> {
    pub formats: &'a [OutputFormat],
    pub cleaned_name: &'a str,
    pub bundle: bool,
}

/// 產生本次執行的所有檔案：清理後資料（每個格式一份）、問題報告、摘要，以及選用的 zip
pub fn render_all(artifacts: &RunArtifacts, options: &ArtifactOptions<'_>) -> Result<Vec<ArtifactFile>> {
    let mut files = Vec::with_capacity(options.formats.len() + 3);

    for format in options.formats {
        let name = format!("{}.{}", options.cleaned_name, format.extension());
        if files.iter().any(|f: &ArtifactFile| f.name == name) {
            continue;
        }
        let data = render_cleaned(&artifacts.columns, &artifacts.cleaned, *format)?;
        files.push(ArtifactFile::new(name, data));
    }

    files.push(ArtifactFile::new(ISSUES_FILE, render_issues(&artifacts.report)?));
    files.push(ArtifactFile::new(SUMMARY_FILE, render_summary(&artifacts.summary)?));

    if options.bundle {
        tracing::debug!("Creating ZIP bundle with {} files", files.len());
        let zip_data = bundle(&files)?;
        files.push(ArtifactFile::new(BUNDLE_FILE, zip_data));
    }

    Ok(files)
}

/// 清理後資料，欄位順序與輸入相同
pub fn render_cleaned(
    columns: &[String],
    records: &[NormalizedRecord],
    format: OutputFormat,
) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Csv => render_delimited(columns, records, b','),
        OutputFormat::Tsv => render_delimited(columns, records, b'\t'),
        OutputFormat::Json => {
            let rows: Vec<IndexMap<&str, Option<String>>> = records
                .iter()
                .map(|record| {
                    columns
                        .iter()
                        .map(|column| {
                            let value = match record.field(column) {
                                FieldValue::Missing => None,
                                other => Some(other.render()),
                            };
                            (column.as_str(), value)
                        })
                        .collect()
                })
                .collect();
            Ok(serde_json::to_vec_pretty(&rows)?)
        }
    }
}

fn render_delimited(columns: &[String], records: &[NormalizedRecord], delimiter: u8) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());

    writer.write_record(columns)?;
    for record in records {
        writer.write_record(columns.iter().map(|column| record.field(column).render()))?;
    }
    into_bytes(writer)
}

/// 問題報告：每個 Finding 與 TransformationNote 各一列；沒有問題時只有表頭
pub fn render_issues(report: &[RecordReport]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(REPORT_HEADERS)?;
    for entry in report {
        for finding in &entry.findings {
            writer.serialize(ReportRow::from_finding(finding))?;
        }
        for note in &entry.notes {
            writer.serialize(ReportRow::from_note(&entry.record, note))?;
        }
    }
    into_bytes(writer)
}

pub fn render_summary(summary: &RunSummary) -> Result<Vec<u8>> {
    let json = serde_json::to_string_pretty(summary)?;
    Ok(json.into_bytes())
}

pub fn bundle(files: &[ArtifactFile]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for file in files {
        zip.start_file::<_, ()>(file.name.as_str(), FileOptions::default())?;
        zip.write_all(&file.data)?;
    }
    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()).into())
}
