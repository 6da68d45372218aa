//! 把輸入檔的位元組讀成 [`RawBatch`]。
//!
//! 支援 CSV / TSV（csv crate）以及 XLSX / XLS（calamine，只讀第一個工作表）。
//! 表頭在這裡經過別名對照改成標準欄名，並檢查必要欄位是否存在。

use crate::core::schema::ColumnAliases;
use crate::domain::model::{CellValue, RawBatch, RawRecord};
use crate::utils::error::{NormalizerError, Result};
use calamine::{Data, DataType, Reader, Xls, Xlsx};
use indexmap::IndexMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "tsv", "xlsx", "xls"];

/// 依副檔名判斷輸入格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Tsv,
    Xlsx,
    Xls,
}

impl SheetFormat {
    pub fn from_path(path: &str) -> Result<Self> {
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(SheetFormat::Csv),
            "tsv" => Ok(SheetFormat::Tsv),
            "xlsx" => Ok(SheetFormat::Xlsx),
            "xls" => Ok(SheetFormat::Xls),
            _ => Err(NormalizerError::UnsupportedFormat { extension }),
        }
    }
}

/// 表頭對照結果，dry run 也會用到
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    pub original: String,
    pub resolved: String,
}

pub struct SheetLoader<'a> {
    aliases: &'a ColumnAliases,
    mandatory: &'a [String],
}

impl<'a> SheetLoader<'a> {
    pub fn new(aliases: &'a ColumnAliases, mandatory: &'a [String]) -> Self {
        Self { aliases, mandatory }
    }

    pub fn load(&self, source: &str, data: &[u8], format: SheetFormat) -> Result<RawBatch> {
        let (raw_headers, rows) = match format {
            SheetFormat::Csv => read_delimited(data, b',')?,
            SheetFormat::Tsv => read_delimited(data, b'\t')?,
            SheetFormat::Xlsx => {
                let workbook: Xlsx<_> = Xlsx::new(Cursor::new(data)).map_err(spreadsheet_error)?;
                read_workbook(workbook)?
            }
            SheetFormat::Xls => {
                let workbook: Xls<_> = Xls::new(Cursor::new(data)).map_err(spreadsheet_error)?;
                read_workbook(workbook)?
            }
        };

        let mapping = self.map_headers(&raw_headers);
        self.check_mandatory(&mapping)?;

        // 空白表頭的欄位與重複欄位都不收
        let mut headers = Vec::with_capacity(mapping.len());
        let mut kept = Vec::with_capacity(mapping.len());
        for (index, m) in mapping.iter().enumerate() {
            if m.resolved.is_empty() {
                continue;
            }
            if headers.contains(&m.resolved) {
                tracing::warn!(
                    "⚠️ Column '{}' maps to '{}' which already exists, ignoring it",
                    m.original,
                    m.resolved
                );
                continue;
            }
            headers.push(m.resolved.clone());
            kept.push(index);
        }

        let mut records = Vec::with_capacity(rows.len());
        for (number, row) in rows {
            if row.iter().all(CellValue::is_blank) {
                continue;
            }
            let mut cells = IndexMap::with_capacity(headers.len());
            for (header, &column) in headers.iter().zip(&kept) {
                let cell = row.get(column).cloned().unwrap_or(CellValue::Empty);
                cells.insert(header.clone(), cell);
            }
            records.push(RawRecord::new(number, cells));
        }

        tracing::info!(
            "📥 Loaded {} records with {} columns from {}",
            records.len(),
            headers.len(),
            source
        );

        Ok(RawBatch {
            source: source.to_string(),
            headers,
            records,
        })
    }

    pub fn map_headers(&self, raw_headers: &[String]) -> Vec<HeaderMapping> {
        raw_headers
            .iter()
            .map(|original| HeaderMapping {
                original: original.clone(),
                resolved: if original.trim().is_empty() {
                    String::new()
                } else {
                    self.aliases.resolve(original)
                },
            })
            .collect()
    }

    fn check_mandatory(&self, mapping: &[HeaderMapping]) -> Result<()> {
        let missing: Vec<String> = self
            .mandatory
            .iter()
            .filter(|column| !mapping.iter().any(|m| &m.resolved == *column))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(NormalizerError::MissingColumnsError { columns: missing })
        }
    }
}

/// 只讀表頭，不讀資料列
pub fn read_headers(data: &[u8], format: SheetFormat) -> Result<Vec<String>> {
    match format {
        SheetFormat::Csv | SheetFormat::Tsv => {
            let delimiter = if format == SheetFormat::Tsv { b'\t' } else { b',' };
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .flexible(true)
                .from_reader(data);
            Ok(reader.headers()?.iter().map(str::to_string).collect())
        }
        SheetFormat::Xlsx | SheetFormat::Xls => {
            let (headers, _) = match format {
                SheetFormat::Xlsx => {
                    let workbook: Xlsx<_> = Xlsx::new(Cursor::new(data)).map_err(spreadsheet_error)?;
                    read_workbook(workbook)?
                }
                _ => {
                    let workbook: Xls<_> = Xls::new(Cursor::new(data)).map_err(spreadsheet_error)?;
                    read_workbook(workbook)?
                }
            };
            Ok(headers)
        }
    }
}

fn spreadsheet_error(e: impl std::fmt::Display) -> NormalizerError {
    NormalizerError::SpreadsheetError {
        message: e.to_string(),
    }
}

/// 表頭與資料列；每列帶著它在工作表中的資料列號（從 1 開始）
type Rows = (Vec<String>, Vec<(usize, Vec<CellValue>)>);

fn read_delimited(data: &[u8], delimiter: u8) -> Result<Rows> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    let mut number = 0;
    for result in reader.records() {
        let record = result?;
        // csv reader 會直接跳過空行，這裡把跳過的行補回列號
        let start = record
            .position()
            .map_or(data.len(), |pos| pos.byte() as usize);
        number += 1 + blank_lines_at(data, start);
        rows.push((number, record.iter().map(CellValue::from).collect()));
    }
    Ok((headers, rows))
}

/// 計算 `start` 起連續的空行數；CRLF 算一行
fn blank_lines_at(data: &[u8], start: usize) -> usize {
    let mut i = start.min(data.len());
    // 上一列的 CRLF 可能只被吃掉 \r
    if i > 0 && data[i - 1] == b'\r' && data.get(i) == Some(&b'\n') {
        i += 1;
    }

    let mut blanks = 0;
    while let Some(&byte) = data.get(i) {
        match byte {
            b'\n' => i += 1,
            b'\r' => {
                i += 1;
                if data.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            _ => break,
        }
        blanks += 1;
    }
    blanks
}

fn read_workbook<R, RS>(mut workbook: R) -> Result<Rows>
where
    R: Reader<RS>,
    R::Error: std::fmt::Display,
    RS: Read + Seek,
{
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| spreadsheet_error("workbook has no worksheets"))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(spreadsheet_error)?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| spreadsheet_error(format!("worksheet '{}' is empty", sheet_name)))?
        .iter()
        .map(|cell| cell.to_string())
        .collect();

    let data_rows: Vec<(usize, Vec<CellValue>)> = rows
        .enumerate()
        .map(|(index, row)| (index + 1, row.iter().map(cell_value).collect()))
        .collect();
    Ok((headers, data_rows))
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::from(s.as_str()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        // 日期儲存格直接轉成 ISO 文字，交給日期解析器處理
        Data::DateTime(_) => match cell.as_date() {
            Some(date) => CellValue::Text(date.format("%Y-%m-%d").to_string()),
            None => CellValue::Text(cell.to_string()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from(s.as_str()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}
