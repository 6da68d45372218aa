use crate::core::parsers::{self, Parsed};
use crate::domain::model::{
    CellValue, FieldType, FieldValue, NormalizedRecord, RawRecord, RecordId, TransformationNote,
};
use indexmap::IndexMap;
use std::collections::HashMap;

/// 單筆記錄正規化器。
///
/// 欄位型別由設定檔決定；沒有宣告型別的欄位原樣保留為文字。
/// 不持有任何跨記錄狀態，可以在多個 worker 間共用。
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    column_types: HashMap<String, FieldType>,
    record_key: Option<String>,
}

impl RecordNormalizer {
    pub fn new(column_types: HashMap<String, FieldType>, record_key: Option<String>) -> Self {
        Self {
            column_types,
            record_key,
        }
    }

    pub fn column_type(&self, column: &str) -> Option<FieldType> {
        self.column_types.get(column).copied()
    }

    pub fn normalize(&self, raw: &RawRecord) -> NormalizedRecord {
        let mut fields = IndexMap::with_capacity(raw.cells.len());
        let mut notes = Vec::new();

        for (column, cell) in &raw.cells {
            let value = match self.column_type(column) {
                Some(field_type) => {
                    let parsed = self.parse(column, field_type, cell);
                    if let Some(note) = note_for(column, cell, &parsed) {
                        notes.push(note);
                    }
                    parsed.value
                }
                None => passthrough(cell),
            };
            fields.insert(column.clone(), value);
        }

        let key = self.record_key.as_ref().and_then(|key_column| {
            fields
                .get(key_column)
                .filter(|v| v.is_present())
                .map(FieldValue::render)
        });

        NormalizedRecord {
            id: RecordId { row: raw.row, key },
            fields,
            notes,
        }
    }

    fn parse(&self, column: &str, field_type: FieldType, cell: &CellValue) -> Parsed {
        if let (FieldType::Money, CellValue::Text(text)) = (field_type, cell) {
            let (parsed, locale) = parsers::parse_money_with_locale(text);
            tracing::trace!(column, raw = %text, ?locale, "amount locale inferred");
            return parsed;
        }
        parsers::parse_cell(field_type, cell)
    }
}

fn passthrough(cell: &CellValue) -> FieldValue {
    match cell {
        CellValue::Empty => FieldValue::Missing,
        CellValue::Text(s) => FieldValue::Text(s.clone()),
        CellValue::Number(_) => FieldValue::Text(cell.raw_text()),
    }
}

fn note_for(column: &str, cell: &CellValue, parsed: &Parsed) -> Option<TransformationNote> {
    match &parsed.value {
        FieldValue::Invalid { reason, .. } => Some(TransformationNote {
            column: column.to_string(),
            original: cell.raw_text(),
            normalized: String::new(),
            corrected: false,
            reason: Some(*reason),
        }),
        value if parsed.corrected => Some(TransformationNote {
            column: column.to_string(),
            original: cell.raw_text(),
            normalized: value.render(),
            corrected: true,
            reason: None,
        }),
        _ => None,
    }
}
