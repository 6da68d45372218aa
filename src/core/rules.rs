//! 規則引擎：對單筆正規化記錄逐條執行宣告式規則。
//!
//! 規則本身是資料（來自設定檔），引擎只負責解讀 [`RuleCheck`] 的幾種形狀。
//! 依宣告順序執行，不會短路，一筆記錄可以累積多個 [`Finding`]。

use crate::domain::model::{FieldType, FieldValue, Finding, NormalizedRecord, Severity};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const MANDATORY_RULE_ID: &str = "mandatory-field";
const MANDATORY_MESSAGE: &str = "Campo obrigatório vazio ou inválido: {column}";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(column|value|flag|limit)\}").expect("valid placeholder regex")
});

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub severity: Severity,
    /// 訊息樣板，可用 `{column}`、`{value}`、`{flag}`、`{limit}`
    pub message: String,
    #[serde(flatten)]
    pub check: RuleCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// 欄位必須有值
    Required { columns: Vec<String> },
    /// 旗標等於 `equals` 時，欄位必須有值
    RequiredWhenFlag {
        flag: String,
        #[serde(default = "default_true")]
        equals: bool,
        columns: Vec<String>,
    },
    /// 旗標不是「是」時，欄位不應該有值
    AbsentUnlessFlag { flag: String, columns: Vec<String> },
    /// 日期不得晚於 cutoff（未設定時使用執行日）
    NotAfter {
        column: String,
        #[serde(default)]
        cutoff: Option<NaiveDate>,
    },
    /// `later` 不得早於 `earlier`
    DateOrder { earlier: String, later: String },
    NonNegative { columns: Vec<String> },
    Ceiling { column: String, max: Decimal },
}

impl RuleCheck {
    /// 規則引用的欄位以及各欄位需要的型別（`None` 表示任何型別皆可）
    pub fn referenced_columns(&self) -> Vec<(&str, Option<FieldType>)> {
        match self {
            RuleCheck::Required { columns } => columns.iter().map(|c| (c.as_str(), None)).collect(),
            RuleCheck::RequiredWhenFlag { flag, columns, .. }
            | RuleCheck::AbsentUnlessFlag { flag, columns } => {
                std::iter::once((flag.as_str(), Some(FieldType::Flag)))
                    .chain(columns.iter().map(|c| (c.as_str(), None)))
                    .collect()
            }
            RuleCheck::NotAfter { column, .. } => vec![(column.as_str(), Some(FieldType::Date))],
            RuleCheck::DateOrder { earlier, later } => vec![
                (earlier.as_str(), Some(FieldType::Date)),
                (later.as_str(), Some(FieldType::Date)),
            ],
            RuleCheck::NonNegative { columns } => columns
                .iter()
                .map(|c| (c.as_str(), Some(FieldType::Money)))
                .collect(),
            RuleCheck::Ceiling { column, .. } => vec![(column.as_str(), Some(FieldType::Money))],
        }
    }
}

/// 整批共用的評估參數，批次開始時決定一次
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext {
    pub reference_date: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<RuleDefinition>,
}

impl RuleEngine {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self { rules }
    }

    /// 必填欄位清單展開成一條隱含的 ERROR 規則，排在所有宣告規則之前
    pub fn with_mandatory_fields(mandatory: &[String], rules: Vec<RuleDefinition>) -> Self {
        let mut all = Vec::with_capacity(rules.len() + 1);
        if !mandatory.is_empty() {
            all.push(RuleDefinition {
                id: MANDATORY_RULE_ID.to_string(),
                severity: Severity::Error,
                message: MANDATORY_MESSAGE.to_string(),
                check: RuleCheck::Required {
                    columns: mandatory.to_vec(),
                },
            });
        }
        all.extend(rules);
        Self { rules: all }
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub fn evaluate(&self, record: &NormalizedRecord, ctx: &EvaluationContext) -> Vec<Finding> {
        self.rules
            .iter()
            .flat_map(|rule| evaluate_rule(rule, record, ctx))
            .collect()
    }
}

struct Violation<'a> {
    columns: Vec<String>,
    column: &'a str,
    value: String,
    flag: Option<&'a str>,
    limit: Option<String>,
}

impl<'a> Violation<'a> {
    fn on(column: &'a str, value: &FieldValue) -> Self {
        Self {
            columns: vec![column.to_string()],
            column,
            value: value.render(),
            flag: None,
            limit: None,
        }
    }
}

fn evaluate_rule(
    rule: &RuleDefinition,
    record: &NormalizedRecord,
    ctx: &EvaluationContext,
) -> Vec<Finding> {
    let mut violations = Vec::new();

    match &rule.check {
        RuleCheck::Required { columns } => {
            for column in columns {
                let value = record.field(column);
                if !value.is_present() {
                    violations.push(Violation::on(column, value));
                }
            }
        }
        RuleCheck::RequiredWhenFlag {
            flag,
            equals,
            columns,
        } => {
            if record.field(flag).as_flag() == Some(*equals) {
                for column in columns {
                    let value = record.field(column);
                    if !value.is_present() {
                        let mut v = Violation::on(column, value);
                        v.columns.insert(0, flag.clone());
                        v.flag = Some(flag.as_str());
                        violations.push(v);
                    }
                }
            }
        }
        RuleCheck::AbsentUnlessFlag { flag, columns } => {
            if record.field(flag).as_flag() != Some(true) {
                for column in columns {
                    let value = record.field(column);
                    if value.is_present() {
                        let mut v = Violation::on(column, value);
                        v.columns.insert(0, flag.clone());
                        v.flag = Some(flag.as_str());
                        violations.push(v);
                    }
                }
            }
        }
        RuleCheck::NotAfter { column, cutoff } => {
            let limit = cutoff.unwrap_or(ctx.reference_date);
            let value = record.field(column);
            if value.as_date().is_some_and(|d| d > limit) {
                let mut v = Violation::on(column, value);
                v.limit = Some(limit.format("%Y-%m-%d").to_string());
                violations.push(v);
            }
        }
        RuleCheck::DateOrder { earlier, later } => {
            let start = record.field(earlier);
            let end = record.field(later);
            if let (Some(s), Some(e)) = (start.as_date(), end.as_date()) {
                if e < s {
                    let mut v = Violation::on(later, end);
                    v.columns = vec![earlier.clone(), later.clone()];
                    v.limit = Some(start.render());
                    violations.push(v);
                }
            }
        }
        RuleCheck::NonNegative { columns } => {
            for column in columns {
                let value = record.field(column);
                if value.as_money().is_some_and(|m| m.is_sign_negative() && !m.is_zero()) {
                    violations.push(Violation::on(column, value));
                }
            }
        }
        RuleCheck::Ceiling { column, max } => {
            let value = record.field(column);
            if value.as_money().is_some_and(|m| m > *max) {
                let mut v = Violation::on(column, value);
                v.limit = Some(max.to_string());
                violations.push(v);
            }
        }
    }

    violations
        .into_iter()
        .map(|v| Finding {
            rule_id: rule.id.clone(),
            severity: rule.severity,
            record: record.id.clone(),
            message: render_message(&rule.message, &v),
            columns: v.columns,
        })
        .collect()
}

/// 一次替換所有佔位符，代入的值不會再被展開
fn render_message(template: &str, v: &Violation<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "column" => v.column.to_string(),
            "value" => v.value.clone(),
            "flag" => v.flag.unwrap_or("").to_string(),
            _ => v.limit.clone().unwrap_or_default(),
        })
        .into_owned()
}
