//! 欄位解析器：把含糊的原始儲存格值轉成標準型別值。
//!
//! 所有函式都是純函式，不會 panic，永遠回傳一個 [`FieldValue`]。
//! `corrected` 表示原始文字與標準輸出格式不同（例如去空白、去幣別符號、
//! 日期改寫成 ISO），完全符合標準格式時為 `false`。

use crate::domain::model::{CellValue, FieldType, FieldValue, InvalidReason};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use std::sync::LazyLock;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2199;

const AFFIRMATIVE: &[&str] = &["SIM", "S", "YES", "Y", "TRUE", "1"];
const NEGATIVE: &[&str] = &["NÃO", "NAO", "N", "NO", "FALSE", "0"];

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4})([-/])(\d{1,2})([-/])(\d{1,2})(?:\D|$)").expect("valid ISO date regex")
});

static DMY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{1,2})([-/.])(\d{1,2})([-/.])(\d{4})(?:\D|$)").expect("valid D/M/Y regex")
});

static CURRENCY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:R\$|US\$|BRL|USD|EUR|[$€£])").expect("valid currency prefix regex")
});

static CURRENCY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:R\$|US\$|BRL|USD|EUR|[$€£])$").expect("valid currency suffix regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub value: FieldValue,
    pub corrected: bool,
}

impl Parsed {
    fn missing(raw: &str) -> Self {
        // 只有空白的儲存格也算是被清理過
        Self {
            value: FieldValue::Missing,
            corrected: !raw.is_empty(),
        }
    }

    fn invalid(raw: &str, reason: InvalidReason) -> Self {
        Self {
            value: FieldValue::Invalid {
                raw: raw.to_string(),
                reason,
            },
            corrected: false,
        }
    }

    fn valid(raw: &str, value: FieldValue) -> Self {
        let corrected = raw != value.render();
        Self { value, corrected }
    }
}

/// 金額字串推斷出來的地區格式，只在解析時使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountLocale {
    PtBr,
    EnUs,
}

/// 解析日期。
///
/// 支援 `DD/MM/YYYY`、`DD-MM-YYYY`、`DD.MM.YYYY`、`YYYY-MM-DD`（可帶 `T` 時間）以及前後夾雜雜訊的字串。
/// 第一組數字 > 12 時視為日在前；第二組 > 12 時視為月在前；兩者都 ≤ 12 時預設日在前。
pub fn parse_date(raw: &str) -> Parsed {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Parsed::missing(raw);
    }

    match extract_date(trimmed) {
        Some(date) => Parsed::valid(raw, FieldValue::Date(date)),
        None => Parsed::invalid(raw, InvalidReason::UnparseableDate),
    }
}

fn extract_date(s: &str) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(s) {
        if caps[2] == caps[4] {
            let year: i32 = caps[1].parse().ok()?;
            let month: u32 = caps[3].parse().ok()?;
            let day: u32 = caps[5].parse().ok()?;
            return sane_date(year, month, day);
        }
    }

    let caps = DMY_DATE.captures(s)?;
    if caps[2] != caps[4] {
        return None;
    }
    let first: u32 = caps[1].parse().ok()?;
    let second: u32 = caps[3].parse().ok()?;
    let year: i32 = caps[5].parse().ok()?;

    let (day, month) = if first > 12 {
        (first, second)
    } else if second > 12 {
        (second, first)
    } else {
        (first, second)
    };
    sane_date(year, month, day)
}

fn sane_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// 解析金額。
///
/// 同時出現 `.` 與 `,` 時，最右邊的是小數點；只出現一種時，僅在出現一次且後面剛好兩位數字時
/// 視為小數點，否則視為千分位（千分位必須切出三位數的群組）。支援 `-` 與括號表示的負數。
/// 幣別符號只能出現在數字前後。
pub fn parse_money(raw: &str) -> Parsed {
    parse_money_with_locale(raw).0
}

pub fn parse_money_with_locale(raw: &str) -> (Parsed, Option<AmountLocale>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (Parsed::missing(raw), None);
    }

    match split_amount(trimmed) {
        Some((amount, locale)) => (Parsed::valid(raw, FieldValue::Money(amount)), locale),
        None => (Parsed::invalid(raw, InvalidReason::UnparseableAmount), None),
    }
}

fn split_amount(s: &str) -> Option<(Decimal, Option<AmountLocale>)> {
    let mut body = strip_currency(s);

    let mut negative = false;
    if let Some(inner) = body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        negative = true;
        body = strip_currency(inner);
    }
    if let Some(rest) = body.strip_prefix('-') {
        if negative {
            return None;
        }
        negative = true;
        body = strip_currency(rest);
    } else if let Some(rest) = body.strip_prefix('+') {
        body = strip_currency(rest);
    }

    let grouped = join_space_groups(body)?;
    let body = grouped.as_str();

    if body.is_empty()
        || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        || !body.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }

    let last_dot = body.rfind('.');
    let last_comma = body.rfind(',');

    let (integer, fraction, locale) = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal_sep, thousands_sep, locale) = if comma > dot {
                (',', '.', AmountLocale::PtBr)
            } else {
                ('.', ',', AmountLocale::EnUs)
            };
            let (int_part, frac_part) = body.rsplit_once(decimal_sep)?;
            if int_part.contains(decimal_sep) {
                return None;
            }
            (ungroup(int_part, thousands_sep)?, frac_part, Some(locale))
        }
        (Some(_), None) => single_separator(body, '.')?,
        (None, Some(_)) => single_separator(body, ',')?,
        (None, None) => (body.to_string(), "", None),
    };

    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let literal = if fraction.is_empty() {
        integer
    } else {
        format!("{}.{}", if integer.is_empty() { "0" } else { integer.as_str() }, fraction)
    };
    let mut amount = Decimal::from_str(&literal).ok()?;
    if negative {
        amount = -amount;
    }
    Some((to_cents(amount)?, locale))
}

/// 去掉頭尾的幣別符號與空白（含 NBSP），數字中間的符號不動
fn strip_currency(s: &str) -> &str {
    let mut s = s.trim();
    loop {
        let before = s.len();
        if let Some(m) = CURRENCY_PREFIX.find(s) {
            s = s[m.end()..].trim_start();
        }
        if let Some(m) = CURRENCY_SUFFIX.find(s) {
            s = s[..m.start()].trim_end();
        }
        if s.len() == before {
            return s;
        }
    }
}

/// 以空白分隔的千分位（`1 234,56`）併回一個數字；空白只能出現在三位數群組之間
fn join_space_groups(body: &str) -> Option<String> {
    if !body.contains(char::is_whitespace) {
        return Some(body.to_string());
    }

    let parts: Vec<&str> = body.split(char::is_whitespace).collect();
    let last = parts.len() - 1;
    for (index, part) in parts.iter().enumerate() {
        let leading_digits = part.chars().take_while(char::is_ascii_digit).count();
        let ok = if index == 0 {
            (1..=3).contains(&leading_digits) && leading_digits == part.len()
        } else if index == last {
            leading_digits == 3
        } else {
            leading_digits == 3 && part.len() == 3
        };
        if !ok {
            return None;
        }
    }
    Some(parts.concat())
}

fn single_separator(body: &str, sep: char) -> Option<(String, &str, Option<AmountLocale>)> {
    let occurrences = body.matches(sep).count();
    let (int_part, tail) = body.rsplit_once(sep)?;
    let decimal_locale = if sep == ',' {
        AmountLocale::PtBr
    } else {
        AmountLocale::EnUs
    };

    if occurrences == 1 && tail.len() == 2 {
        return Some((int_part.to_string(), tail, Some(decimal_locale)));
    }

    let thousands_locale = if sep == '.' {
        AmountLocale::PtBr
    } else {
        AmountLocale::EnUs
    };
    Some((ungroup(body, sep)?, "", Some(thousands_locale)))
}

/// 移除千分位；第一組 1–3 位數，其餘每組剛好 3 位數
fn ungroup(int_part: &str, sep: char) -> Option<String> {
    if !int_part.contains(sep) {
        return Some(int_part.to_string());
    }

    let mut groups = int_part.split(sep);
    let head = groups.next()?;
    if head.is_empty() || head.len() > 3 {
        return None;
    }

    let mut digits = head.to_string();
    for group in groups {
        if group.len() != 3 {
            return None;
        }
        digits.push_str(group);
    }
    Some(digits)
}

/// 四捨五入到分；位數太多、無法保留兩位小數的金額回傳 `None`
fn to_cents(amount: Decimal) -> Option<Decimal> {
    let mut cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    cents.rescale(2);
    if cents.scale() != 2 {
        return None;
    }
    if cents.is_zero() {
        cents.set_sign_positive(true);
    }
    Some(cents)
}

/// 解析是/否旗標（不分大小寫、去除前後空白）。空白為 `Missing`，無法辨識的字為 `Invalid`。
pub fn parse_flag(raw: &str) -> Parsed {
    let token = raw.trim().to_uppercase();
    if token.is_empty() {
        return Parsed::missing(raw);
    }

    if AFFIRMATIVE.contains(&token.as_str()) {
        Parsed::valid(raw, FieldValue::Flag(true))
    } else if NEGATIVE.contains(&token.as_str()) {
        Parsed::valid(raw, FieldValue::Flag(false))
    } else {
        Parsed::invalid(raw, InvalidReason::UnknownFlagToken)
    }
}

pub fn parse_text(raw: &str) -> Parsed {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Parsed::missing(raw);
    }
    Parsed::valid(raw, FieldValue::Text(trimmed.to_string()))
}

/// 依欄位型別解析單一儲存格；數值儲存格依型別特別處理
pub fn parse_cell(field_type: FieldType, cell: &CellValue) -> Parsed {
    match (field_type, cell) {
        (_, CellValue::Empty) => Parsed::missing(""),
        (FieldType::Money, CellValue::Number(n)) => {
            let raw = cell.raw_text();
            match Decimal::from_f64(*n).and_then(to_cents) {
                Some(amount) => Parsed::valid(&raw, FieldValue::Money(amount)),
                None => Parsed::invalid(&raw, InvalidReason::UnparseableAmount),
            }
        }
        (FieldType::Date, CellValue::Number(_)) => {
            Parsed::invalid(&cell.raw_text(), InvalidReason::UnparseableDate)
        }
        (FieldType::Date, CellValue::Text(s)) => parse_date(s),
        (FieldType::Money, CellValue::Text(s)) => parse_money(s),
        (FieldType::Flag, _) => parse_flag(&cell.raw_text()),
        (FieldType::Text, _) => parse_text(&cell.raw_text()),
    }
}
