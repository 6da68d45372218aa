use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\-/]+").expect("valid separator regex"));
static SYMBOLS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9 ]+").expect("valid symbol regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid space regex"));

/// 去除葡萄牙文/西文常見的變音符號
fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// 欄位名稱正規化：小寫、去變音、分隔符號轉空白、去符號、壓縮空白。
///
/// `"Data de Emissão"` → `"data de emissao"`，`"TED/Devolvida"` → `"ted devolvida"`
pub fn canonical_column(name: &str) -> String {
    let folded: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(fold_diacritic)
        .collect();
    let spaced = SEPARATORS.replace_all(&folded, " ");
    let cleaned = SYMBOLS.replace_all(&spaced, "");
    SPACES.replace_all(&cleaned, " ").trim().to_string()
}

/// 表頭別名對照：正規化名稱 → 內部標準欄位名稱
#[derive(Debug, Clone, Default)]
pub struct ColumnAliases {
    by_canonical: HashMap<String, String>,
}

impl ColumnAliases {
    pub fn new(aliases: &HashMap<String, String>) -> Self {
        let by_canonical = aliases
            .iter()
            .map(|(alias, standard)| (canonical_column(alias), standard.clone()))
            .collect();
        Self { by_canonical }
    }

    /// 找不到別名時保留去除前後空白的原始名稱
    pub fn resolve(&self, header: &str) -> String {
        self.by_canonical
            .get(&canonical_column(header))
            .cloned()
            .unwrap_or_else(|| header.trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.by_canonical.is_empty()
    }
}
