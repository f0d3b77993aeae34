use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Language codes offered by default, in display order.
pub const KNOWN_LANGUAGES: [&str; 5] = ["chi_sim", "eng", "chi_tra", "jpn", "kor"];

/// Language used when the set ends up empty.
pub const FALLBACK_LANGUAGE: &str = "eng";

/// User configuration persisted to `config.json`.
///
/// Keys are camelCase on disk so files written by earlier releases keep loading. Every
/// field carries a serde default, so a partial or older file is backfilled on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_shortcut")]
    pub shortcut: String,

    /// `+`-joined language spec handed to the OCR engine, e.g. `chi_sim+eng`
    #[serde(default = "default_language")]
    pub language: String,

    /// Language set in insertion order; always consistent with `language`
    #[serde(default = "default_languages")]
    pub languages: IndexMap<String, bool>,

    #[serde(default = "default_true")]
    pub auto_clipboard: bool,

    #[serde(default = "default_true")]
    pub show_notification: bool,

    #[serde(default = "default_true")]
    pub show_main_window_on_start: bool,

    #[serde(default, alias = "mergeTextParagraphs")]
    pub merge_paragraphs: bool,

    /// Override for the bundled `tessdata` directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tessdata_dir: Option<String>,

    /// Explicit path to the `tesseract` binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tesseract_path: Option<String>,

    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shortcut: default_shortcut(),
            language: default_language(),
            languages: default_languages(),
            auto_clipboard: true,
            show_notification: true,
            show_main_window_on_start: true,
            merge_paragraphs: false,
            tessdata_dir: None,
            tesseract_path: None,
            ocr_timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

fn default_shortcut() -> String {
    if cfg!(target_os = "macos") {
        "Shift+Command+E".to_string()
    } else {
        "Shift+Ctrl+E".to_string()
    }
}

fn default_language() -> String {
    "chi_sim+eng".to_string()
}

fn default_languages() -> IndexMap<String, bool> {
    KNOWN_LANGUAGES
        .iter()
        .map(|code| (code.to_string(), matches!(*code, "chi_sim" | "eng")))
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_ocr_timeout_secs() -> u64 {
    60
}

/// A settings update where every field is optional.
///
/// Only the fields present are merged onto the current [`Config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    pub shortcut: Option<String>,
    pub language: Option<String>,
    pub languages: Option<IndexMap<String, bool>>,
    pub auto_clipboard: Option<bool>,
    pub show_notification: Option<bool>,
    pub show_main_window_on_start: Option<bool>,
    #[serde(alias = "mergeTextParagraphs")]
    pub merge_paragraphs: Option<bool>,
    pub tessdata_dir: Option<String>,
    pub tesseract_path: Option<String>,
    pub ocr_timeout_secs: Option<u64>,
}

impl Config {
    /// Build a config from a parsed JSON document, backfilling missing fields.
    ///
    /// A document with only one of `language` / `languages` gets the other derived from it.
    /// Returns `None` when the document is not a JSON object or a field has the wrong type.
    pub fn from_value(value: Value) -> Option<Self> {
        let obj = value.as_object()?;
        let has_language = obj.get("language").is_some_and(Value::is_string);
        let has_languages = obj.get("languages").is_some_and(Value::is_object);

        let mut config: Config = serde_json::from_value(value).ok()?;

        if has_language && !has_languages {
            config.languages = languages_from_spec(&config.language);
        }
        config.normalize();
        Some(config)
    }

    /// Re-derive `language` from `languages`, so the two always agree.
    ///
    /// An empty or all-disabled set falls back to [`FALLBACK_LANGUAGE`].
    pub fn normalize(&mut self) {
        self.shortcut = self.shortcut.trim().to_string();
        if self.shortcut.is_empty() {
            self.shortcut = default_shortcut();
        }

        if !self.languages.values().any(|enabled| *enabled) {
            self.languages.insert(FALLBACK_LANGUAGE.to_string(), true);
        }
        self.language = language_spec(&self.languages);

        if self.ocr_timeout_secs == 0 {
            self.ocr_timeout_secs = default_ocr_timeout_secs();
        }
    }

    /// Merge a partial update onto this config and restore consistency.
    ///
    /// When the update carries a language string but no language set, the set is rebuilt
    /// from the string; otherwise the set wins and the string is re-derived.
    pub fn merge(&mut self, partial: PartialConfig) {
        if let Some(shortcut) = partial.shortcut {
            self.shortcut = shortcut;
        }
        match (partial.language, partial.languages) {
            (_, Some(languages)) => self.languages = languages,
            (Some(language), None) => self.languages = languages_from_spec(&language),
            (None, None) => {}
        }
        if let Some(v) = partial.auto_clipboard {
            self.auto_clipboard = v;
        }
        if let Some(v) = partial.show_notification {
            self.show_notification = v;
        }
        if let Some(v) = partial.show_main_window_on_start {
            self.show_main_window_on_start = v;
        }
        if let Some(v) = partial.merge_paragraphs {
            self.merge_paragraphs = v;
        }
        if let Some(dir) = partial.tessdata_dir {
            self.tessdata_dir = (!dir.trim().is_empty()).then_some(dir);
        }
        if let Some(path) = partial.tesseract_path {
            self.tesseract_path = (!path.trim().is_empty()).then_some(path);
        }
        if let Some(v) = partial.ocr_timeout_secs {
            self.ocr_timeout_secs = v;
        }
        self.normalize();
    }

    /// Enabled language codes in insertion order.
    pub fn enabled_languages(&self) -> Vec<&str> {
        self.languages
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(code, _)| code.as_str())
            .collect()
    }
}

impl PartialConfig {
    /// Build an update that sets one field from a command-line `key value` pair.
    ///
    /// `key` is the on-disk (camelCase) name. `value` is read as JSON when it parses,
    /// otherwise as a plain string, so `true`, `30`, and `Shift+Ctrl+E` all work.
    /// Returns `None` for an unknown key or a value of the wrong type.
    pub fn from_setting(key: &str, value: &str) -> Option<Self> {
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));

        let mut doc = serde_json::Map::new();
        doc.insert(key.to_string(), value);

        let partial: PartialConfig = serde_json::from_value(Value::Object(doc)).ok()?;
        (partial != PartialConfig::default()).then_some(partial)
    }
}

/// Join the enabled codes of a language set with `+`.
pub fn language_spec(languages: &IndexMap<String, bool>) -> String {
    let codes: Vec<&str> = languages
        .iter()
        .filter(|(_, enabled)| **enabled)
        .map(|(code, _)| code.as_str())
        .collect();
    if codes.is_empty() {
        FALLBACK_LANGUAGE.to_string()
    } else {
        codes.join("+")
    }
}

/// Build a language set from a `+`-joined spec.
///
/// The known languages keep their default order with membership taken from the spec;
/// codes outside [`KNOWN_LANGUAGES`] are appended, enabled, in spec order.
pub fn languages_from_spec(spec: &str) -> IndexMap<String, bool> {
    let requested: Vec<&str> = spec
        .split('+')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .collect();

    let mut languages: IndexMap<String, bool> = KNOWN_LANGUAGES
        .iter()
        .map(|code| (code.to_string(), requested.contains(code)))
        .collect();

    for code in requested {
        languages.entry(code.to_string()).or_insert(true);
    }
    languages
}
