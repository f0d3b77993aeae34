use regex::Regex;

/// Post-processing applied to recognized text before delivery.
///
/// The patterns are compiled once at construction:
///
/// - `newline_pattern`: runs of line breaks (`\n+`, tolerating `\r`)
/// - `space_pattern`: any remaining whitespace run (`\s+`)
pub struct ResultProcessor {
    newline_pattern: Regex,
    space_pattern: Regex,
}

impl ResultProcessor {
    pub fn new() -> Self {
        Self {
            newline_pattern: Regex::new(r"[\r\n]+").expect("Invalid newline regex"),
            space_pattern: Regex::new(r"\s+").expect("Invalid whitespace regex"),
        }
    }

    /// Trim the text and, when `merge_paragraphs` is set, fold it into one line.
    ///
    /// Merging replaces every newline run and the whitespace around it with a single
    /// space, so `"line1\n\nline2\n line3"` becomes `"line1 line2 line3"`.
    pub fn process(&self, text: &str, merge_paragraphs: bool) -> String {
        if !merge_paragraphs {
            return text.trim().to_string();
        }

        let joined = self.newline_pattern.replace_all(text, " ");
        let collapsed = self.space_pattern.replace_all(&joined, " ");
        collapsed.trim().to_string()
    }

    /// True when the text has no visible characters.
    pub fn is_blank(text: &str) -> bool {
        text.trim().is_empty()
    }
}

impl Default for ResultProcessor {
    fn default() -> Self {
        Self::new()
    }
}
