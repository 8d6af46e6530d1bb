use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TitleFormat {
    DoubleHash,
    Hash,
    Equals,
    Underlined,
    AllCaps,
    Brackets,
    FirstLine,
}

impl TitleFormat {
    pub fn confidence(&self) -> f64 {
        match self {
            TitleFormat::DoubleHash | TitleFormat::Hash | TitleFormat::Equals => 1.0,
            TitleFormat::Underlined => 0.8,
            TitleFormat::AllCaps => 0.7,
            TitleFormat::Brackets => 0.6,
            TitleFormat::FirstLine => 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Title {
    pub text: String,
    pub format: TitleFormat,
    /// 1-based source line.
    pub line: usize,
    pub confidence: f64,
}

static DELIMITED_TITLES: Lazy<Vec<(TitleFormat, Regex)>> = Lazy::new(|| {
    vec![
        (TitleFormat::DoubleHash, Regex::new(r"##\s*(.+?)\s*##").unwrap()),
        (TitleFormat::Hash, Regex::new(r"#\s*(.+?)\s*#").unwrap()),
        (TitleFormat::Equals, Regex::new(r"=+\s*(.+?)\s*=+").unwrap()),
    ]
});

/// Heuristic tiers only look this far down the note.
const HEURISTIC_LINES: usize = 3;

pub fn extract_title(text: &str) -> Option<Title> {
    let lines: Vec<&str> = text.split('\n').collect();

    for (format, pattern) in DELIMITED_TITLES.iter() {
        let Some(captures) = pattern.captures(text) else {
            continue;
        };
        let title_text = captures[1].trim().to_string();
        if let Some(index) = lines.iter().position(|line| line.contains(&title_text)) {
            return Some(Title {
                text: title_text,
                format: *format,
                line: index + 1,
                confidence: format.confidence(),
            });
        }
    }

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| (i, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .take(HEURISTIC_LINES)
        .find_map(|(i, line)| heuristic_title(line).map(|(text, format)| Title {
            text,
            format,
            line: i + 1,
            confidence: format.confidence(),
        }))
}

fn heuristic_title(line: &str) -> Option<(String, TitleFormat)> {
    let len = line.chars().count();

    if len >= 2 && line.starts_with('_') && line.ends_with('_') {
        return Some((strip_wrapping(line), TitleFormat::Underlined));
    }

    if len > 3 && is_all_caps(line) {
        return Some((title_case(line), TitleFormat::AllCaps));
    }

    let bracketed = (line.starts_with('[') && line.ends_with(']'))
        || (line.starts_with('(') && line.ends_with(')'));
    if len >= 2 && bracketed {
        return Some((strip_wrapping(line), TitleFormat::Brackets));
    }

    if len > 3 {
        return Some((line.to_string(), TitleFormat::FirstLine));
    }

    None
}

fn strip_wrapping(line: &str) -> String {
    let mut chars = line.chars();
    chars.next();
    chars.next_back();
    chars.as_str().trim().to_string()
}

fn is_all_caps(line: &str) -> bool {
    line.chars().any(char::is_uppercase) && !line.chars().any(char::is_lowercase)
}

fn title_case(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut previous_alpha = false;
    for c in line.chars() {
        if c.is_alphabetic() {
            if previous_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(c);
            previous_alpha = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_hash_title_anywhere() {
        let title = extract_title("note\n## Groceries ##\n- milk").unwrap();
        assert_eq!(title.text, "Groceries");
        assert_eq!(title.format, TitleFormat::DoubleHash);
        assert_eq!(title.line, 2);
        assert_eq!(title.confidence, 1.0);
    }

    #[test]
    fn test_equals_title() {
        let title = extract_title("== Plan ==\nstuff").unwrap();
        assert_eq!(title.text, "Plan");
        assert_eq!(title.format, TitleFormat::Equals);
    }

    #[test]
    fn test_heuristic_tiers() {
        let underlined = extract_title("_Weekly sync_\nnotes").unwrap();
        assert_eq!(underlined.text, "Weekly sync");
        assert_eq!(underlined.confidence, 0.8);

        let caps = extract_title("\n\nSHOPPING LIST\neggs").unwrap();
        assert_eq!(caps.text, "Shopping List");
        assert_eq!(caps.format, TitleFormat::AllCaps);
        assert_eq!(caps.line, 3);

        let bracketed = extract_title("(ideas)\nmore").unwrap();
        assert_eq!(bracketed.text, "ideas");
        assert_eq!(bracketed.confidence, 0.6);

        let first = extract_title("call the plumber\ntomorrow").unwrap();
        assert_eq!(first.format, TitleFormat::FirstLine);
        assert_eq!(first.confidence, 0.5);
    }

    #[test]
    fn test_short_lines_have_no_title() {
        assert!(extract_title("ok\nno\nhi").is_none());
        assert!(extract_title("").is_none());
    }
}
