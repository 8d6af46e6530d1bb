use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListItem {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NumberedItem {
    pub number: u32,
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckboxStyle {
    Box,
    Unicode,
    Circle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    pub text: String,
    pub completed: bool,
    pub line: usize,
    pub checkbox_type: CheckboxStyle,
}

static BULLET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\s*[•●○◦▪▫■□]\s+(.+)$").unwrap(),
        Regex::new(r"^\s*[-*+]\s+(.+)$").unwrap(),
        Regex::new(r"^\s*>\s+(.+)$").unwrap(),
    ]
});

static NUMBERED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\s*(\d+)[.)]\s+(.+)$").unwrap(),
        Regex::new(r"^\s*\((\d+)\)\s+(.+)$").unwrap(),
        Regex::new(r"^\s*(\d+)\s*[-–—]\s*(.+)$").unwrap(),
    ]
});

static TODO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\[\s*\]|\[\?\]|\[[xX✓✔]\]|[☐☑○◉])\s+(.+)$").unwrap());

const CHECKED_MARKERS: &[&str] = &["[x]", "[X]", "[✓]", "[✔]", "☑", "◉"];

pub(crate) fn bullet_text(line: &str) -> Option<String> {
    BULLET_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(line))
        .map(|captures| captures[1].trim().to_string())
}

pub(crate) fn numbered_parts(line: &str) -> Option<(u32, String)> {
    NUMBERED_PATTERNS.iter().find_map(|pattern| {
        let captures = pattern.captures(line)?;
        let number = captures[1].parse().ok()?;
        Some((number, captures[2].trim().to_string()))
    })
}

/// Contiguous runs of bullet lines; any other line closes the run.
pub fn extract_bulleted_lists(lines: &[&str]) -> Vec<Vec<ListItem>> {
    let mut lists = Vec::new();
    let mut current: Vec<ListItem> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        match bullet_text(line) {
            Some(text) => current.push(ListItem { text, line: i + 1 }),
            None if !current.is_empty() => lists.push(std::mem::take(&mut current)),
            None => {}
        }
    }

    if !current.is_empty() {
        lists.push(current);
    }
    lists
}

/// Runs of numbered lines whose numbers increase by exactly one.
///
/// A number that breaks the sequence closes the current group and opens a
/// new one starting at the observed number.
pub fn extract_numbered_lists(lines: &[&str]) -> Vec<Vec<NumberedItem>> {
    let mut lists = Vec::new();
    let mut current: Vec<NumberedItem> = Vec::new();
    let mut expected = 1;

    for (i, line) in lines.iter().enumerate() {
        let Some((number, text)) = numbered_parts(line) else {
            if !current.is_empty() {
                lists.push(std::mem::take(&mut current));
            }
            expected = 1;
            continue;
        };

        if !current.is_empty() && number != expected {
            lists.push(std::mem::take(&mut current));
        }
        current.push(NumberedItem {
            number,
            text,
            line: i + 1,
        });
        expected = number.saturating_add(1);
    }

    if !current.is_empty() {
        lists.push(current);
    }
    lists
}

pub fn extract_todos(lines: &[&str]) -> Vec<TodoItem> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let captures = TODO_PATTERN.captures(line)?;
            let marker = captures.get(1)?.as_str();
            let checkbox_type = match marker {
                "☐" | "☑" => CheckboxStyle::Unicode,
                "○" | "◉" => CheckboxStyle::Circle,
                _ => CheckboxStyle::Box,
            };
            Some(TodoItem {
                text: captures[2].trim().to_string(),
                completed: CHECKED_MARKERS.contains(&marker),
                line: i + 1,
                checkbox_type,
            })
        })
        .collect()
}
