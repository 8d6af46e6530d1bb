//! Structure recognition over extracted note text.
//!
//! Everything here is a pure function of the input text: titles, bulleted and
//! numbered lists, todo items, `@tag` / `::key:value` tags and the leftover
//! paragraphs.

mod lists;
mod tags;
mod title;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::framework::{SharedSink, StageResult};

pub use lists::{
    extract_bulleted_lists, extract_numbered_lists, extract_todos, CheckboxStyle, ListItem,
    NumberedItem, TodoItem,
};
pub use tags::{extract_tags, KeyValueTag, SimpleTag};
pub use title::{extract_title, Title, TitleFormat};

pub(crate) use lists::{bullet_text, numbered_parts};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Title,
    BulletedList,
    NumberedList,
    TodoList,
    Paragraph,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionItem {
    pub text: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    #[serde(rename = "type")]
    pub kind: SectionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<SectionItem>,
    pub line_start: usize,
    pub line_end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TitleFormat>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentStructure {
    pub title: Option<Title>,
    pub sections: Vec<Section>,
    pub bulleted_lists: Vec<Vec<ListItem>>,
    pub numbered_lists: Vec<Vec<NumberedItem>>,
    pub todos: Vec<TodoItem>,
    pub simple_tags: Vec<SimpleTag>,
    pub key_value_tags: Vec<KeyValueTag>,
    pub has_title: bool,
    pub has_lists: bool,
    pub has_todos: bool,
    pub has_tags: bool,
}

impl DocumentStructure {
    pub fn tag_count(&self) -> usize {
        self.simple_tags.len() + self.key_value_tags.len()
    }
}

pub fn recognize_structure(text: &str) -> DocumentStructure {
    let lines: Vec<&str> = text.split('\n').collect();

    let title = extract_title(text);
    let bulleted_lists = extract_bulleted_lists(&lines);
    let numbered_lists = extract_numbered_lists(&lines);
    let todos = extract_todos(&lines);
    let (simple_tags, key_value_tags) = extract_tags(&lines);

    let sections = build_sections(
        &lines,
        title.as_ref(),
        &bulleted_lists,
        &numbered_lists,
        &todos,
    );

    DocumentStructure {
        has_title: title.is_some(),
        has_lists: !bulleted_lists.is_empty() || !numbered_lists.is_empty(),
        has_todos: !todos.is_empty(),
        has_tags: !simple_tags.is_empty() || !key_value_tags.is_empty(),
        title,
        sections,
        bulleted_lists,
        numbered_lists,
        todos,
        simple_tags,
        key_value_tags,
    }
}

fn build_sections(
    lines: &[&str],
    title: Option<&Title>,
    bulleted_lists: &[Vec<ListItem>],
    numbered_lists: &[Vec<NumberedItem>],
    todos: &[TodoItem],
) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut claimed = BTreeSet::new();

    if let Some(title) = title {
        claimed.insert(title.line);
        sections.push(Section {
            kind: SectionKind::Title,
            content: Some(title.text.clone()),
            items: Vec::new(),
            line_start: title.line,
            line_end: title.line,
            format: Some(title.format),
        });
    }

    for list in bulleted_lists {
        let (Some(first), Some(last)) = (list.first(), list.last()) else {
            continue;
        };
        claimed.extend(first.line..=last.line);
        sections.push(Section {
            kind: SectionKind::BulletedList,
            content: None,
            items: list
                .iter()
                .map(|item| SectionItem {
                    text: item.text.clone(),
                    line: item.line,
                    number: None,
                    completed: None,
                })
                .collect(),
            line_start: first.line,
            line_end: last.line,
            format: None,
        });
    }

    for list in numbered_lists {
        let (Some(first), Some(last)) = (list.first(), list.last()) else {
            continue;
        };
        claimed.extend(first.line..=last.line);
        sections.push(Section {
            kind: SectionKind::NumberedList,
            content: None,
            items: list
                .iter()
                .map(|item| SectionItem {
                    text: item.text.clone(),
                    line: item.line,
                    number: Some(item.number),
                    completed: None,
                })
                .collect(),
            line_start: first.line,
            line_end: last.line,
            format: None,
        });
    }

    if let (Some(first), Some(last)) = (todos.first(), todos.last()) {
        claimed.extend(todos.iter().map(|todo| todo.line));
        sections.push(Section {
            kind: SectionKind::TodoList,
            content: None,
            items: todos
                .iter()
                .map(|todo| SectionItem {
                    text: todo.text.clone(),
                    line: todo.line,
                    number: None,
                    completed: Some(todo.completed),
                })
                .collect(),
            line_start: first.line,
            line_end: last.line,
            format: None,
        });
    }

    let mut paragraph_start: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        let line_no = i + 1;
        let free = !claimed.contains(&line_no) && !line.trim().is_empty();
        match (free, paragraph_start) {
            (true, None) => paragraph_start = Some(line_no),
            (false, Some(start)) => {
                sections.push(paragraph(lines, start, i));
                paragraph_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = paragraph_start {
        sections.push(paragraph(lines, start, lines.len()));
    }

    sections
}

/// Paragraph over 1-based lines `start..=end`.
fn paragraph(lines: &[&str], start: usize, end: usize) -> Section {
    Section {
        kind: SectionKind::Paragraph,
        content: Some(lines[start - 1..end].join("\n")),
        items: Vec::new(),
        line_start: start,
        line_end: end,
        format: None,
    }
}

/// Stage wrapper that reports structure metrics.
#[derive(Clone)]
pub struct StructureRecognizer {
    sink: SharedSink,
}

impl StructureRecognizer {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    pub fn process(&self, text: &str) -> StageResult<DocumentStructure> {
        let structure = recognize_structure(text);

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        self.sink.record("structure", "has_title", flag(structure.has_title));
        self.sink.record("structure", "has_lists", flag(structure.has_lists));
        self.sink.record("structure", "has_todos", flag(structure.has_todos));
        self.sink.record("structure", "has_tags", flag(structure.has_tags));
        self.sink
            .record("structure", "total_todos", structure.todos.len() as f64);
        self.sink
            .record("structure", "total_tags", structure.tag_count() as f64);

        tracing::debug!(
            title = structure.title.as_ref().map(|t| t.text.as_str()).unwrap_or(""),
            sections = structure.sections.len(),
            todos = structure.todos.len(),
            tags = structure.tag_count(),
            "structure recognized"
        );

        Ok(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::noop_sink;
    use pretty_assertions::assert_eq;

    const NOTE: &str = "## Weekend ##\n- milk\n- eggs\n\n1. clean\n2. cook\n[ ] call mom\n[x] pay rent\nRemember the keys @home\n::due:friday";

    #[test]
    fn test_recognize_full_note() {
        let structure = recognize_structure(NOTE);

        assert_eq!(structure.title.as_ref().unwrap().text, "Weekend");
        assert_eq!(structure.bulleted_lists.len(), 1);
        assert_eq!(structure.numbered_lists[0].len(), 2);
        assert_eq!(structure.todos.len(), 2);
        assert_eq!(structure.simple_tags[0].name, "home");
        assert_eq!(structure.key_value_tags[0].value, "friday");
        assert!(structure.has_title && structure.has_lists && structure.has_todos && structure.has_tags);

        let kinds: Vec<SectionKind> = structure.sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Title,
                SectionKind::BulletedList,
                SectionKind::NumberedList,
                SectionKind::TodoList,
                SectionKind::Paragraph,
            ]
        );
        let paragraph = structure.sections.last().unwrap();
        assert_eq!(
            paragraph.content.as_deref(),
            Some("Remember the keys @home\n::due:friday")
        );
        assert_eq!((paragraph.line_start, paragraph.line_end), (9, 10));
    }

    #[test]
    fn test_recognition_is_deterministic() {
        assert_eq!(recognize_structure(NOTE), recognize_structure(NOTE));
    }

    #[test]
    fn test_paragraphs_split_on_claimed_and_blank_lines() {
        let structure = recognize_structure("first line here\nsecond\n\nthird para\n- item\nlast");
        let paragraphs: Vec<(usize, usize)> = structure
            .sections
            .iter()
            .filter(|s| s.kind == SectionKind::Paragraph)
            .map(|s| (s.line_start, s.line_end))
            .collect();
        assert_eq!(paragraphs, vec![(2, 2), (4, 4), (6, 6)]);
    }

    #[test]
    fn test_empty_text() {
        let structure = StructureRecognizer::new(noop_sink()).process("").unwrap();
        assert!(!structure.has_title);
        assert!(structure.sections.is_empty());
    }
}
