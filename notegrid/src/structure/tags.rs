use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimpleTag {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValueTag {
    pub key: String,
    pub value: String,
    pub line: usize,
}

static SIMPLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([a-zA-Z0-9_]+)\b").unwrap());
static KEY_VALUE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"::([a-zA-Z0-9_]+):([^\s:]+)").unwrap());

/// `@name` and `::key:value` tags, each kept once at the first line it appears on.
pub fn extract_tags(lines: &[&str]) -> (Vec<SimpleTag>, Vec<KeyValueTag>) {
    let mut simple: Vec<SimpleTag> = Vec::new();
    let mut key_value: Vec<KeyValueTag> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        for captures in SIMPLE_TAG.captures_iter(line) {
            let name = &captures[1];
            if !simple.iter().any(|tag| tag.name == name) {
                simple.push(SimpleTag {
                    name: name.to_string(),
                    line: i + 1,
                });
            }
        }

        for captures in KEY_VALUE_TAG.captures_iter(line) {
            let (key, value) = (&captures[1], &captures[2]);
            if !key_value.iter().any(|tag| tag.key == key && tag.value == value) {
                key_value.push(KeyValueTag {
                    key: key.to_string(),
                    value: value.to_string(),
                    line: i + 1,
                });
            }
        }
    }

    (simple, key_value)
}
