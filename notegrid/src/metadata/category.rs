use serde::{Deserialize, Serialize};

use crate::codes::DetectedCode;
use crate::models::ColorName;

const KEYWORD_CATEGORIES: &[(&[&str], &str)] = &[
    (&["work", "business", "office"], "work"),
    (&["urgent", "priority", "asap"], "urgent"),
    (&["personal", "home", "family"], "personal"),
    (&["idea", "brainstorm", "creative"], "ideas"),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeCategory {
    pub qr_data: String,
    pub color_name: ColorName,
    pub suggested_category: String,
    pub confidence: f64,
}

pub fn color_category(color: ColorName) -> &'static str {
    match color {
        ColorName::Pink => "urgent",
        ColorName::Blue => "work",
        ColorName::Green => "personal",
        ColorName::Orange => "ideas",
        ColorName::White => "notes",
        ColorName::Gray => "archive",
        ColorName::Yellow | ColorName::Unknown => "general",
    }
}

/// Category from the payload keywords, falling back to the note color.
pub fn suggest_category(payload: &str, background: ColorName) -> &'static str {
    let payload = payload.to_lowercase();
    KEYWORD_CATEGORIES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| payload.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or_else(|| color_category(background))
}

pub fn associate_codes(codes: &[DetectedCode], background: ColorName) -> Vec<CodeCategory> {
    let confidence = if background == ColorName::Unknown { 0.5 } else { 0.8 };
    codes
        .iter()
        .map(|code| CodeCategory {
            qr_data: code.data.clone(),
            color_name: background,
            suggested_category: suggest_category(&code.data, background).to_string(),
            confidence,
        })
        .collect()
}
