use once_cell::sync::Lazy;
use regex::Regex;

static HORIZONTAL_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
// `::key:value` tags keep the space in front of their double colon.
static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" +([.,!?;]|:(?:[^:]|$))").unwrap());
static MISSING_SPACE_AFTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([,;!?])(\p{L})").unwrap());
static MISSING_SPACE_AFTER_STOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(\p{Lu})").unwrap());
static EXTRA_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static FORMAT_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^##.*?##").unwrap());
static FORMAT_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[•●○◦▪▫■□\-*+]\s+").unwrap());
static FORMAT_NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s+").unwrap());
static FORMAT_CHECKBOX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[[\s?xX✓✔]\]").unwrap());

/// Cleans whitespace, punctuation spacing, hyphenation and quote glyphs.
///
/// Applying it twice gives the same result as applying it once.
pub fn normalize_text(text: &str) -> String {
    let text = text
        .replace('\r', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let lines: Vec<String> = text
        .split('\n')
        .map(|line| HORIZONTAL_RUNS.replace_all(line, " ").trim().to_string())
        .collect();
    let lines = join_hyphenated(lines);

    let lines: Vec<String> = lines
        .into_iter()
        .map(|line| {
            let line = SPACE_BEFORE_PUNCT.replace_all(&line, "$1");
            let line = MISSING_SPACE_AFTER.replace_all(&line, "$1 $2");
            MISSING_SPACE_AFTER_STOP
                .replace_all(&line, ". $1")
                .into_owned()
        })
        .collect();

    let joined = lines.join("\n");
    EXTRA_BLANK_LINES
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Merges `word-` at a line end with a following line that starts lowercase.
fn join_hyphenated(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());

    for line in lines {
        let merge = match out.last() {
            Some(previous) => ends_with_word_hyphen(previous) && starts_lowercase(&line),
            None => false,
        };
        match (merge, out.last_mut()) {
            (true, Some(previous)) => {
                previous.pop();
                previous.push_str(&line);
            }
            _ => out.push(line),
        }
    }

    out
}

fn ends_with_word_hyphen(line: &str) -> bool {
    let mut chars = line.chars().rev();
    matches!((chars.next(), chars.next()), (Some('-'), Some(c)) if c.is_alphabetic())
}

fn starts_lowercase(line: &str) -> bool {
    line.chars().next().map(char::is_lowercase).unwrap_or(false)
}

/// Light markdown pass: one bullet glyph, two checkbox glyphs; title and
/// numbered lines are left alone.
pub fn format_markdown(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if FORMAT_TITLE.is_match(line) || FORMAT_NUMBERED.is_match(line) {
                return line.to_string();
            }
            if FORMAT_BULLET.is_match(line) {
                return FORMAT_BULLET.replace(line, "• ").into_owned();
            }
            if let Some(marker) = FORMAT_CHECKBOX.find(line) {
                let checked = matches!(
                    marker.as_str().trim(),
                    "[x]" | "[X]" | "[✓]" | "[✔]"
                );
                let glyph = if checked { "☑" } else { "☐" };
                return FORMAT_CHECKBOX.replace(line, glyph).into_owned();
            }
            line.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
