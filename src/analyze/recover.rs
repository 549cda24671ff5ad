//! Response recoverer: turns the service's free-form reply into an `AnalysisOutcome`.
//!
//! Strategies, in order, stopping at the first that yields data:
//! 1) top-level balanced `{...}` spans found by brace counting (prose around them is ignored)
//! 2) parse each in turn; on failure strip trailing commas and parse once more
//! 3) salvage: locate named sections (`grammarBreakdown`, category keys) and parse
//!    each one in isolation → `PartiallyRecovered`
//! 4) otherwise `Failed` with the raw reply kept for diagnostics
//!
//! `recover` never panics and never invents numbers: anything not present in the
//! reply is either a zero (inside a parsed object) or reported as missing.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::debug;

use crate::error::FailureReason;
use crate::model::{
    AnalysisOutcome, Category, CategoryTally, GrammarBreakdown, IssueCount, ViolationItem,
};

/// Name used for the grammar section in `missing` lists.
pub const GRAMMAR_SECTION: &str = "grammarBreakdown";

pub fn recover(raw: &str) -> AnalysisOutcome {
    let mut structural_error = None;

    for candidate in balanced_objects(raw) {
        match parse_object(candidate) {
            Ok(obj) => match Sections::from_object(&obj) {
                Some(sections) => {
                    debug!(target: "analysis", stage = "structural", "reply parsed");
                    return sections.into_success();
                }
                None => {
                    let reason = "JSON object has no recognised sections";
                    structural_error.get_or_insert_with(|| reason.to_string());
                }
            },
            Err(e) => {
                structural_error.get_or_insert_with(|| format!("JSON object not parseable: {e}"));
            }
        }
    }

    let salvaged = salvage(raw);
    if !salvaged.is_empty() {
        debug!(target: "analysis", stage = "salvage", "reply partially recovered");
        return salvaged.into_partial();
    }

    let reason = structural_error.unwrap_or_else(|| "no JSON object found in reply".to_string());
    debug!(target: "analysis", stage = "failed", %reason, "reply not recoverable");
    AnalysisOutcome::Failed {
        reason: FailureReason::MalformedResponse(reason),
        raw: raw.to_string(),
    }
}

// ------------------------------------------------------------
// Strategy 1: brace matching
// ------------------------------------------------------------

/// First top-level balanced JSON object in `text`. String literals and escapes
/// are respected, so braces inside strings do not count.
pub fn extract_balanced_object(text: &str) -> Option<&str> {
    balanced_span(text, b'{', b'}')
}

/// Successive top-level balanced objects, left to right. Scanning resumes
/// after each span; an unbalanced tail ends the sequence.
fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let (start, end) = balanced_range(rest, b'{', b'}')?;
        let span = &rest[start..end];
        rest = &rest[end..];
        Some(span)
    })
}

fn balanced_span(text: &str, open: u8, close: u8) -> Option<&str> {
    balanced_range(text, open, close).map(|(start, end)| &text[start..end])
}

/// Byte range of the first balanced `open`..`close` span.
fn balanced_range(text: &str, open: u8, close: u8) -> Option<(usize, usize)> {
    let start = text.find(open as char)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some((start, i + 1));
            }
        }
    }
    None
}

// ------------------------------------------------------------
// Strategy 2: parse + trailing-comma normalization
// ------------------------------------------------------------

/// Remove commas that directly precede `}` or `]` (outside string literals).
pub fn strip_trailing_commas(json: &str) -> Cow<'_, str> {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                changed = true;
                continue;
            }
        }
        out.push(c);
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(json)
    }
}

fn parse_value(fragment: &str) -> Result<Value, serde_json::Error> {
    match serde_json::from_str(fragment) {
        Ok(v) => Ok(v),
        Err(first) => match strip_trailing_commas(fragment) {
            Cow::Borrowed(_) => Err(first),
            Cow::Owned(fixed) => serde_json::from_str(&fixed),
        },
    }
}

fn parse_object(candidate: &str) -> Result<Map<String, Value>, serde_json::Error> {
    match parse_value(candidate)? {
        Value::Object(map) => Ok(map),
        // Unreachable for a `{...}` span, but keep the type honest.
        other => serde_json::from_value(other),
    }
}

// ------------------------------------------------------------
// Strategy 3: field-level salvage
// ------------------------------------------------------------

fn salvage(raw: &str) -> Sections {
    static RE_SECTION: OnceCell<Regex> = OnceCell::new();
    let re = RE_SECTION.get_or_init(|| {
        Regex::new(
            r#"(?i)"(grammar_?breakdown|grammar_?issues|general|psychology|captions|sales)"\s*:\s*[\{\[]"#,
        )
        .unwrap()
    });

    let mut sections = Sections::default();
    for caps in re.captures_iter(raw) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let rest = &raw[whole.end() - 1..];
        let fragment = if rest.starts_with('{') {
            balanced_span(rest, b'{', b'}')
        } else {
            balanced_span(rest, b'[', b']')
        };
        let Some(value) = fragment.and_then(|f| parse_value(f).ok()) else {
            debug!(target: "analysis", section = key.as_str(), "section not salvageable");
            continue;
        };
        sections.absorb(key.as_str(), &value);
    }
    sections
}

// ------------------------------------------------------------
// Normalization into the outcome model
// ------------------------------------------------------------

#[derive(Debug, Default)]
struct Sections {
    grammar: Option<GrammarBreakdown>,
    /// Reply order; a category appears at most once.
    categories: Vec<(Category, Vec<ViolationItem>)>,
}

impl Sections {
    fn is_empty(&self) -> bool {
        self.grammar.is_none() && self.categories.is_empty()
    }

    fn has(&self, category: Category) -> bool {
        self.categories.iter().any(|(c, _)| *c == category)
    }

    /// `None` when the object carries none of the expected sections.
    fn from_object(obj: &Map<String, Value>) -> Option<Self> {
        let mut sections = Sections::default();
        let mut recognised = false;
        for (k, v) in obj {
            recognised |= sections.absorb(k, v);
        }
        recognised.then_some(sections)
    }

    /// Take one keyed section; the first occurrence of a section wins.
    fn absorb(&mut self, key: &str, value: &Value) -> bool {
        let norm = key_norm(key);
        if matches!(norm.as_str(), "grammarbreakdown" | "grammarissues") {
            return match parse_grammar(value) {
                Some(g) => {
                    self.grammar.get_or_insert(g);
                    true
                }
                None => false,
            };
        }
        if let Ok(category) = key.parse::<Category>() {
            return match parse_category(value) {
                Some(items) => {
                    if !self.has(category) {
                        self.categories.push((category, items));
                    }
                    true
                }
                None => false,
            };
        }
        if matches!(
            norm.as_str(),
            "categories"
                | "guidelines"
                | "guidelinebreakdown"
                | "guidelinesbreakdown"
                | "categorybreakdown"
        ) {
            if let Value::Object(inner) = value {
                let mut any = false;
                for (k, v) in inner {
                    any |= self.absorb(k, v);
                }
                return any;
            }
        }
        false
    }

    /// Recovered categories in reply order, then empty tallies for the rest.
    fn into_success(self) -> AnalysisOutcome {
        let absent: Vec<Category> =
            Category::ALL.into_iter().filter(|c| !self.has(*c)).collect();
        let categories = self
            .categories
            .into_iter()
            .map(|(c, items)| CategoryTally::new(c, items))
            .chain(absent.into_iter().map(|c| CategoryTally::new(c, Vec::new())))
            .collect();
        AnalysisOutcome::Success {
            grammar: self.grammar.unwrap_or_default(),
            categories,
        }
    }

    fn into_partial(self) -> AnalysisOutcome {
        let mut missing = Vec::new();
        if self.grammar.is_none() {
            missing.push(GRAMMAR_SECTION.to_string());
        }
        missing.extend(
            Category::ALL
                .into_iter()
                .filter(|c| !self.has(*c))
                .map(|c| c.as_str().to_string()),
        );
        AnalysisOutcome::PartiallyRecovered {
            grammar: self.grammar,
            categories: self
                .categories
                .into_iter()
                .map(|(c, items)| CategoryTally::new(c, items))
                .collect(),
            missing,
        }
    }
}

fn key_norm(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn field<'v>(obj: &'v Map<String, Value>, names: &[&str]) -> Option<&'v Value> {
    names.iter().find_map(|n| obj.get(*n))
}

fn parse_category(value: &Value) -> Option<Vec<ViolationItem>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(obj) => match field(obj, &["items", "violations"]) {
            Some(Value::Array(items)) => items,
            // Section present without items: nothing violated.
            _ => return Some(Vec::new()),
        },
        _ => return None,
    };
    Some(items.iter().filter_map(parse_item).collect())
}

fn parse_item(value: &Value) -> Option<ViolationItem> {
    let obj = value.as_object()?;
    let text = |names: &[&str]| {
        field(obj, names)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let title = text(&["title", "guideline", "name", "rule"]);
    let id = text(&["id", "guidelineId", "guideline_id"]);
    if title.is_empty() && id.is_empty() {
        return None;
    }
    let count = parse_count(field(obj, &["count", "violations", "occurrences", "total"]));
    let (indices, quotes) = parse_examples(field(
        obj,
        &["examples", "exampleIndices", "example_indices", "messageIndices", "messages"],
    ));
    let mut item = ViolationItem::reported(title, count, indices, quotes);
    item.guideline_id = id;
    Some(item)
}

/// Integers, integral floats and numeric strings; negatives and junk become 0.
fn parse_count(value: Option<&Value>) -> u32 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Object(obj)) => return parse_count(field(obj, &["count", "total"])),
        _ => 0.0,
    };
    if n.is_finite() && n > 0.0 {
        n.round().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

fn is_count_like(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        Value::Object(obj) => obj.contains_key("count"),
        _ => false,
    }
}

/// Split examples into message indices and free-text quotes.
fn parse_examples(value: Option<&Value>) -> (Vec<usize>, Vec<String>) {
    static RE_INDEX: OnceCell<Regex> = OnceCell::new();
    let re_index = RE_INDEX.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:#|(?:message|msg|m)\s*#?\s*)?(\d+)\s*$").unwrap()
    });

    let values: Vec<&Value> = match value {
        Some(Value::Array(a)) => a.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };

    let mut indices = Vec::new();
    let mut quotes = Vec::new();
    for v in values {
        match v {
            Value::Number(n) => {
                if let Some(i) = n.as_u64() {
                    indices.push(i as usize);
                } else if let Some(f) = n.as_f64() {
                    if f >= 0.0 && f.fract() == 0.0 {
                        indices.push(f as usize);
                    }
                }
            }
            Value::String(s) => {
                if let Some(i) = re_index
                    .captures(s)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                {
                    indices.push(i);
                } else if !s.trim().is_empty() {
                    quotes.push(s.trim().to_string());
                }
            }
            Value::Object(obj) => {
                let (mut i, mut q) =
                    parse_examples(field(obj, &["index", "messageIndex", "message_index"]));
                indices.append(&mut i);
                quotes.append(&mut q);
                let quote = field(obj, &["text", "quote", "message"]).and_then(Value::as_str);
                if let Some(t) = quote {
                    if !t.trim().is_empty() {
                        quotes.push(t.trim().to_string());
                    }
                }
            }
            _ => {}
        }
    }
    (indices, quotes)
}

fn parse_issue(value: &Value) -> IssueCount {
    let examples = match value {
        Value::Object(obj) => {
            parse_examples(field(obj, &["examples", "exampleIndices", "messageIndices"])).0
        }
        _ => Vec::new(),
    };
    IssueCount::new(parse_count(Some(value)), examples)
}

fn add_issue(into: &mut IssueCount, from: IssueCount) {
    into.count = into.count.saturating_add(from.count);
    into.example_indices.extend(from.example_indices);
}

fn parse_grammar(value: &Value) -> Option<GrammarBreakdown> {
    let mut g = GrammarBreakdown::default();
    let mut total = 0u32;

    match value {
        Value::Number(_) | Value::String(_) => total = parse_count(Some(value)),
        Value::Object(obj) => {
            for (k, v) in obj {
                let norm = key_norm(k);
                if norm.starts_with("spell") {
                    add_issue(&mut g.spelling, parse_issue(v));
                } else if norm.starts_with("grammar") {
                    add_issue(&mut g.grammar, parse_issue(v));
                } else if norm.starts_with("punct") {
                    add_issue(&mut g.punctuation, parse_issue(v));
                } else if norm.starts_with("total") {
                    total = parse_count(Some(v));
                } else if is_count_like(v) {
                    add_issue(&mut g.other, parse_issue(v));
                }
            }
        }
        _ => return None,
    }

    if g.total() == 0 && total > 0 {
        g.other.count = total;
    }
    for class in g.classes_mut() {
        if class.count == 0 {
            class.example_indices.clear();
        }
        class.example_indices.sort_unstable();
        class.example_indices.dedup();
    }
    Some(g)
}
