//! Guideline index: the active guideline snapshot grouped by category.
//!
//! Built once per run. Every guideline maps to exactly one category; when the
//! source lists the same guideline twice under different categories the first
//! listing wins and a `CategoryConflict` warning is kept for the report.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Warning;
use crate::model::{Category, Guideline};

/// Minimum normalized Levenshtein similarity for a fuzzy title match.
pub const FUZZY_TITLE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Default)]
pub struct GuidelineIndex {
    guidelines: Vec<Guideline>,
    by_id: HashMap<String, usize>,
    by_title: HashMap<String, usize>,
    warnings: Vec<Warning>,
}

impl GuidelineIndex {
    pub fn build(source: &[Guideline]) -> Self {
        let mut index = GuidelineIndex::default();

        for g in source {
            let mut g = g.clone();
            if g.id.trim().is_empty() {
                g.id = slugify(&g.title);
            }
            let title_key = normalize_title(&g.title);

            let existing = index
                .by_id
                .get(&g.id)
                .or_else(|| index.by_title.get(&title_key))
                .copied();

            if let Some(pos) = existing {
                let kept = &index.guidelines[pos];
                if kept.category != g.category {
                    warn!(
                        target: "analysis",
                        guideline = %kept.id,
                        kept = %kept.category,
                        ignored = %g.category,
                        "guideline listed under two categories; keeping first"
                    );
                    index.warnings.push(Warning::CategoryConflict {
                        guideline: kept.id.clone(),
                        kept: kept.category,
                        ignored: g.category,
                    });
                } else {
                    debug!(target: "analysis", guideline = %kept.id, "duplicate guideline ignored");
                }
                continue;
            }

            let pos = index.guidelines.len();
            index.by_id.insert(g.id.clone(), pos);
            index.by_title.insert(title_key, pos);
            index.guidelines.push(g);
        }

        index
    }

    pub fn len(&self) -> usize {
        self.guidelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guidelines.is_empty()
    }

    /// Guidelines in source order.
    pub fn iter(&self) -> impl Iterator<Item = &Guideline> {
        self.guidelines.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Guideline> {
        self.by_id.get(id).map(|&i| &self.guidelines[i])
    }

    pub fn category_of(&self, id: &str) -> Option<Category> {
        self.get(id).map(|g| g.category)
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &Guideline> {
        self.guidelines
            .iter()
            .filter(move |g| g.category == category)
    }

    /// Look up by id or title (exact normalized title first, then fuzzy).
    pub fn lookup(&self, key: &str) -> Option<&Guideline> {
        self.get(key.trim()).or_else(|| self.resolve(None, key))
    }

    /// Resolve a model-reported item to a guideline: id, normalized title, then
    /// the most similar title above `FUZZY_TITLE_THRESHOLD`. Ties keep the
    /// earlier guideline so resolution is deterministic.
    pub fn resolve(&self, id: Option<&str>, title: &str) -> Option<&Guideline> {
        if let Some(g) = id.and_then(|id| self.get(id.trim())) {
            return Some(g);
        }
        let key = normalize_title(title);
        if key.is_empty() {
            return None;
        }
        if let Some(&i) = self.by_title.get(&key) {
            return Some(&self.guidelines[i]);
        }

        let mut best: Option<(f64, usize)> = None;
        for (i, g) in self.guidelines.iter().enumerate() {
            let sim = strsim::normalized_levenshtein(&key, &normalize_title(&g.title));
            if sim >= FUZZY_TITLE_THRESHOLD && best.is_none_or(|(b, _)| sim > b) {
                best = Some((sim, i));
            }
        }
        best.map(|(_, i)| &self.guidelines[i])
    }

    /// Conflicts found while building the index.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

/// Lowercase, alphanumerics only, single `-` separators.
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut dash = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Lowercase, collapse whitespace, trim surrounding punctuation and quotes.
pub(crate) fn normalize_title(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !out.is_empty() {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.extend(ch.to_lowercase());
            last_space = false;
        }
    }
    out.trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .to_string()
}
