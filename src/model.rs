//! model.rs: shared data model for the compliance pipeline.
//!
//! Inputs (`Guideline`, `MessageRecord`) are owned by external collaborators and
//! only read here. Everything else is produced by one pipeline stage and consumed
//! by the next; none of it is mutated after creation except through explicit merges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guideline category. Parsed with an exact (case-insensitive) name match only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Category {
    General,
    Psychology,
    Captions,
    Sales,
}

impl Category {
    /// Fixed report order.
    pub const ALL: [Category; 4] = [
        Category::General,
        Category::Psychology,
        Category::Captions,
        Category::Sales,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Psychology => "psychology",
            Self::Captions => "captions",
            Self::Sales => "sales",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a label is not one of the four category names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown guideline category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| UnknownCategory(t.to_string()))
    }
}

impl TryFrom<String> for Category {
    type Error = UnknownCategory;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn default_weight() -> f32 {
    1.0
}

/// A named, weighted behavioral rule. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    /// May be empty in the source; the index then derives a slug from `title`.
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

impl Guideline {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            category,
            weight: default_weight(),
        }
    }
}

/// One chat message as delivered by upstream ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub text: String,
    #[serde(rename = "timestampUTC", alias = "timestampUtc", alias = "timestamp")]
    pub timestamp_utc: DateTime<Utc>,
    #[serde(default)]
    pub reply_time_minutes: f64,
    #[serde(default)]
    pub counterparty_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_amount: Option<f64>,
    #[serde(default)]
    pub is_price_item: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_purchased: Option<bool>,
}

impl MessageRecord {
    pub fn new(text: impl Into<String>, timestamp_utc: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp_utc,
            reply_time_minutes: 0.0,
            counterparty_id: String::new(),
            price_amount: None,
            is_price_item: false,
            was_purchased: None,
        }
    }

    /// Builder: set reply time in minutes.
    pub fn with_reply_time(mut self, minutes: f64) -> Self {
        self.reply_time_minutes = minutes;
        self
    }

    /// Builder: mark as a priced item.
    pub fn with_price(mut self, amount: f64, purchased: Option<bool>) -> Self {
        self.is_price_item = true;
        self.price_amount = Some(amount);
        self.was_purchased = purchased;
        self
    }

    pub fn with_counterparty(mut self, id: impl Into<String>) -> Self {
        self.counterparty_id = id.into();
        self
    }

    /// Whether the reply time is usable for exact rules (finite and non-negative).
    pub fn has_valid_reply_time(&self) -> bool {
        self.reply_time_minutes.is_finite() && self.reply_time_minutes >= 0.0
    }

    /// Price, only when the record is a price item and the amount is finite.
    pub fn valid_price(&self) -> Option<f64> {
        if !self.is_price_item {
            return None;
        }
        self.price_amount.filter(|p| p.is_finite())
    }

    /// First broken record invariant, if any.
    pub fn invariant_violation(&self) -> Option<&'static str> {
        if !self.has_valid_reply_time() {
            return Some("replyTimeMinutes must be a finite value >= 0");
        }
        if self.price_amount.is_some() && !self.is_price_item {
            return Some("priceAmount present on a record that is not a price item");
        }
        None
    }
}

/// Where a merged count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSource {
    Exact,
    #[default]
    Qualitative,
    NotReported,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Violations of one guideline. `count == 0` implies no examples.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationItem {
    /// Empty while the item is batch-local and not yet resolved against the index.
    pub guideline_id: String,
    pub title: String,
    pub count: u32,
    pub example_indices: Vec<usize>,
    /// Textual examples the model gave instead of message indices.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub example_quotes: Vec<String>,
    /// Count reported without any supporting example.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unverified: bool,
    #[serde(default)]
    pub source: CountSource,
    /// The model's figure when an exact count replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualitative_count: Option<u32>,
}

impl ViolationItem {
    /// Qualitative item; enforces the empty-examples-on-zero invariant and the
    /// unverified flag.
    pub fn reported(
        title: impl Into<String>,
        count: u32,
        example_indices: Vec<usize>,
        example_quotes: Vec<String>,
    ) -> Self {
        let mut item = Self {
            guideline_id: String::new(),
            title: title.into(),
            count,
            example_indices,
            example_quotes,
            unverified: false,
            source: CountSource::Qualitative,
            qualitative_count: None,
        };
        item.normalize();
        item
    }

    pub(crate) fn normalize(&mut self) {
        if self.count == 0 {
            self.example_indices.clear();
            self.example_quotes.clear();
            self.unverified = false;
        } else {
            self.example_indices.sort_unstable();
            self.example_indices.dedup();
            self.unverified = self.example_indices.is_empty() && self.example_quotes.is_empty();
        }
    }
}

/// Per-category tally. Construct through `CategoryTally::new` to keep the total in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTally {
    pub category: Category,
    pub total_violations: u64,
    pub items: Vec<ViolationItem>,
}

impl CategoryTally {
    pub fn new(category: Category, items: Vec<ViolationItem>) -> Self {
        let total_violations = items.iter().map(|i| u64::from(i.count)).sum();
        Self {
            category,
            total_violations,
            items,
        }
    }

    pub fn empty(category: Category) -> Self {
        Self::new(category, Vec::new())
    }
}

/// Count plus example message indices for one grammar issue class.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCount {
    pub count: u32,
    #[serde(default)]
    pub example_indices: Vec<usize>,
}

impl IssueCount {
    pub fn new(count: u32, mut example_indices: Vec<usize>) -> Self {
        if count == 0 {
            example_indices.clear();
        }
        Self {
            count,
            example_indices,
        }
    }
}

/// Grammar issues found in one batch (or the whole corpus after aggregation).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GrammarBreakdown {
    pub spelling: IssueCount,
    pub grammar: IssueCount,
    pub punctuation: IssueCount,
    /// Sum of any issue classes the model reported under other names.
    pub other: IssueCount,
}

impl GrammarBreakdown {
    pub fn total(&self) -> u64 {
        [&self.spelling, &self.grammar, &self.punctuation, &self.other]
            .iter()
            .map(|c| u64::from(c.count))
            .sum()
    }

    pub(crate) fn classes_mut(&mut self) -> [&mut IssueCount; 4] {
        [
            &mut self.spelling,
            &mut self.grammar,
            &mut self.punctuation,
            &mut self.other,
        ]
    }

    pub(crate) fn classes(&self) -> [&IssueCount; 4] {
        [&self.spelling, &self.grammar, &self.punctuation, &self.other]
    }
}

/// Result of analysing one batch. Produced once, never mutated, only merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Success {
        grammar: GrammarBreakdown,
        categories: Vec<CategoryTally>,
    },
    PartiallyRecovered {
        grammar: Option<GrammarBreakdown>,
        categories: Vec<CategoryTally>,
        /// Sections that could not be salvaged.
        missing: Vec<String>,
    },
    Failed {
        reason: crate::error::FailureReason,
        /// Raw reply retained for diagnostics.
        raw: String,
    },
}

impl AnalysisOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::PartiallyRecovered { .. } => "partially_recovered",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn grammar(&self) -> Option<&GrammarBreakdown> {
        match self {
            Self::Success { grammar, .. } => Some(grammar),
            Self::PartiallyRecovered { grammar, .. } => grammar.as_ref(),
            Self::Failed { .. } => None,
        }
    }

    pub fn categories(&self) -> &[CategoryTally] {
        match self {
            Self::Success { categories, .. } | Self::PartiallyRecovered { categories, .. } => {
                categories
            }
            Self::Failed { .. } => &[],
        }
    }

    /// Whether this outcome accounts for every guideline category.
    /// A full success always does (absent categories mean zero violations); a
    /// partial one only when every category section was recovered.
    pub fn covers_guidelines(&self) -> bool {
        match self {
            Self::Success { .. } => true,
            Self::PartiallyRecovered { categories, .. } => Category::ALL
                .iter()
                .all(|c| categories.iter().any(|t| t.category == *c)),
            Self::Failed { .. } => false,
        }
    }
}

/// Final bounded scores. `None` means "no data", never "no issues".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateScore {
    pub grammar_score: Option<u8>,
    pub guidelines_score: Option<u8>,
    pub overall_score: Option<u8>,
}

impl AggregateScore {
    pub fn new(grammar_score: Option<u8>, guidelines_score: Option<u8>) -> Self {
        let overall_score = match (grammar_score, guidelines_score) {
            (Some(g), Some(l)) => Some(((f64::from(g) + f64::from(l)) / 2.0).round() as u8),
            (Some(g), None) => Some(g),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        };
        Self {
            grammar_score,
            guidelines_score,
            overall_score,
        }
    }

    /// All-null score for runs without data.
    pub fn empty() -> Self {
        Self::default()
    }
}
