//! Exact rule engine: violation counts derivable from message metadata alone.
//!
//! Rules bind to guidelines through the `[[exact_rules]]` table (and, optionally,
//! reply-time rules inferred from guideline wording). Binding happens once per
//! run in `ExactRuleEngine::resolve`; evaluation is a pure function of the
//! records and the rule, so the same input always yields the same counts.
//!
//! Rule kinds:
//! - `reply_time_exceeds { minutes }`: reply took longer than `minutes`
//! - `price_below { amount }` / `price_above { amount }`: priced item outside bound
//! - `unpurchased_offer`: priced item explicitly not purchased
//! - `outside_hours { start_hour, end_hour }`: sent outside `[start, end)` UTC
//!   (wraps past midnight when `start > end`)

use chrono::Timelike;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::ExactRuleConfig;
use crate::error::Warning;
use crate::guidelines::GuidelineIndex;
use crate::model::{Guideline, MessageRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExactRule {
    ReplyTimeExceeds { minutes: f64 },
    PriceBelow { amount: f64 },
    PriceAbove { amount: f64 },
    UnpurchasedOffer,
    OutsideHours { start_hour: u32, end_hour: u32 },
}

impl ExactRule {
    /// Whether `record` violates this rule. Records with unusable fields never match.
    pub fn matches(&self, record: &MessageRecord) -> bool {
        match *self {
            ExactRule::ReplyTimeExceeds { minutes } => {
                record.has_valid_reply_time() && record.reply_time_minutes > minutes
            }
            ExactRule::PriceBelow { amount } => record.valid_price().is_some_and(|p| p < amount),
            ExactRule::PriceAbove { amount } => record.valid_price().is_some_and(|p| p > amount),
            ExactRule::UnpurchasedOffer => {
                record.is_price_item && record.was_purchased == Some(false)
            }
            ExactRule::OutsideHours {
                start_hour,
                end_hour,
            } => {
                let (start, end) = (start_hour % 24, end_hour % 24);
                if start == end {
                    return false;
                }
                let h = record.timestamp_utc.hour();
                let inside = if start < end {
                    h >= start && h < end
                } else {
                    h >= start || h < end
                };
                !inside
            }
        }
    }

    /// Reply-time rule from guideline wording such as "reply within 5 minutes"
    /// or "never take more than 10 minutes to respond".
    pub fn infer(guideline: &Guideline) -> Option<ExactRule> {
        static RE_REPLY: OnceCell<Regex> = OnceCell::new();
        static RE_MINUTES: OnceCell<Regex> = OnceCell::new();
        let re_reply = RE_REPLY.get_or_init(|| {
            Regex::new(r"(?i)\b(reply|replies|replying|respond|responds|responding|response|answer|answers|answering)\b").unwrap()
        });
        let re_minutes = RE_MINUTES.get_or_init(|| {
            Regex::new(r"(?i)\b(?:within|under|less than|more than|longer than|over|exceeds?|exceeding|no later than)\s+(\d+(?:\.\d+)?)\s*(?:min|mins|minute|minutes)\b").unwrap()
        });

        let text = format!("{} {}", guideline.title, guideline.description);
        if !re_reply.is_match(&text) {
            return None;
        }
        let caps = re_minutes.captures(&text)?;
        let minutes: f64 = caps.get(1)?.as_str().parse().ok()?;
        Some(ExactRule::ReplyTimeExceeds { minutes })
    }
}

/// Deterministic count for one guideline (global message indices).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ExactCount {
    pub count: u32,
    pub example_indices: Vec<usize>,
}

/// Count records (with their corpus indices) violating any of `rules`.
/// At most `max_examples` indices are kept; the count covers all matches.
pub fn count_violations<'a, I>(rules: &[ExactRule], records: I, max_examples: usize) -> ExactCount
where
    I: IntoIterator<Item = (usize, &'a MessageRecord)>,
{
    let mut out = ExactCount::default();
    for (idx, record) in records {
        if rules.iter().any(|r| r.matches(record)) {
            out.count = out.count.saturating_add(1);
            if out.example_indices.len() < max_examples {
                out.example_indices.push(idx);
            }
        }
    }
    out
}

/// Rules bound to guideline ids for one run.
#[derive(Debug, Clone, Default)]
pub struct ExactRuleEngine {
    rules: BTreeMap<String, Vec<ExactRule>>,
}

impl ExactRuleEngine {
    /// Bind configured rules to the active guidelines. Configured rules take
    /// precedence; inference only fills guidelines that have none.
    pub fn resolve(
        configured: &[ExactRuleConfig],
        index: &GuidelineIndex,
        infer: bool,
    ) -> (Self, Vec<Warning>) {
        let mut rules: BTreeMap<String, Vec<ExactRule>> = BTreeMap::new();
        let mut warnings = Vec::new();

        for entry in configured {
            match index.lookup(&entry.guideline) {
                Some(g) => rules.entry(g.id.clone()).or_default().push(entry.rule.clone()),
                None => {
                    warn!(target: "analysis", target_name = %entry.guideline, "exact rule names an unknown guideline");
                    warnings.push(Warning::UnknownRuleTarget {
                        target: entry.guideline.clone(),
                    });
                }
            }
        }

        if infer {
            for g in index.iter() {
                if rules.contains_key(&g.id) {
                    continue;
                }
                if let Some(rule) = ExactRule::infer(g) {
                    rules.insert(g.id.clone(), vec![rule]);
                }
            }
        }

        info!(target: "analysis", guidelines = rules.len(), "exact rules resolved");
        (Self { rules }, warnings)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules_for(&self, guideline_id: &str) -> Option<&[ExactRule]> {
        self.rules.get(guideline_id).map(Vec::as_slice)
    }

    /// Evaluate every bound guideline over `records`.
    pub fn evaluate(
        &self,
        records: &[(usize, &MessageRecord)],
        max_examples: usize,
    ) -> BTreeMap<String, ExactCount> {
        self.rules
            .iter()
            .map(|(id, rules)| {
                (
                    id.clone(),
                    count_violations(rules, records.iter().copied(), max_examples),
                )
            })
            .collect()
    }
}
