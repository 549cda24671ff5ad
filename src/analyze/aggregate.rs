//! Violation aggregator: folds per-batch outcomes into corpus-wide qualitative
//! counts keyed by guideline id.
//!
//! Counts are summed across batches, never across categories: each reported
//! item resolves to exactly one guideline, and that guideline's own category is
//! the only place it is counted. Example indices are remapped from batch-local
//! to corpus-global on the way in.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::Warning;
use crate::guidelines::GuidelineIndex;
use crate::model::{AnalysisOutcome, Category, GrammarBreakdown, Guideline, ViolationItem};

/// One analysed batch: where it sits in the corpus and what came back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub batch: usize,
    pub offset: usize,
    pub len: usize,
    pub outcome: AnalysisOutcome,
}

impl BatchResult {
    pub fn global(&self, local: usize) -> Option<usize> {
        (local < self.len).then(|| self.offset + local)
    }
}

/// Corpus-wide qualitative tally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusTally {
    pub grammar: GrammarBreakdown,
    /// Messages in batches whose grammar section was recovered.
    pub grammar_messages: usize,
    /// Messages in batches whose guideline sections were recovered.
    pub guideline_messages: usize,
    /// Qualitative item per guideline id (global example indices).
    pub items: BTreeMap<String, ViolationItem>,
    pub warnings: Vec<Warning>,
}

/// Fold all batch results in order.
pub fn aggregate(
    index: &GuidelineIndex,
    results: &[BatchResult],
    max_examples: usize,
) -> CorpusTally {
    let mut tally = results
        .iter()
        .fold(CorpusTally::default(), |acc, r| acc.absorb(index, r, max_examples));
    for item in tally.items.values_mut() {
        item.example_indices.sort_unstable();
        item.example_indices.dedup();
        if item.count == 0 {
            item.example_indices.clear();
            item.example_quotes.clear();
            item.unverified = false;
        }
    }
    for class in tally.grammar.classes_mut() {
        class.example_indices.sort_unstable();
        class.example_indices.dedup();
    }
    tally
}

impl CorpusTally {
    fn absorb(mut self, index: &GuidelineIndex, r: &BatchResult, max_examples: usize) -> Self {
        if let Some(g) = r.outcome.grammar() {
            self.grammar_messages += r.len;
            for (into, from) in self.grammar.classes_mut().into_iter().zip(g.classes()) {
                into.count = into.count.saturating_add(from.count);
                for &local in &from.example_indices {
                    match r.global(local) {
                        Some(i) if into.example_indices.len() < max_examples => {
                            into.example_indices.push(i)
                        }
                        Some(_) => {}
                        None => self.warnings.push(Warning::ExampleOutOfRange {
                            guideline: "grammar".to_string(),
                            index: local,
                            batch: r.batch,
                        }),
                    }
                }
            }
        }

        // Guideline counts need every category section; a batch missing one
        // adds neither messages nor counts.
        if !r.outcome.covers_guidelines() {
            if !r.outcome.categories().is_empty() {
                debug!(target: "analysis", batch = r.batch, "categories incomplete; skipped");
            }
            return self;
        }
        self.guideline_messages += r.len;

        for (g, copies) in self.resolve_copies(index, r) {
            // Within one batch the copy filed under the guideline's own category
            // wins; otherwise reply order decides.
            let kept = copies.iter().position(|(c, _)| *c == g.category).unwrap_or(0);
            let (kept_category, reported) = copies[kept];

            let mut ignored: Vec<Category> = Vec::new();
            for (c, _) in &copies {
                if *c != kept_category && !ignored.contains(c) {
                    ignored.push(*c);
                }
            }
            for other in ignored {
                warn!(
                    target: "analysis",
                    batch = r.batch,
                    guideline = %g.id,
                    kept = %kept_category,
                    ignored = %other,
                    "guideline reported under two categories"
                );
                self.warnings.push(Warning::CategoryConflict {
                    guideline: g.id.clone(),
                    kept: kept_category,
                    ignored: other,
                });
            }

            if g.category != kept_category {
                self.warnings.push(Warning::CategoryMismatch {
                    guideline: g.id.clone(),
                    expected: g.category,
                    reported: kept_category,
                    batch: r.batch,
                });
            }

            let merged = self.items.entry(g.id.clone()).or_insert_with(|| ViolationItem {
                guideline_id: g.id.clone(),
                title: g.title.clone(),
                ..ViolationItem::default()
            });
            merged.count = merged.count.saturating_add(reported.count);
            merged.unverified |= reported.unverified;
            for &local in &reported.example_indices {
                match r.global(local) {
                    Some(i) if merged.example_indices.len() < max_examples => {
                        merged.example_indices.push(i)
                    }
                    Some(_) => {}
                    None => self.warnings.push(Warning::ExampleOutOfRange {
                        guideline: g.id.clone(),
                        index: local,
                        batch: r.batch,
                    }),
                }
            }
            for q in &reported.example_quotes {
                if merged.example_quotes.len() < max_examples {
                    merged.example_quotes.push(q.clone());
                }
            }
        }
        self
    }

    /// Group a batch's reported items by resolved guideline, in reply order.
    /// Items that resolve to nothing become warnings.
    fn resolve_copies<'a>(
        &mut self,
        index: &'a GuidelineIndex,
        r: &'a BatchResult,
    ) -> Vec<(&'a Guideline, Vec<(Category, &'a ViolationItem)>)> {
        let mut grouped: Vec<(&Guideline, Vec<(Category, &ViolationItem)>)> = Vec::new();
        for tally in r.outcome.categories() {
            for reported in &tally.items {
                let id_hint = (!reported.guideline_id.is_empty())
                    .then_some(reported.guideline_id.as_str());
                let Some(g) = index.resolve(id_hint, &reported.title) else {
                    warn!(
                        target: "analysis",
                        batch = r.batch,
                        category = %tally.category,
                        count = reported.count,
                        "reported item matches no guideline"
                    );
                    self.warnings.push(Warning::UnknownGuideline {
                        title: reported.title.clone(),
                        category: tally.category,
                        count: reported.count,
                        batch: r.batch,
                    });
                    continue;
                };
                match grouped.iter_mut().find(|(known, _)| known.id == g.id) {
                    Some((_, copies)) => copies.push((tally.category, reported)),
                    None => grouped.push((g, vec![(tally.category, reported)])),
                }
            }
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::model::{CategoryTally, Guideline, IssueCount};

    fn index() -> GuidelineIndex {
        GuidelineIndex::build(&[
            Guideline::new("polite", "Be polite", "", Category::General),
            Guideline::new("upsell", "Offer bundles", "", Category::Sales),
        ])
    }

    /// Tallies in the order their categories first appear in `items`, then
    /// empty tallies for the rest.
    fn success(
        items: Vec<(Category, ViolationItem)>,
        grammar: GrammarBreakdown,
    ) -> AnalysisOutcome {
        let mut order: Vec<Category> = Vec::new();
        for c in items.iter().map(|(c, _)| *c).chain(Category::ALL) {
            if !order.contains(&c) {
                order.push(c);
            }
        }
        let categories = order
            .into_iter()
            .map(|c| {
                CategoryTally::new(
                    c,
                    items.iter().filter(|(ic, _)| *ic == c).map(|(_, i)| i.clone()).collect(),
                )
            })
            .collect();
        AnalysisOutcome::Success { grammar, categories }
    }

    fn polite(count: u32, examples: Vec<usize>) -> (Category, ViolationItem) {
        (Category::General, ViolationItem::reported("Be polite", count, examples, vec![]))
    }

    fn result(batch: usize, offset: usize, len: usize, outcome: AnalysisOutcome) -> BatchResult {
        BatchResult { batch, offset, len, outcome }
    }

    #[test]
    fn sums_across_batches_and_remaps_indices() {
        let mut lower = polite(1, vec![0]);
        lower.1.title = "be polite".into();
        let r = vec![
            result(0, 0, 50, success(vec![polite(2, vec![1, 4])], GrammarBreakdown::default())),
            result(1, 50, 50, success(vec![lower], GrammarBreakdown::default())),
        ];
        let t = aggregate(&index(), &r, 10);
        let item = &t.items["polite"];
        assert_eq!(item.count, 3);
        assert_eq!(item.example_indices, vec![1, 4, 50]);
        assert_eq!(t.guideline_messages, 100);
        assert!(t.warnings.is_empty());
    }

    fn bundles(category: Category, count: u32, example: usize) -> (Category, ViolationItem) {
        (category, ViolationItem::reported("Offer bundles", count, vec![example], vec![]))
    }

    fn conflicts(t: &CorpusTally) -> Vec<(Category, Category)> {
        t.warnings
            .iter()
            .filter_map(|w| match w {
                Warning::CategoryConflict { kept, ignored, .. } => Some((*kept, *ignored)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn same_guideline_in_two_categories_counts_once() {
        let items = vec![bundles(Category::Sales, 2, 3), bundles(Category::General, 5, 7)];
        let r = vec![result(0, 0, 50, success(items, GrammarBreakdown::default()))];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.items["upsell"].count, 2);
        assert_eq!(t.items["upsell"].example_indices, vec![3]);
        assert_eq!(t.items.len(), 1);
        assert_eq!(conflicts(&t), vec![(Category::Sales, Category::General)]);
    }

    #[test]
    fn own_category_copy_wins_even_when_reported_second() {
        let items = vec![bundles(Category::General, 5, 7), bundles(Category::Sales, 2, 3)];
        let r = vec![result(0, 0, 50, success(items, GrammarBreakdown::default()))];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.items["upsell"].count, 2);
        assert_eq!(conflicts(&t), vec![(Category::Sales, Category::General)]);
        assert!(!t.warnings.iter().any(|w| w.kind() == "category_mismatch"));
    }

    #[test]
    fn misfiled_copies_fall_back_to_reply_order() {
        let items = vec![bundles(Category::Captions, 3, 1), bundles(Category::Psychology, 4, 2)];
        let r = vec![result(0, 0, 50, success(items, GrammarBreakdown::default()))];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.items["upsell"].count, 3);
        assert_eq!(conflicts(&t), vec![(Category::Captions, Category::Psychology)]);
        assert!(t.warnings.iter().any(|w| matches!(
            w,
            Warning::CategoryMismatch {
                expected: Category::Sales,
                reported: Category::Captions,
                ..
            }
        )));
    }

    #[test]
    fn misfiled_item_counts_under_own_category_with_warning() {
        let r = vec![result(
            0,
            0,
            10,
            success(
                vec![(Category::Captions, polite(1, vec![2]).1)],
                GrammarBreakdown::default(),
            ),
        )];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.items["polite"].count, 1);
        assert!(matches!(
            t.warnings[0],
            Warning::CategoryMismatch {
                expected: Category::General,
                reported: Category::Captions,
                ..
            }
        ));
    }

    #[test]
    fn unknown_items_and_bad_indices_become_warnings() {
        let made_up = ViolationItem::reported("Made up rule", 4, vec![0], vec![]);
        let r = vec![result(
            0,
            100,
            5,
            success(
                vec![(Category::General, made_up), polite(1, vec![2, 9])],
                GrammarBreakdown::default(),
            ),
        )];
        let t = aggregate(&index(), &r, 10);
        assert!(!t.items.values().any(|i| i.title == "Made up rule"));
        assert_eq!(t.items["polite"].example_indices, vec![102]);
        assert_eq!(t.warnings.len(), 2);
    }

    #[test]
    fn failed_batches_contribute_nothing() {
        let grammar = GrammarBreakdown {
            spelling: IssueCount::new(2, vec![0, 1]),
            ..GrammarBreakdown::default()
        };
        let r = vec![
            result(0, 0, 50, success(vec![], grammar)),
            result(
                1,
                50,
                50,
                AnalysisOutcome::Failed {
                    reason: FailureReason::MalformedResponse("x".into()),
                    raw: String::new(),
                },
            ),
        ];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.grammar.spelling.count, 2);
        assert_eq!(t.grammar_messages, 50);
        assert_eq!(t.guideline_messages, 50);
        assert!(t.items.is_empty());
    }

    #[test]
    fn partial_without_categories_covers_grammar_only() {
        let r = vec![result(
            0,
            0,
            60,
            AnalysisOutcome::PartiallyRecovered {
                grammar: Some(GrammarBreakdown::default()),
                categories: vec![],
                missing: vec!["general".into()],
            },
        )];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.grammar_messages, 60);
        assert_eq!(t.guideline_messages, 0);
    }

    #[test]
    fn partial_missing_one_category_adds_no_guideline_data() {
        let recovered: Vec<CategoryTally> =
            [Category::General, Category::Psychology, Category::Sales]
                .into_iter()
                .map(|c| CategoryTally::new(c, Vec::new()))
                .collect();
        let mut with_item = recovered.clone();
        with_item[0] = CategoryTally::new(Category::General, vec![polite(4, vec![1]).1]);
        let r = vec![
            result(0, 0, 50, success(vec![polite(10, vec![0])], GrammarBreakdown::default())),
            result(
                1,
                50,
                50,
                AnalysisOutcome::PartiallyRecovered {
                    grammar: None,
                    categories: with_item,
                    missing: vec!["grammarBreakdown".into(), "captions".into()],
                },
            ),
        ];
        let t = aggregate(&index(), &r, 10);
        assert_eq!(t.guideline_messages, 50);
        assert_eq!(t.items["polite"].count, 10);

        let mut complete = recovered;
        complete.push(CategoryTally::new(Category::Captions, Vec::new()));
        let full = vec![result(
            0,
            0,
            40,
            AnalysisOutcome::PartiallyRecovered {
                grammar: None,
                categories: complete,
                missing: vec!["grammarBreakdown".into()],
            },
        )];
        let t = aggregate(&index(), &full, 10);
        assert_eq!(t.guideline_messages, 40);
        assert_eq!(t.grammar_messages, 0);
    }
}
