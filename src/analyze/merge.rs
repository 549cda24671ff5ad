//! Result merger: exact counts over qualitative counts, per guideline.
//!
//! Precedence is asymmetric. A positive exact count always replaces the model's
//! figure. Otherwise the model's figure stands, including a reported 0: an exact
//! count of 0 is treated the same as "no exact rule", so it never overrides the
//! model (kept as-is; see DESIGN.md).

use std::collections::BTreeMap;

use crate::analyze::exact::ExactCount;
use crate::guidelines::GuidelineIndex;
use crate::model::{Category, CategoryTally, CountSource, ViolationItem};

/// One tally per category (fixed order), one item per active guideline.
pub fn merge(
    index: &GuidelineIndex,
    qualitative: &BTreeMap<String, ViolationItem>,
    exact: &BTreeMap<String, ExactCount>,
) -> Vec<CategoryTally> {
    Category::ALL
        .into_iter()
        .map(|category| {
            let items = index
                .in_category(category)
                .map(|g| {
                    let model = qualitative.get(&g.id);
                    let ground = exact.get(&g.id);
                    match (ground, model) {
                        (Some(e), model) if e.count > 0 => ViolationItem {
                            guideline_id: g.id.clone(),
                            title: g.title.clone(),
                            count: e.count,
                            example_indices: e.example_indices.clone(),
                            example_quotes: Vec::new(),
                            unverified: false,
                            source: CountSource::Exact,
                            qualitative_count: model.map(|m| m.count),
                        },
                        (_, Some(m)) => ViolationItem {
                            guideline_id: g.id.clone(),
                            title: g.title.clone(),
                            source: CountSource::Qualitative,
                            ..m.clone()
                        },
                        (Some(_), None) => ViolationItem {
                            guideline_id: g.id.clone(),
                            title: g.title.clone(),
                            source: CountSource::Exact,
                            ..ViolationItem::default()
                        },
                        (None, None) => ViolationItem {
                            guideline_id: g.id.clone(),
                            title: g.title.clone(),
                            source: CountSource::NotReported,
                            ..ViolationItem::default()
                        },
                    }
                })
                .collect();
            CategoryTally::new(category, items)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Guideline;

    fn index() -> GuidelineIndex {
        GuidelineIndex::build(&[
            Guideline::new("reply", "Reply within 5 minutes", "", Category::General),
            Guideline::new("polite", "Be polite", "", Category::General),
            Guideline::new("upsell", "Offer bundles", "", Category::Sales),
        ])
    }

    fn model(id: &str, count: u32) -> (String, ViolationItem) {
        let mut item = ViolationItem::reported(id, count, if count > 0 { vec![0] } else { vec![] }, vec![]);
        item.guideline_id = id.to_string();
        (id.to_string(), item)
    }

    fn exact(id: &str, count: u32, idx: Vec<usize>) -> (String, ExactCount) {
        (id.to_string(), ExactCount { count, example_indices: idx })
    }

    #[test]
    fn exact_count_beats_model_zero() {
        let q = BTreeMap::from([model("reply", 0)]);
        let e = BTreeMap::from([exact("reply", 3, vec![4, 9, 12])]);
        let merged = merge(&index(), &q, &e);
        let item = &merged[0].items[0];
        assert_eq!(item.count, 3);
        assert_eq!(item.source, CountSource::Exact);
        assert_eq!(item.qualitative_count, Some(0));
        assert_eq!(item.example_indices, vec![4, 9, 12]);
        assert_eq!(merged[0].total_violations, 3);
    }

    #[test]
    fn exact_count_beats_model_overcount() {
        let q = BTreeMap::from([model("reply", 7)]);
        let e = BTreeMap::from([exact("reply", 2, vec![1, 2])]);
        let merged = merge(&index(), &q, &e);
        assert_eq!(merged[0].items[0].count, 2);
        assert_eq!(merged[0].items[0].qualitative_count, Some(7));
    }

    #[test]
    fn model_stands_without_exact_data() {
        let q = BTreeMap::from([model("polite", 0), model("upsell", 4)]);
        let merged = merge(&index(), &q, &BTreeMap::new());
        assert_eq!(merged[0].items[1].count, 0);
        assert_eq!(merged[0].items[1].source, CountSource::Qualitative);
        assert_eq!(merged[3].items[0].count, 4);
        assert_eq!(merged[3].total_violations, 4);
    }

    #[test]
    fn exact_zero_does_not_override_model() {
        let q = BTreeMap::from([model("reply", 2)]);
        let e = BTreeMap::from([exact("reply", 0, vec![])]);
        let merged = merge(&index(), &q, &e);
        assert_eq!(merged[0].items[0].count, 2);
        assert_eq!(merged[0].items[0].source, CountSource::Qualitative);
    }

    #[test]
    fn every_guideline_appears_once() {
        let merged = merge(&index(), &BTreeMap::new(), &BTreeMap::new());
        assert_eq!(merged.len(), 4);
        let ids: Vec<_> = merged
            .iter()
            .flat_map(|t| t.items.iter().map(|i| i.guideline_id.as_str()))
            .collect();
        assert_eq!(ids, vec!["reply", "polite", "upsell"]);
        assert!(merged.iter().all(|t| t.total_violations == 0));
        assert_eq!(merged[0].items[0].source, CountSource::NotReported);
    }
}
