//! Request builder: renders one batch plus the active guidelines into the
//! analysis service's request shape.
//!
//! The guideline list and instruction template are built once per run and
//! borrowed by every batch request, so batches differ only in their messages.

use serde::Serialize;

use crate::analyze::batch::Batch;
use crate::guidelines::GuidelineIndex;
use crate::model::Category;

/// Output contract given to the service with every batch.
pub const OUTPUT_INSTRUCTIONS: &str = r#"You review chat messages sent by an agent to customers.
Check every message against every guideline listed in the payload, and check spelling, grammar and punctuation.

Respond with exactly ONE JSON object and nothing else. Shape:
{
  "grammarBreakdown": {
    "spelling":    {"count": <int>, "examples": [<message index>, ...]},
    "grammar":     {"count": <int>, "examples": [<message index>, ...]},
    "punctuation": {"count": <int>, "examples": [<message index>, ...]}
  },
  "general":    {"items": [{"title": "<guideline title>", "count": <int>, "examples": [<message index>, ...]}]},
  "psychology": {"items": [...]},
  "captions":   {"items": [...]},
  "sales":      {"items": [...]}
}

Rules:
- "examples" are the "index" values of the offending messages in this payload.
- List a guideline only under its own category, using its exact title.
- Every violated guideline needs a count and at least one example.
- Use 0 and an empty list when nothing is violated. No comments, no trailing commas."#;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage<'a> {
    /// Batch-local index, echoed back by the service in `examples`.
    pub index: usize,
    pub text: &'a str,
    pub reply_time_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_purchase: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestGuideline<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest<'a> {
    pub messages: Vec<RequestMessage<'a>>,
    pub guidelines: &'a [RequestGuideline<'a>],
    pub output_instructions: &'a str,
}

/// Rendered request as sent to a chat-style model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl AnalysisRequest<'_> {
    /// Instructions go to the system turn; messages + guidelines as JSON to the user turn.
    pub fn render(&self) -> Prompt {
        #[derive(Serialize)]
        struct Payload<'p> {
            messages: &'p [RequestMessage<'p>],
            guidelines: &'p [RequestGuideline<'p>],
        }
        let payload = Payload {
            messages: &self.messages,
            guidelines: self.guidelines,
        };
        Prompt {
            system: self.output_instructions.to_string(),
            user: serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

pub struct AnalysisRequestBuilder<'g> {
    guidelines: Vec<RequestGuideline<'g>>,
    instructions: &'static str,
}

impl<'g> AnalysisRequestBuilder<'g> {
    pub fn new(index: &'g GuidelineIndex) -> Self {
        let guidelines = index
            .iter()
            .map(|g| RequestGuideline {
                title: &g.title,
                description: &g.description,
                category: g.category,
            })
            .collect();
        Self {
            guidelines,
            instructions: OUTPUT_INSTRUCTIONS,
        }
    }

    pub fn build<'a>(&'a self, batch: &Batch<'a>) -> AnalysisRequest<'a> {
        let messages = batch
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| RequestMessage {
                index: i,
                text: &m.text,
                reply_time_minutes: m.reply_time_minutes,
                price: m.valid_price(),
                is_purchase: if m.is_price_item { m.was_purchased } else { None },
            })
            .collect();
        AnalysisRequest {
            messages,
            guidelines: &self.guidelines,
            output_instructions: self.instructions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::batch::split;
    use crate::model::{Guideline, MessageRecord};
    use chrono::Utc;

    fn index() -> GuidelineIndex {
        GuidelineIndex::build(&[
            Guideline::new("g1", "Be polite", "No rude words", Category::General),
            Guideline::new("g2", "Mention bundles", "", Category::Sales),
        ])
    }

    #[test]
    fn every_batch_gets_same_guidelines_and_template() {
        let ts = Utc::now();
        let corpus: Vec<_> = (0..120)
            .map(|i| MessageRecord::new(format!("m{i}"), ts))
            .collect();
        let batches = split(&corpus, 50);
        let idx = index();
        let builder = AnalysisRequestBuilder::new(&idx);
        let reqs: Vec<_> = batches.iter().map(|b| builder.build(b)).collect();
        assert_eq!(reqs.len(), 3);
        for r in &reqs[1..] {
            assert_eq!(r.guidelines, reqs[0].guidelines);
            assert_eq!(r.output_instructions, reqs[0].output_instructions);
        }
        assert_eq!(reqs[0].guidelines.len(), 2);
        assert_eq!(reqs[2].messages.len(), 20);
        assert_eq!(reqs[2].messages[0].index, 0);
        assert_eq!(reqs[2].messages[0].text, "m100");
    }

    #[test]
    fn render_includes_metadata() {
        let ts = Utc::now();
        let corpus = vec![
            MessageRecord::new("hello", ts).with_reply_time(2.5),
            MessageRecord::new("buy this", ts).with_price(9.99, Some(false)),
        ];
        let batches = split(&corpus, 50);
        let idx = index();
        let builder = AnalysisRequestBuilder::new(&idx);
        let prompt = builder.build(&batches[0]).render();
        assert_eq!(prompt.system, OUTPUT_INSTRUCTIONS);

        let v: serde_json::Value = serde_json::from_str(&prompt.user).unwrap();
        assert_eq!(v["messages"][0]["replyTimeMinutes"], 2.5);
        assert!(v["messages"][0].get("price").is_none());
        assert_eq!(v["messages"][1]["price"], 9.99);
        assert_eq!(v["messages"][1]["isPurchase"], false);
        assert_eq!(v["guidelines"][1]["category"], "sales");
        assert_eq!(v["guidelines"][0]["title"], "Be polite");
    }
}
