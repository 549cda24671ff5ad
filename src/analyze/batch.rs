//! Batch planner: splits the ordered corpus into non-overlapping batches.
//!
//! Every message lands in exactly one batch and batches keep corpus order, so
//! concatenating them reproduces the corpus. Batch size comes from the service's
//! input budget divided by the estimated tokens per message, but never drops
//! below the configured floor.

use crate::config::PipelineConfig;
use crate::model::MessageRecord;

/// Borrowed, ordered slice of the corpus plus its position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    pub index: usize,
    /// Corpus index of `messages[0]`.
    pub offset: usize,
    pub messages: &'a [MessageRecord],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Map a batch-local index to the corpus index; `None` if out of range.
    pub fn global_index(&self, local: usize) -> Option<usize> {
        (local < self.messages.len()).then(|| self.offset + local)
    }
}

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    floor: usize,
    fixed: Option<usize>,
    budget_tokens: usize,
    overhead_tokens: usize,
}

impl BatchPlanner {
    pub fn new(floor: usize, budget_tokens: usize, overhead_tokens: usize) -> Self {
        Self {
            floor: floor.max(1),
            fixed: None,
            budget_tokens,
            overhead_tokens,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            fixed: cfg.batch_size,
            ..Self::new(
                cfg.min_batch_size,
                cfg.max_input_tokens,
                cfg.message_overhead_tokens,
            )
        }
    }

    /// Builder: use a fixed batch size (still subject to the floor).
    pub fn with_fixed_size(mut self, size: usize) -> Self {
        self.fixed = Some(size);
        self
    }

    /// Batch size for this corpus: fixed size if set, else budget / mean tokens
    /// per message; never below the floor.
    pub fn batch_size_for(&self, corpus: &[MessageRecord]) -> usize {
        let derived = match self.fixed {
            Some(n) => n,
            None if corpus.is_empty() => self.floor,
            None => {
                let total: usize = corpus
                    .iter()
                    .map(|m| estimate_tokens(m, self.overhead_tokens))
                    .sum();
                let mean = total.div_ceil(corpus.len()).max(1);
                self.budget_tokens / mean
            }
        };
        derived.max(self.floor)
    }

    pub fn plan<'a>(&self, corpus: &'a [MessageRecord]) -> Vec<Batch<'a>> {
        split(corpus, self.batch_size_for(corpus))
    }
}

/// Split into consecutive chunks of `batch_size` (last one may be shorter).
/// An empty corpus yields no batches.
pub fn split(corpus: &[MessageRecord], batch_size: usize) -> Vec<Batch<'_>> {
    corpus
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, messages)| Batch {
            index,
            offset: index * batch_size.max(1),
            messages,
        })
        .collect()
}

/// Rough token estimate: ~4 chars per token plus fixed metadata overhead.
pub fn estimate_tokens(record: &MessageRecord, overhead_tokens: usize) -> usize {
    record.text.chars().count().div_ceil(4) + overhead_tokens
}
