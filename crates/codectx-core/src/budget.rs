//! Token-budget packing for RAG context assembly.
//!
//! A total token budget is split into three independent sub-budgets (code,
//! documentation, conversation history) by weight. Each sub-budget is then
//! packed greedily:
//!
//! - Snippets are considered in descending relevance order.
//! - A snippet larger than a fixed fraction of its sub-budget is truncated
//!   to that fraction rather than dropped.
//! - A snippet that would overflow the count cap or the remaining tokens is
//!   skipped; smaller later snippets may still fit.
//! - Once three or more distinct files are represented, further snippets
//!   from an already-represented file are skipped.
//! - History is packed newest-first and restored to chronological order;
//!   the first turn that does not fit ends packing.
//!
//! Weights are not normalized. Weights summing to more than 1.0 let the
//! three sub-budgets jointly exceed the nominal total.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::chunk::{estimate_tokens, CHARS_PER_TOKEN};
use crate::models::{ContextSnippet, ConversationTurn};

/// Distinct files after which already-represented files are capped.
pub const DIVERSITY_FILE_THRESHOLD: usize = 3;

/// Largest share of the code sub-budget a single snippet may take.
pub const CODE_SNIPPET_FRACTION: f32 = 0.3;

/// Largest share of the docs sub-budget a single snippet may take.
pub const DOC_SNIPPET_FRACTION: f32 = 0.5;

/// Relative weights of the three sub-budgets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetWeights {
    pub code: f32,
    pub docs: f32,
    pub history: f32,
}

impl Default for BudgetWeights {
    fn default() -> Self {
        Self {
            code: 0.6,
            docs: 0.2,
            history: 0.2,
        }
    }
}

/// Token allowance per section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBudgets {
    pub code: usize,
    pub docs: usize,
    pub history: usize,
}

impl BudgetWeights {
    /// Split `total` tokens by weight, rounding each share down. Negative
    /// weights count as zero.
    pub fn split(&self, total: usize) -> SubBudgets {
        let share = |w: f32| (total as f64 * w.max(0.0) as f64).floor() as usize;
        SubBudgets {
            code: share(self.code),
            docs: share(self.docs),
            history: share(self.history),
        }
    }
}

/// Limits for one packing pass.
#[derive(Debug, Clone, Copy)]
pub struct PackLimits {
    pub budget: usize,
    pub max_items: usize,
    pub max_single_fraction: f32,
}

/// A retrieved piece of content competing for a sub-budget.
#[derive(Debug, Clone)]
pub struct SnippetCandidate {
    pub source_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub symbol: Option<String>,
    pub content: String,
    pub relevance: f32,
}

/// Greedily pack candidates into `limits.budget` tokens.
///
/// Returns the packed snippets in descending relevance order and the total
/// tokens they use.
pub fn pack_snippets(
    mut candidates: Vec<SnippetCandidate>,
    limits: PackLimits,
) -> (Vec<ContextSnippet>, usize) {
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let single_cap = (limits.budget as f64 * limits.max_single_fraction as f64).floor() as usize;
    let mut packed = Vec::new();
    let mut used = 0usize;
    let mut files: BTreeSet<String> = BTreeSet::new();

    for candidate in candidates {
        if packed.len() >= limits.max_items {
            break;
        }
        if files.len() >= DIVERSITY_FILE_THRESHOLD && files.contains(&candidate.source_path) {
            continue;
        }

        let mut content = candidate.content;
        let mut tokens = estimate_tokens(&content);
        let mut truncated = false;
        if tokens > single_cap {
            content = truncate_to_tokens(&content, single_cap);
            tokens = estimate_tokens(&content);
            truncated = true;
        }
        if tokens == 0 || used + tokens > limits.budget {
            continue;
        }

        used += tokens;
        files.insert(candidate.source_path.clone());
        packed.push(ContextSnippet {
            source_path: candidate.source_path,
            start_line: candidate.start_line,
            end_line: candidate.end_line,
            symbol: candidate.symbol,
            content,
            relevance: candidate.relevance,
            tokens,
            truncated,
        });
    }

    (packed, used)
}

/// Pack conversation history newest-first into `budget` tokens, returning
/// the kept turns in chronological order and their token count.
pub fn pack_history(history: &[ConversationTurn], budget: usize) -> (Vec<ConversationTurn>, usize) {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for turn in history.iter().rev() {
        let tokens = estimate_tokens(&turn.content);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        kept.push(turn.clone());
    }
    kept.reverse();
    (kept, used)
}

/// Cut `text` to at most `max_tokens` estimated tokens, preferring to end
/// on a line break.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let byte_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let prefix = &text[..byte_end];
    match prefix.rfind('\n') {
        Some(pos) if pos > 0 => prefix[..pos].to_string(),
        _ => prefix.to_string(),
    }
}
