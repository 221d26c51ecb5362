//! Token Counter: deterministic per-provider-family estimation, matched
//! to model_id prefix.
//!
//! The actual tokenizer comes from `tiktoken-rs`; providers without a
//! published BPE vocabulary fall back to a whitespace heuristic.

use tiktoken_rs::{cl100k_base, CoreBPE};

/// A family-specific counting strategy. Each `Adapter` owns one matched to
/// its provider.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str, model_id: &str) -> u32;
}

/// BPE-based counter shared by providers whose tokenizer is a reasonable
/// approximation of OpenAI's `cl100k_base` encoding (OpenAI exactly;
/// Anthropic/Google close enough for budgeting purposes, since the gateway
/// only needs a deterministic *estimate*, not provider-exact counts --
/// the adapters reconcile against actual provider-reported usage after
/// the call completes).
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn new() -> Self {
        Self {
            bpe: cl100k_base().expect("cl100k_base ranks are bundled with tiktoken-rs"),
        }
    }
}

impl Default for BpeTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count_tokens(&self, text: &str, _model_id: &str) -> u32 {
        self.bpe.encode_with_special_tokens(text).len() as u32
    }
}

/// Cheap whitespace-based fallback for self-hosted models whose tokenizer
/// is unknown to the gateway; errs high so downstream budget checks stay
/// conservative.
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count_tokens(&self, text: &str, _model_id: &str) -> u32 {
        // Roughly 1.3 tokens per whitespace-delimited word for English text.
        let words = text.split_whitespace().count();
        ((words as f64) * 1.3).ceil() as u32
    }
}

/// Sums token counts across a sequence of message bodies, as used when
/// estimating `estimated_input_tokens` for routing before a specific
/// adapter has been selected.
pub fn estimate_messages(counter: &dyn TokenCounter, model_id: &str, texts: &[&str]) -> u32 {
    texts.iter().map(|t| counter.count_tokens(t, model_id)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpe_counter_is_deterministic() {
        let counter = BpeTokenCounter::new();
        let a = counter.count_tokens("What is 2+2?", "claude-haiku-3-5");
        let b = counter.count_tokens("What is 2+2?", "claude-haiku-3-5");
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn whitespace_counter_scales_with_word_count() {
        let counter = WhitespaceTokenCounter;
        let short = counter.count_tokens("hello world", "local-llama");
        let long = counter.count_tokens("hello world hello world hello world", "local-llama");
        assert!(long > short);
    }
}
