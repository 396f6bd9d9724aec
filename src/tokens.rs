//! Token estimation for sizing requests against token limits.
//!
//! The estimator is deliberately cheap: the broker only needs a stable
//! upper-bound signal for scheduling, not tokenizer-exact counts. Queues
//! receive it by injection; a queue constructed without one treats every
//! request as zero tokens, which disables token-based limits.

use std::sync::Arc;

/// Injected estimator: text in, non-negative token count out.
pub type TokenEstimator = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

/// Estimate the token count of a piece of text.
///
/// Roughly four characters per token for running text, floored at one
/// token per whitespace-separated word so that short dense strings are not
/// undercounted.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as u64;
    let words = text.split_whitespace().count() as u64;
    chars.div_ceil(4).max(words).max(1)
}

/// The default estimator, boxed for injection into queues.
pub fn default_estimator() -> TokenEstimator {
    Arc::new(estimate_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_short_text() {
        assert_eq!(estimate_tokens("hi"), 1);
    }

    #[test]
    fn test_chars_per_token_ratio() {
        // 40 chars of running text, ~10 tokens
        let text = "the quick brown fox jumps over the dog!";
        let estimate = estimate_tokens(text);
        assert!((8..=12).contains(&estimate), "got {estimate}");
    }

    #[test]
    fn test_word_floor() {
        // Many short words: the word count dominates the char/4 ratio
        assert_eq!(estimate_tokens("a b c d e f g h"), 8);
    }

    #[test]
    fn test_estimate_is_monotone_in_length() {
        let short = estimate_tokens("hello world");
        let long = estimate_tokens("hello world hello world hello world");
        assert!(long > short);
    }
}
