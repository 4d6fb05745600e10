use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Get or initialize the cl100k_base tokenizer. `None` if it failed to load.
fn tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "Failed to load cl100k_base tokenizer, using length heuristic");
                None
            }
        })
        .as_ref()
}

/// Token count using BPE tokenization (cl100k_base), or chars/4 if unavailable.
pub fn estimate_tokens(text: &str) -> u64 {
    match tokenizer() {
        Some(bpe) => bpe.encode_ordinary(text).len() as u64,
        None => (text.chars().count() / 4) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_longer_text_has_more_tokens() {
        let short = estimate_tokens("The fox waited.");
        let long = estimate_tokens(
            "The fox waited beneath the old oak while the crows argued about the cheese.",
        );
        assert!(short > 0);
        assert!(long > short);
    }
}
