//! Coarse token estimate.
//!
//! Providers that do not expose a tokenizer fall back to this. It is an
//! approximation only: roughly four characters per token plus a small fixed
//! overhead for the role/turn framing.

/// Framing overhead charged once per message.
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    let body = chars.div_ceil(CHARS_PER_TOKEN);
    u32::try_from(body)
        .unwrap_or(u32::MAX)
        .saturating_add(MESSAGE_OVERHEAD_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_costs_overhead_only() {
        assert_eq!(estimate_tokens(""), MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn rounds_partial_tokens_up() {
        assert_eq!(estimate_tokens("abcd"), 1 + MESSAGE_OVERHEAD_TOKENS);
        assert_eq!(estimate_tokens("abcde"), 2 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("ñññ"), 1 + MESSAGE_OVERHEAD_TOKENS);
    }
}
