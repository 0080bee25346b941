//! Foundational low-level utilities shared across relay crates.
//!
//! Provides the conversation key that shards all per-conversation state,
//! clock helpers used for task ids and expiry bookkeeping, plus the chat-safe
//! text shaping applied to executor output before it is posted.

pub mod conversation_key;
pub mod text_utils;
pub mod time_utils;

pub use conversation_key::ConversationKey;
pub use text_utils::{chunk_text, clean_internal_signals, truncate_text};
pub use time_utils::{current_unix_timestamp, format_elapsed};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_unix_timestamp_is_after_2023() {
        assert!(current_unix_timestamp() > 1_672_531_200);
    }

    #[test]
    fn unit_text_helpers_are_reexported() {
        assert_eq!(truncate_text("abcdef", 5), "ab...");
        assert_eq!(chunk_text("a\nb", 10), vec!["a\nb".to_string()]);
        assert_eq!(clean_internal_signals("  ok  "), "ok");
    }
}
