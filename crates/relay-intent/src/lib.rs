//! Intent detection for inbound chat messages.
//!
//! [`detect_intent`] is a deterministic pattern engine with a fixed
//! precedence chain. [`classify_with_fallback`] optionally consults an
//! external [`IntentClassifier`] under a time bound and falls back to the
//! pattern engine on timeout or error.

mod classifier;
mod intent;
mod patterns;

pub use classifier::{classify_with_fallback, ClassifierError, IntentClassifier};
pub use intent::Intent;
pub use patterns::{
    contains_action_word, contains_modification_intent, contains_task_reference, detect_intent,
    is_chat, is_clear_question, is_ephemeral_task, is_greeting, is_planning, is_question,
    is_research,
};
