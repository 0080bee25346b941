//! Pattern tables and the precedence chain behind [`detect_intent`].

use std::sync::LazyLock;

use regex::Regex;

use crate::intent::Intent;

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hola",
    "yo",
    "sup",
    "good morning",
    "good afternoon",
    "good evening",
    "howdy",
    "greetings",
    "what's up",
    "whats up",
];

const QUESTION_STARTERS: &[&str] = &[
    "what is",
    "what are",
    "what's",
    "whats",
    "what does",
    "what do",
    "how do",
    "how does",
    "how can",
    "how to",
    "where is",
    "where are",
    "where's",
    "why is",
    "why are",
    "why does",
    "when is",
    "when does",
    "when will",
    "which",
    "who is",
    "who are",
    "can you tell",
    "could you explain",
    "do you know",
    "is there",
    "are there",
];

const CLEAR_QUESTION_STARTERS: &[&str] = &[
    "what's in",
    "what is in",
    "whats in",
    "what's the",
    "what is the",
    "whats the",
    "how does",
    "how do",
    "how can",
    "where is",
    "where are",
    "where's",
    "why is",
    "why are",
    "why does",
    "when is",
    "when does",
    "when will",
    "who is",
    "who are",
    "which",
    "can you explain",
    "could you explain",
];

const INFO_KEYWORDS: &[&str] = &[
    "issues", "tasks", "backlog", "todos", "fixmes", "status", "progress", "state",
];

const QUESTION_PHRASES: &[&str] = &[
    "tell me about",
    "explain",
    "describe",
    "show me",
    "list all",
    "find all",
    "list",
];

const CHAT_PHRASES: &[&str] = &[
    "what do you think",
    "opinion on",
    "thoughts about",
    "do you recommend",
    "should i",
    "is it better",
    "discuss",
    "let's talk about",
    "lets talk about",
];

const MODIFICATION_WORDS: &[&str] = &[
    "fix",
    "add",
    "update",
    "change",
    "modify",
    "write",
    "create",
    "implement",
    "refactor",
];

const EPHEMERAL_STARTS: &[&str] = &[
    "serve",
    "run",
    "start",
    "launch",
    "boot",
    "npm run",
    "yarn",
    "pnpm",
    "cargo run",
    "go run",
    "python -m",
    "make dev",
    "make serve",
    "make run",
    "make start",
];

const EPHEMERAL_POLITE_PREFIXES: &[&str] =
    &["please ", "can you ", "could you ", "i need to ", "i want to "];

const EPHEMERAL_MENTIONS: &[&str] = &[
    "dev server",
    "local server",
    "localhost",
    "development server",
    "preview server",
];

const EPHEMERAL_STANDALONE: &[&str] = &[
    "check", "test", "validate", "verify", "lint", "format", "build", "compile", "bundle",
];

static ACTION_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\b(?:please|can you|i need|i want) )(?:create|add|make|build|implement|fix|update|modify|change|edit|delete|remove|refactor|write|generate|setup|configure|install|prioritize|reprioritize|reorder|sort|organize|rank|triage|set priority)\b",
    )
    .ok()
});

static RESEARCH_VERB: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\b(?:please|can you|i need|i want) )(?:research|analyze|review|investigate|summarize|compare|evaluate|assess)\b",
    )
    .ok()
});

static PLANNING_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\b(?:plan|design|strategy|how should we|approach for|architect|outline)\b").ok()
});

static TASK_REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"task[- ]?\d+|#\d+|\d{2,}|\.\w{2,4}$|\b(?:pick|select|open|show|do|run|work on|start)\b",
    )
    .ok()
});

fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Classifies `text` with the fixed precedence chain:
/// command, greeting, research, planning, chat, question, task.
pub fn detect_intent(text: &str) -> Intent {
    let message = normalize(text);
    if message.starts_with('/') {
        return Intent::Command;
    }
    if is_greeting(&message) {
        return Intent::Greeting;
    }
    if is_research(&message) {
        return Intent::Research;
    }
    if is_planning(&message) {
        return Intent::Planning;
    }
    // Opinion phrasing like "what do you think" would otherwise read as a question.
    if is_chat(&message) && !contains_action_word(&message) {
        return Intent::Chat;
    }
    if is_question(&message) {
        return Intent::Question;
    }
    // Action verbs and task references land here too; anything unmatched is a task.
    Intent::Task
}

/// Short messages (at most three words) that are, or open with, a greeting.
pub fn is_greeting(text: &str) -> bool {
    let message = normalize(text);
    if message.split_whitespace().count() > 3 {
        return false;
    }
    GREETINGS.iter().any(|greeting| {
        message == *greeting
            || message
                .strip_prefix(greeting)
                .is_some_and(|rest| rest.starts_with([' ', '!', ',']))
    })
}

pub fn is_research(text: &str) -> bool {
    matches(&RESEARCH_VERB, &normalize(text))
}

pub fn is_planning(text: &str) -> bool {
    matches(&PLANNING_WORD, &normalize(text))
}

pub fn is_chat(text: &str) -> bool {
    let message = normalize(text);
    CHAT_PHRASES.iter().any(|phrase| message.contains(phrase))
}

pub fn is_question(text: &str) -> bool {
    let message = normalize(text);
    if message.ends_with('?') {
        return true;
    }
    if QUESTION_STARTERS
        .iter()
        .any(|starter| message.starts_with(starter))
    {
        return true;
    }
    if contains_action_word(&message) {
        return false;
    }
    INFO_KEYWORDS
        .iter()
        .chain(QUESTION_PHRASES)
        .any(|keyword| message.contains(keyword))
}

/// An action verb at the start or right after "please", "can you", "i need", "i want".
pub fn contains_action_word(text: &str) -> bool {
    matches(&ACTION_WORD, &normalize(text))
}

/// Task ids, issue numbers, file names and pick/open/run style references.
pub fn contains_task_reference(text: &str) -> bool {
    matches(&TASK_REFERENCE, &normalize(text))
}

/// High-confidence question check, used before consulting an external classifier.
pub fn is_clear_question(text: &str) -> bool {
    let message = normalize(text);
    message.ends_with('?')
        || CLEAR_QUESTION_STARTERS
            .iter()
            .any(|starter| message.starts_with(starter))
}

pub fn contains_modification_intent(text: &str) -> bool {
    let message = normalize(text);
    MODIFICATION_WORDS.iter().any(|word| message.contains(word))
}

/// Run-style requests that should not open a pull request
/// ("run the dev server", "npm run dev", a bare "lint").
pub fn is_ephemeral_task(description: &str) -> bool {
    let description = normalize(description);
    if contains_modification_intent(&description) {
        return false;
    }

    let starts_ephemeral = EPHEMERAL_STARTS.iter().any(|start| {
        description.starts_with(start)
            || EPHEMERAL_POLITE_PREFIXES.iter().any(|prefix| {
                description
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with(start))
            })
    });
    if starts_ephemeral {
        return true;
    }
    if EPHEMERAL_MENTIONS
        .iter()
        .any(|mention| description.contains(mention))
    {
        return true;
    }

    description.split_whitespace().count() <= 4
        && EPHEMERAL_STANDALONE.iter().any(|word| {
            description == *word
                || description
                    .strip_prefix(word)
                    .is_some_and(|rest| rest.starts_with(' '))
        })
}
