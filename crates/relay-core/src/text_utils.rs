//! Text shaping for chat replies.

const ELLIPSIS: &str = "...";

/// Truncates `value` to at most `max_chars` characters, ending with `...` when cut.
pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut truncated = value.chars().take(keep).collect::<String>();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Splits `value` into chunks of at most `max_chars` characters.
///
/// Chunks break on line boundaries where possible; a single line longer than
/// the limit is split at character boundaries.
pub fn chunk_text(value: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0_usize;

    for line in value.split('\n') {
        let line_len = line.chars().count();
        let separator = usize::from(!current.is_empty());
        if current_len + separator + line_len <= max_chars {
            if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += separator + line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= max_chars {
            current.push_str(line);
            current_len = line_len;
            continue;
        }

        let chars = line.chars().collect::<Vec<_>>();
        for piece in chars.chunks(max_chars) {
            let piece = piece.iter().collect::<String>();
            if piece.chars().count() == max_chars {
                chunks.push(piece);
            } else {
                current_len = piece.chars().count();
                current = piece;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Removes executor bookkeeping markers from output before it is shown to users.
///
/// Drops `NAVIGATOR_STATUS` blocks (through the next `━` rule line),
/// `[SIGNAL:` lines, and lines carrying `TASK_COMPLETE` or `LOOP_CONTINUE`.
pub fn clean_internal_signals(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut skipping_block = false;

    for line in text.lines() {
        if line.contains("NAVIGATOR_STATUS") {
            skipping_block = true;
            continue;
        }
        if skipping_block {
            if line.trim_start().starts_with('━') {
                skipping_block = false;
            }
            continue;
        }
        if line.trim_start().starts_with("[SIGNAL:") {
            continue;
        }
        if line.contains("TASK_COMPLETE") || line.contains("LOOP_CONTINUE") {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}
