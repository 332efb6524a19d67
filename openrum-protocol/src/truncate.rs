//! Length limits of the beacon wire format.

/// Maximum length of action, value, event and user names.
pub const MAX_NAME_LENGTH: usize = 250;

/// Maximum length of error and crash reasons.
pub const MAX_REASON_LENGTH: usize = 1_000;

/// Maximum length of stack traces.
pub const MAX_STACKTRACE_LENGTH: usize = 128_000;

fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

/// Trims surrounding whitespace and truncates a name to [`MAX_NAME_LENGTH`].
pub fn truncate_name(name: &str) -> &str {
    truncate_chars(name.trim(), MAX_NAME_LENGTH)
}

/// Truncates an error or crash reason to [`MAX_REASON_LENGTH`].
pub fn truncate_reason(reason: &str) -> &str {
    truncate_chars(reason, MAX_REASON_LENGTH)
}

/// Truncates a stack trace to [`MAX_STACKTRACE_LENGTH`].
///
/// When the trace has to be cut, the cut is placed at the last line break at
/// or before the limit so that no half line is transmitted. The line break
/// itself is the first excluded character; truncated traces never end in a
/// newline.
pub fn truncate_stacktrace(stacktrace: &str) -> &str {
    let truncated = truncate_chars(stacktrace, MAX_STACKTRACE_LENGTH);
    if truncated.len() == stacktrace.len() {
        return stacktrace;
    }

    match truncated.rfind('\n') {
        Some(index) => &truncated[..index],
        None => truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_pass_through() {
        assert_eq!(truncate_name("Home"), "Home");
    }

    #[test]
    fn test_names_are_trimmed_before_truncation() {
        assert_eq!(truncate_name("  Home  "), "Home");

        // 249 characters plus surrounding whitespace stays intact after the trim.
        let name = format!("  {}  ", "a".repeat(249));
        assert_eq!(truncate_name(&name).chars().count(), 249);
    }

    #[test]
    fn test_long_names_are_cut() {
        let name = "x".repeat(300);
        assert_eq!(truncate_name(&name).chars().count(), MAX_NAME_LENGTH);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let name = "ä".repeat(300);
        let truncated = truncate_name(&name);
        assert_eq!(truncated.chars().count(), MAX_NAME_LENGTH);
        assert!(name.starts_with(truncated));
    }

    #[test]
    fn test_reason_limit() {
        let reason = "r".repeat(2_000);
        assert_eq!(truncate_reason(&reason).chars().count(), MAX_REASON_LENGTH);
    }

    #[test]
    fn test_stacktrace_cuts_at_last_newline() {
        let line = "a".repeat(1_000);
        let mut trace = String::new();
        while trace.chars().count() <= MAX_STACKTRACE_LENGTH {
            trace.push_str(&line);
            trace.push('\n');
        }

        let truncated = truncate_stacktrace(&trace);
        assert!(truncated.chars().count() <= MAX_STACKTRACE_LENGTH);
        assert!(!truncated.ends_with('\n'));
        // The cut lands exactly on a line boundary.
        assert_eq!(truncated.chars().count() % (line.chars().count() + 1), line.chars().count());
    }

    #[test]
    fn test_stacktrace_without_newline_is_hard_cut() {
        let trace = "x".repeat(MAX_STACKTRACE_LENGTH + 10);
        let truncated = truncate_stacktrace(&trace);
        assert_eq!(truncated.chars().count(), MAX_STACKTRACE_LENGTH);
    }

    #[test]
    fn test_stacktrace_within_limit_is_untouched() {
        let trace = "first line\nsecond line";
        assert_eq!(truncate_stacktrace(trace), trace);
    }
}
