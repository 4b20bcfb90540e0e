pub mod oracle;

pub use oracle::{Oracle, OpenRouterClient};

use indoc::indoc;

/// Appended to the user-supplied prompt so replies always lead with a
/// structured verdict marker the caller can match on.
const RESULT_MARKER_INSTRUCTION: &str = indoc! {"
    Start your reply with <RESULT>YES</RESULT> if the email matches the
    description above, or <RESULT>NO</RESULT> if it does not. You may add a
    short justification after the marker.
"};

/// The system prompt sent to the oracle: the user's classification prompt
/// plus the fixed verdict-marker instruction.
pub fn classification_system_prompt(user_prompt: &str) -> String {
    format!("{}\n\n{}", user_prompt.trim(), RESULT_MARKER_INSTRUCTION)
}

/// The oracle is an opaque yes/no text function: any reply containing an
/// affirmative token counts as a spam verdict.
pub fn is_affirmative(answer: &str) -> bool {
    answer.to_lowercase().contains("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_carries_user_prompt_and_marker_instruction() {
        let prompt = classification_system_prompt("Identify abandoned basket spam.");
        assert!(prompt.starts_with("Identify abandoned basket spam."));
        assert!(prompt.contains("<RESULT>YES</RESULT>"));
        assert!(prompt.contains("<RESULT>NO</RESULT>"));
    }

    #[test]
    fn affirmative_detection_is_case_insensitive() {
        assert!(is_affirmative("<RESULT>YES</RESULT> promotional"));
        assert!(is_affirmative("Yes, this is spam"));
        assert!(!is_affirmative("<RESULT>NO</RESULT> looks legitimate"));
    }
}
