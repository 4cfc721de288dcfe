//! Small deterministic text helpers shared by the materializer and the
//! retrieval pipeline.
//!
//! Grounded in the teacher's `search/text.rs` (`build_email_embedding_text`,
//! `normalize_whitespace`); the patch-section stripping that module also did
//! has no counterpart here, since this system's messages carry no patch
//! concept.

const BODY_CHARS_FOR_EMBEDDING: usize = 1000;

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compose the embedding input for a message: `subject \n\n body[0..1000]`
/// (SPEC_FULL.md §4.3 step 8).
pub fn build_embedding_text(subject: &str, body: &str) -> String {
    let subject = normalize_whitespace(subject);
    let truncated_body: String = body.chars().take(BODY_CHARS_FOR_EMBEDDING).collect();
    let body = normalize_whitespace(&truncated_body);
    format!("{subject}\n\n{body}")
}

/// Lowercase, alphanumeric tokens of length > `min_len`, used to build the
/// lexical query's `tsquery` (SPEC_FULL.md §4.5 step 2).
pub fn tokenize_for_lexical(text: &str, min_len: usize) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|tok| tok.to_lowercase())
        .filter(|tok| tok.chars().count() > min_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_embedding_text_joins_subject_and_truncated_body() {
        let text = build_embedding_text("  Hello   World  ", "body text here");
        assert_eq!(text, "Hello World\n\nbody text here");
    }

    #[test]
    fn build_embedding_text_truncates_body_to_1000_chars() {
        let long_body = "a".repeat(2000);
        let text = build_embedding_text("subj", &long_body);
        let body_part = text.splitn(3, "\n\n").nth(1).unwrap();
        assert_eq!(body_part.chars().count(), BODY_CHARS_FOR_EMBEDDING);
    }

    #[test]
    fn tokenize_for_lexical_drops_short_tokens_and_punctuation() {
        let tokens = tokenize_for_lexical("Re: the cat sat!", 2);
        assert_eq!(tokens, vec!["the", "cat", "sat"]);
    }
}
