//! Keyword extraction shared by ingestion and query time.
//!
//! The rule is deliberately simple: lowercase, split on anything that is
//! not alphanumeric, drop stop words and single characters, de-duplicate
//! preserving first occurrence, cap at a fixed count. Both sides of the
//! hybrid search must use the same rule or keyword recall degrades.

/// English stop words excluded from keyword sets.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from",
    "had", "has", "have", "he", "her", "his", "if", "in", "into", "is",
    "it", "its", "no", "not", "of", "on", "or", "our", "she", "so", "such",
    "that", "the", "their", "then", "there", "these", "they", "this", "to",
    "was", "we", "were", "what", "when", "where", "which", "who", "will",
    "with", "you", "your",
];

/// Extract up to `max` keywords from `text`.
pub fn extract(text: &str, max: usize) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen: Vec<String> = Vec::new();

    for token in lower.split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 2 {
            continue;
        }
        if STOP_WORDS.contains(&token) {
            continue;
        }
        if seen.iter().any(|k| k == token) {
            continue;
        }
        seen.push(token.to_string());
        if seen.len() >= max {
            break;
        }
    }

    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        let kw = extract("The Termination FEE is $500!", 10);
        assert_eq!(kw, vec!["termination", "fee", "500"]);
    }

    #[test]
    fn drops_stop_words_and_single_chars() {
        let kw = extract("a b c of the and with x payment", 10);
        assert_eq!(kw, vec!["payment"]);
    }

    #[test]
    fn deduplicates_preserving_order() {
        let kw = extract("fee fee schedule fee schedule invoice", 10);
        assert_eq!(kw, vec!["fee", "schedule", "invoice"]);
    }

    #[test]
    fn caps_at_max() {
        let kw = extract("alpha beta gamma delta epsilon", 3);
        assert_eq!(kw, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn empty_text_yields_no_keywords() {
        assert!(extract("", 10).is_empty());
        assert!(extract("  ... !!", 10).is_empty());
    }
}
