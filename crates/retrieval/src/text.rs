//! Query term extraction shared by the index backends.

/// Words too common to carry any ranking signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "i", "in",
    "is", "it", "me", "of", "on", "or", "our", "the", "this", "to", "was", "we", "what", "when",
    "where", "which", "who", "why", "with", "you",
];

/// Lowercased, de-duplicated search terms in input order.
pub(crate) fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.is_empty() {
            continue;
        }
        let word = word.to_lowercase();
        if STOPWORDS.contains(&word.as_str()) || out.contains(&word) {
            continue;
        }
        out.push(word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_punctuation_stopwords_and_repeats() {
        assert_eq!(
            terms("What is the Budget? budget, per-team!"),
            vec!["budget", "per", "team"]
        );
    }

    #[test]
    fn keeps_non_latin_runs() {
        assert_eq!(terms("予算 2024"), vec!["予算", "2024"]);
    }
}
