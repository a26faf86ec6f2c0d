//! Text normalisation shared by keyword scanning and the classifiers.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static NON_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z\s]").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanText {
    pub text: String,
    pub word_count: usize,
}

impl CleanText {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Counts how many of `keywords` occur at least once.
    pub fn count_matches<S: AsRef<str>>(&self, keywords: &[S]) -> usize {
        keywords
            .iter()
            .filter(|keyword| self.contains(keyword.as_ref()))
            .count()
    }

    pub fn matches<'a, S: AsRef<str>>(&self, keywords: &'a [S]) -> Vec<&'a str> {
        keywords
            .iter()
            .map(|keyword| keyword.as_ref())
            .filter(|keyword| self.contains(keyword))
            .collect()
    }

    pub fn contains_any<S: AsRef<str>>(&self, keywords: &[S]) -> bool {
        keywords.iter().any(|keyword| self.contains(keyword.as_ref()))
    }

    fn contains(&self, keyword: &str) -> bool {
        !keyword.is_empty() && self.text.contains(keyword)
    }

    /// Word tokens of two or more letters, minus stop words.
    pub fn tokens<'a>(&'a self, stop_words: &'a HashSet<String>) -> impl Iterator<Item = &'a str> + 'a {
        self.text
            .split(' ')
            .filter(move |token| token.len() >= 2 && !stop_words.contains(*token))
    }
}

/// Lower-cases, strips everything but letters and whitespace, collapses runs of whitespace.
pub fn normalize(raw: &str) -> CleanText {
    let lowered = raw.to_lowercase();
    let letters = NON_LETTER.replace_all(&lowered, " ");
    let text = WHITESPACE.replace_all(&letters, " ").trim().to_string();
    let word_count = if text.is_empty() {
        0
    } else {
        text.split(' ').count()
    };
    CleanText { text, word_count }
}

pub fn combine(title: &str, description: &str) -> CleanText {
    normalize(&format!("{title} {description}"))
}

/// Normalises a keyword list so multi-word and hyphenated entries match cleaned text.
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|keyword| normalize(keyword).text)
        .filter(|keyword| !keyword.is_empty())
        .collect()
}

pub const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
    "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
    "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "down",
    "during", "each", "few", "for", "from", "further", "had", "has", "have", "having",
    "he", "her", "here", "hers", "herself", "him", "himself", "his", "how", "if", "in",
    "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my", "myself",
    "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our",
    "ours", "ourselves", "out", "over", "own", "same", "she", "should", "so", "some",
    "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until",
    "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

pub fn english_stop_words() -> HashSet<String> {
    ENGLISH_STOP_WORDS.iter().map(|word| word.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_collapses_whitespace() {
        let clean = normalize("  Burst PIPE!!  on 5th   street... ");
        assert_eq!(clean.text, "burst pipe on th street");
        assert_eq!(clean.word_count, 5);
    }

    #[test]
    fn empty_input_is_empty_output() {
        let clean = normalize("");
        assert!(clean.is_empty());
        assert_eq!(clean.word_count, 0);
        assert_eq!(normalize("?!#").word_count, 0);
    }

    #[test]
    fn keyword_matches_count_presence_not_occurrences() {
        let clean = combine("Leak leak", "another leak near the pipe");
        let keywords = vec!["leak".to_string(), "pipe".to_string(), "fire".to_string()];
        assert_eq!(clean.count_matches(&keywords), 2);
        assert_eq!(clean.matches(&keywords), vec!["leak", "pipe"]);
    }

    #[test]
    fn hyphenated_keywords_match_after_normalisation() {
        let keywords = normalize_keywords(&["Life-Threatening".to_string()]);
        let clean = normalize("A life-threatening hazard");
        assert_eq!(clean.count_matches(&keywords), 1);
    }

    #[test]
    fn tokens_skip_stop_words_and_single_letters() {
        let clean = normalize("the pothole on a main road");
        let stop = english_stop_words();
        let tokens: Vec<&str> = clean.tokens(&stop).collect();
        assert_eq!(tokens, vec!["pothole", "main", "road"]);
    }
}
