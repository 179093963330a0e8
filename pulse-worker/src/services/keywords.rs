//! Keyword extraction for topic label synthesis

use std::collections::HashMap;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "to", "of", "and", "or", "in",
    "on", "it", "its", "this", "that", "for", "with", "not", "but", "have", "has", "had", "i",
    "you", "we", "they", "my", "your", "our", "their", "very", "so", "me", "at", "as", "do",
    "did", "does", "can", "will", "would", "should", "just", "too", "also", "there", "when",
    "what", "all", "am", "im", "get", "got", "if", "from", "by", "about",
];

/// Top keywords across a set of normalised texts, most frequent first.
/// Ties break alphabetically so the output is stable.
pub fn top_keywords(texts: &[&str], limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for text in texts {
        for token in text.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.len() < 3 || STOPWORDS.contains(&token) {
                continue;
            }
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

/// Synthesise a topic label from its top keywords.
pub fn synthesize_label(keywords: &[String]) -> String {
    if keywords.is_empty() {
        return "miscellaneous".to_string();
    }
    keywords
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(" / ")
}
