//! Text normalisation and language detection
//!
//! Normalisation lowercases, strips URLs, e-mail addresses and
//! @-mentions, and collapses whitespace. Language detection is a cheap
//! stopword heuristic: it only distinguishes "looks like English" from
//! "does not", and returns `None` when inconclusive rather than guessing.

/// Common English function words used by the detector.
const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "to", "of", "and", "or", "in", "on",
    "it", "this", "that", "for", "with", "not", "but", "have", "has", "had", "i", "you", "we",
    "they", "my", "your", "very", "so", "me", "at", "as", "do", "did", "can", "will", "would",
];

fn is_url_start(word: &str) -> bool {
    word.starts_with("http://") || word.starts_with("https://") || word.starts_with("www.")
}

fn is_email(word: &str) -> bool {
    let Some(at) = word.find('@') else {
        return false;
    };
    at > 0 && word[at + 1..].contains('.')
}

fn is_mention(word: &str) -> bool {
    word.len() > 1
        && word.starts_with('@')
        && word[1..].chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Normalise a feedback body: lowercase, drop URLs/e-mails/mentions,
/// collapse runs of whitespace. Returns an empty string for junk input.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());

    for word in lowered.split_whitespace() {
        if is_url_start(word) || is_email(word) || is_mention(word) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }

    out
}

/// Best-effort language detection over normalised text.
///
/// Returns `Some("en")` when enough English stopwords appear, `None` when
/// the heuristic cannot tell. Failure to detect never rejects a row.
pub fn detect_language(normalized: &str) -> Option<&'static str> {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    // Non-ASCII-dominant text is outside this detector's competence
    let ascii_alpha = normalized
        .chars()
        .filter(|c| c.is_alphabetic())
        .filter(|c| c.is_ascii())
        .count();
    let total_alpha = normalized.chars().filter(|c| c.is_alphabetic()).count();
    if total_alpha > 0 && (ascii_alpha as f64 / total_alpha as f64) < 0.8 {
        return None;
    }

    let hits = words
        .iter()
        .filter(|w| {
            let trimmed = w.trim_matches(|c: char| !c.is_alphanumeric());
            ENGLISH_STOPWORDS.contains(&trimmed)
        })
        .count();

    // Short texts need one hit, longer texts a modest ratio
    let threshold = if words.len() <= 4 {
        1
    } else {
        (words.len() / 8).max(1)
    };

    if hits >= threshold {
        Some("en")
    } else {
        None
    }
}

/// Outcome of the combined normalise-and-gate step used at ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedText {
    pub normalized: String,
    pub detected_language: Option<&'static str>,
    /// False when the English-only gate rejects the row or the body
    /// normalises to nothing.
    pub should_process: bool,
}

/// Normalise, detect language, and apply the English-only gate.
pub fn process_text(text: &str, english_only: bool) -> ProcessedText {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return ProcessedText {
            normalized,
            detected_language: None,
            should_process: false,
        };
    }

    let detected_language = detect_language(&normalized);

    // The gate only drops rows positively detected as another language;
    // inconclusive detection lets the row through.
    let should_process = !(english_only && detected_language.is_none() && looks_non_english(&normalized));

    ProcessedText {
        normalized,
        detected_language,
        should_process,
    }
}

/// True when the text is confidently not English (non-ASCII alphabetic
/// majority). A plain "no stopword hits" is not enough to reject.
fn looks_non_english(normalized: &str) -> bool {
    let ascii_alpha = normalized
        .chars()
        .filter(|c| c.is_alphabetic())
        .filter(|c| c.is_ascii())
        .count();
    let total_alpha = normalized.chars().filter(|c| c.is_alphabetic()).count();
    total_alpha > 0 && (ascii_alpha as f64 / total_alpha as f64) < 0.5
}

/// The dedup key used within a batch: (normalised text, source, customer).
pub fn dedup_key(normalized: &str, source: &str, customer_id: Option<&str>) -> String {
    format!("{normalized}\u{1}{source}\u{1}{}", customer_id.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_and_collapses() {
        assert_eq!(normalize_text("  Great   PRODUCT!  "), "great product!");
    }

    #[test]
    fn test_normalize_strips_urls_emails_mentions() {
        let input = "Contact me at bob@example.com or https://example.com @support thanks";
        assert_eq!(normalize_text(input), "contact me at or thanks");
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_detect_english() {
        assert_eq!(detect_language("the product is very good"), Some("en"));
        assert_eq!(detect_language("produkt zepsuty reklamacja"), None);
        assert_eq!(detect_language(""), None);
    }

    #[test]
    fn test_detect_rejects_non_ascii_majority() {
        assert_eq!(detect_language("товар сломался очень плохо"), None);
    }

    #[test]
    fn test_process_text_gates_confident_non_english() {
        let p = process_text("товар сломался очень плохо", true);
        assert!(!p.should_process);

        // Inconclusive Latin-script text passes through
        let p = process_text("zzz qqq xxx", true);
        assert!(p.should_process);

        // Gate off: everything passes
        let p = process_text("товар сломался", false);
        assert!(p.should_process);
    }

    #[test]
    fn test_process_text_rejects_empty() {
        let p = process_text("@mention", true);
        assert!(!p.should_process);
        assert_eq!(p.normalized, "");
    }

    #[test]
    fn test_dedup_key_distinguishes_fields() {
        let a = dedup_key("great", "web", Some("c1"));
        let b = dedup_key("great", "web", Some("c2"));
        let c = dedup_key("great", "app", Some("c1"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, dedup_key("great", "web", Some("c1")));
    }
}
