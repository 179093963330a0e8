//! Sentiment and toxicity scoring
//!
//! The annotate stage treats the model as a pure function with a declared
//! version tag. Two backends exist: a fast lexicon scorer (default) and a
//! remote transformer endpoint selected by the remote-sentiment feature
//! flag. Remote failures surface as `Unavailable` so the job layer can
//! retry with backoff.

use pulse_common::error::{Error, Result};
use serde::Deserialize;

/// Lexicon model version tag stamped onto annotations.
pub const LEXICON_VERSION: &str = "lexicon-v1";

/// Compound-score thresholds separating the three classes.
const POSITIVE_THRESHOLD: f64 = 0.05;
const NEGATIVE_THRESHOLD: f64 = -0.05;

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "amazing", "awesome", "love", "loved", "loves", "fantastic",
    "wonderful", "perfect", "best", "helpful", "easy", "fast", "reliable", "happy", "pleased",
    "satisfied", "smooth", "intuitive", "responsive", "recommend", "superb", "brilliant",
    "delightful", "impressed", "outstanding", "works", "thanks", "thank",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "hate", "hated", "hates", "worst", "broken",
    "slow", "buggy", "crash", "crashes", "crashed", "useless", "confusing", "frustrating",
    "frustrated", "disappointed", "disappointing", "poor", "expensive", "unreliable", "annoying",
    "difficult", "fails", "failed", "failure", "refund", "cancel", "cancelled", "unusable",
    "waste", "scam", "wrong", "missing", "stuck",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "isn't", "wasn't", "don't", "doesn't", "didn't", "can't", "won't"];

const TOXIC_WORDS: &[&str] = &[
    "idiot", "idiots", "stupid", "moron", "morons", "dumb", "trash", "garbage", "pathetic",
    "incompetent", "clowns", "liars", "fraud", "hell", "damn", "crap", "sucks",
];

/// Outcome of one sentiment analysis: class in {-1, 0, 1} and a compound
/// score in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentResult {
    pub class: i64,
    pub score: f64,
}

fn classify(score: f64) -> i64 {
    if score >= POSITIVE_THRESHOLD {
        1
    } else if score <= NEGATIVE_THRESHOLD {
        -1
    } else {
        0
    }
}

/// Lexicon scorer over normalised text. Deterministic, version-tagged.
pub fn analyze_lexicon(text: &str) -> SentimentResult {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .collect();

    let mut signal = 0.0f64;
    let mut hits = 0usize;

    for (i, word) in words.iter().enumerate() {
        let polarity = if POSITIVE_WORDS.contains(word) {
            1.0
        } else if NEGATIVE_WORDS.contains(word) {
            -1.0
        } else {
            continue;
        };

        // A negation directly before the hit flips its polarity
        let negated = i > 0 && NEGATIONS.contains(&words[i - 1]);
        signal += if negated { -polarity } else { polarity };
        hits += 1;
    }

    if hits == 0 {
        return SentimentResult { class: 0, score: 0.0 };
    }

    // Dampen toward [-1, 1]; more agreeing hits push the magnitude up
    let score = (signal / (hits as f64).sqrt() / 2.0).clamp(-1.0, 1.0);
    SentimentResult {
        class: classify(score),
        score,
    }
}

/// Toxicity as the share of toxic terms, scaled. `None` for empty text so
/// the column stays nullable for unscorable rows.
pub fn toxicity_score(text: &str) -> Option<f64> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .collect();
    if words.is_empty() {
        return None;
    }

    let toxic = words.iter().filter(|w| TOXIC_WORDS.contains(w)).count();
    Some(((toxic as f64 / words.len() as f64) * 5.0).min(1.0))
}

/// Response shape of the remote sentiment endpoint.
#[derive(Debug, Deserialize)]
struct RemoteSentimentResponse {
    label: String,
    score: f64,
}

/// Client for a remote transformer sentiment endpoint.
pub struct RemoteSentimentClient {
    client: reqwest::Client,
    url: String,
}

impl RemoteSentimentClient {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub async fn analyze(&self, text: &str) -> Result<SentimentResult> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("Sentiment endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Unavailable(format!(
                "Sentiment endpoint returned {}",
                response.status()
            )));
        }

        let parsed: RemoteSentimentResponse = response
            .json()
            .await
            .map_err(|e| Error::Unavailable(format!("Bad sentiment endpoint payload: {e}")))?;

        let (class, score) = match parsed.label.as_str() {
            "positive" => (1, parsed.score.abs()),
            "negative" => (-1, -parsed.score.abs()),
            _ => (0, 0.0),
        };
        Ok(SentimentResult { class, score })
    }
}

/// Backend selected at startup from the feature flags.
pub enum SentimentAnalyzer {
    Lexicon,
    Remote { client: RemoteSentimentClient, version: String },
}

impl SentimentAnalyzer {
    pub fn from_flags(remote_sentiment: bool, model_url: &str) -> Self {
        if remote_sentiment && !model_url.is_empty() {
            SentimentAnalyzer::Remote {
                client: RemoteSentimentClient::new(model_url.to_string()),
                version: "remote-transformer-v1".to_string(),
            }
        } else {
            SentimentAnalyzer::Lexicon
        }
    }

    pub fn version(&self) -> &str {
        match self {
            SentimentAnalyzer::Lexicon => LEXICON_VERSION,
            SentimentAnalyzer::Remote { version, .. } => version,
        }
    }

    pub async fn analyze(&self, text: &str) -> Result<SentimentResult> {
        match self {
            SentimentAnalyzer::Lexicon => Ok(analyze_lexicon(text)),
            SentimentAnalyzer::Remote { client, .. } => client.analyze(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_text() {
        let r = analyze_lexicon("great product works perfectly love it");
        assert_eq!(r.class, 1);
        assert!(r.score > 0.0);
    }

    #[test]
    fn test_negative_text() {
        let r = analyze_lexicon("terrible app keeps crashing total waste");
        assert_eq!(r.class, -1);
        assert!(r.score < 0.0);
    }

    #[test]
    fn test_neutral_text() {
        let r = analyze_lexicon("the delivery arrived on tuesday");
        assert_eq!(r.class, 0);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn test_negation_flips_polarity() {
        let r = analyze_lexicon("this is not good");
        assert_eq!(r.class, -1);
    }

    #[test]
    fn test_score_bounded() {
        let r = analyze_lexicon("great great great great great great great great");
        assert!(r.score <= 1.0);
    }

    #[test]
    fn test_toxicity() {
        assert_eq!(toxicity_score(""), None);
        let benign = toxicity_score("lovely product arrived on time").unwrap();
        assert_eq!(benign, 0.0);
        let toxic = toxicity_score("you are all idiots this is garbage").unwrap();
        assert!(toxic > 0.0);
        assert!(toxic <= 1.0);
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(
            SentimentAnalyzer::from_flags(false, "").version(),
            LEXICON_VERSION
        );
        assert_eq!(
            SentimentAnalyzer::from_flags(true, "http://model:9000/sentiment").version(),
            "remote-transformer-v1"
        );
        // Flag without an endpoint falls back to the lexicon
        assert_eq!(SentimentAnalyzer::from_flags(true, "").version(), LEXICON_VERSION);
    }
}
