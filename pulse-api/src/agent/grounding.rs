//! Grounding validation for agent answers
//!
//! Two invariants: quoted feedback must carry a `feedback_id` citation,
//! and numeric claims must correspond to a value that appeared in some
//! tool output (within tolerance).

use uuid::Uuid;

/// Absolute tolerance when matching numeric claims to tool output.
const NUMERIC_ABS_TOLERANCE: f64 = 0.05;

/// Relative tolerance for larger values.
const NUMERIC_REL_TOLERANCE: f64 = 0.01;

/// Quotes shorter than this are treated as emphasis, not evidence.
const MIN_QUOTE_LEN: usize = 15;

/// Extract `feedback_id: <uuid>` citations from an answer.
pub fn extract_citation_ids(answer: &str) -> Vec<Uuid> {
    let lowered = answer.to_lowercase();
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(pos) = lowered[search_from..].find("feedback_id") {
        let after = search_from + pos + "feedback_id".len();
        let candidate: String = lowered[after..]
            .chars()
            .skip_while(|c| matches!(c, ':' | '=' | ' ' | '\'' | '"' | '`'))
            .take(36)
            .collect();
        if let Ok(id) = Uuid::parse_str(&candidate) {
            if !found.contains(&id) {
                found.push(id);
            }
        }
        search_from = after;
    }

    found
}

/// Double-quoted fragments long enough to count as evidence quotes.
pub fn extract_quoted_fragments(answer: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current: Option<String> = None;

    for c in answer.chars() {
        match c {
            '"' | '\u{201c}' | '\u{201d}' => match current.take() {
                Some(fragment) => {
                    if fragment.len() >= MIN_QUOTE_LEN {
                        fragments.push(fragment);
                    }
                }
                None => current = Some(String::new()),
            },
            _ => {
                if let Some(fragment) = &mut current {
                    fragment.push(c);
                }
            }
        }
    }

    fragments
}

/// Numeric tokens in an answer, ignoring uuid-like and date-like spans.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let mut token = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || (c == '.' && !token.is_empty() && chars.peek().map_or(false, |n| n.is_ascii_digit())) {
            token.push(c);
        } else if c.is_alphanumeric() || c == '-' {
            // Part of an identifier or date; poison the current token
            while let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '-' || next == '.' {
                    chars.next();
                } else {
                    break;
                }
            }
            token.clear();
        } else {
            if let Ok(value) = token.parse::<f64>() {
                numbers.push(value);
            }
            token.clear();
        }
    }
    if let Ok(value) = token.parse::<f64>() {
        numbers.push(value);
    }

    numbers
}

fn numbers_match(claim: f64, reference: f64) -> bool {
    let diff = (claim - reference).abs();
    diff <= NUMERIC_ABS_TOLERANCE || diff <= reference.abs() * NUMERIC_REL_TOLERANCE
}

/// Violations found in one answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Violations {
    pub unattributed_quotes: Vec<String>,
    pub ungrounded_numbers: Vec<f64>,
}

impl Violations {
    pub fn is_clean(&self) -> bool {
        self.unattributed_quotes.is_empty() && self.ungrounded_numbers.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.unattributed_quotes.is_empty() {
            parts.push(format!(
                "{} quoted fragment(s) lack a feedback_id citation",
                self.unattributed_quotes.len()
            ));
        }
        if !self.ungrounded_numbers.is_empty() {
            parts.push(format!(
                "{} numeric claim(s) not found in tool output",
                self.ungrounded_numbers.len()
            ));
        }
        parts.join("; ")
    }
}

/// Validate an answer against the tool outputs that produced it.
pub fn validate(answer: &str, question: &str, tool_outputs: &[String]) -> Violations {
    let mut violations = Violations::default();
    let has_citations = !extract_citation_ids(answer).is_empty();

    // Quote law: a quote lifted verbatim from tool output is feedback
    // material and demands a citation somewhere in the answer.
    for fragment in extract_quoted_fragments(answer) {
        let from_tools = tool_outputs.iter().any(|out| out.contains(fragment.trim()));
        if from_tools && !has_citations {
            violations.unattributed_quotes.push(fragment);
        }
    }

    // Numeric law: every number claimed must appear in some tool output
    // (numbers echoed from the question are exempt).
    let question_numbers = extract_numbers(question);
    let reference: Vec<f64> = tool_outputs.iter().flat_map(|out| extract_numbers(out)).collect();

    for claim in extract_numbers(answer) {
        let from_question = question_numbers.iter().any(|q| numbers_match(claim, *q));
        let grounded = reference.iter().any(|r| numbers_match(claim, *r));
        if !from_question && !grounded {
            violations.ungrounded_numbers.push(claim);
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_citations() {
        let answer = "One customer said (feedback_id: 123e4567-e89b-12d3-a456-426614174000) it broke.";
        let ids = extract_citation_ids(answer);
        assert_eq!(ids.len(), 1);
        assert_eq!(
            ids[0].to_string(),
            "123e4567-e89b-12d3-a456-426614174000"
        );
    }

    #[test]
    fn test_extract_citations_dedupes() {
        let answer = "feedback_id: 123e4567-e89b-12d3-a456-426614174000 and again \
                      feedback_id=123e4567-e89b-12d3-a456-426614174000";
        assert_eq!(extract_citation_ids(answer).len(), 1);
    }

    #[test]
    fn test_quoted_fragments_skip_short() {
        let fragments = extract_quoted_fragments("they said \"ok\" and \"the checkout flow is totally broken\"");
        assert_eq!(fragments, vec!["the checkout flow is totally broken"]);
    }

    #[test]
    fn test_extract_numbers_ignores_identifiers() {
        let numbers = extract_numbers("In 2024-01-05 we saw 42 complaints, score 0.35");
        assert_eq!(numbers, vec![42.0, 0.35]);
    }

    #[test]
    fn test_validate_flags_uncited_quote() {
        let tool_output = vec![r#"{"examples":[{"text":"the checkout flow is totally broken"}]}"#.to_string()];
        let violations = validate(
            "A customer wrote \"the checkout flow is totally broken\"",
            "what do customers say?",
            &tool_output,
        );
        assert_eq!(violations.unattributed_quotes.len(), 1);
    }

    #[test]
    fn test_validate_accepts_cited_quote() {
        let tool_output = vec![
            r#"{"examples":[{"feedback_id":"123e4567-e89b-12d3-a456-426614174000","text":"the checkout flow is totally broken"}]}"#
                .to_string(),
        ];
        let violations = validate(
            "A customer wrote \"the checkout flow is totally broken\" (feedback_id: 123e4567-e89b-12d3-a456-426614174000)",
            "what do customers say?",
            &tool_output,
        );
        assert!(violations.unattributed_quotes.is_empty());
    }

    #[test]
    fn test_validate_flags_invented_number() {
        let tool_output = vec![r#"{"total_feedback":100}"#.to_string()];
        let violations = validate(
            "There were 9000 complaints.",
            "how many complaints?",
            &tool_output,
        );
        assert_eq!(violations.ungrounded_numbers, vec![9000.0]);
    }

    #[test]
    fn test_validate_accepts_grounded_number_within_tolerance() {
        let tool_output = vec![r#"{"negative_percentage":22.54}"#.to_string()];
        let violations = validate(
            "About 22.5% of feedback was negative.",
            "share of negative feedback?",
            &tool_output,
        );
        assert!(violations.ungrounded_numbers.is_empty());
    }

    #[test]
    fn test_validate_exempts_question_numbers() {
        let violations = validate(
            "Looking at the last 30 days, nothing stands out.",
            "what happened in the last 30 days?",
            &[],
        );
        assert!(violations.is_clean());
    }
}
