//! Decides whether a question/answer exchange needs a human advisor.
//!
//! Detection is a table of rules, each pairing a trigger with a reason tag and
//! a priority floor. Every rule is evaluated; the exchange escalates when any
//! rule fires, the reason is the `|`-joined list of fired tags, and the
//! suggested priority is the highest floor among them.

use serde::Serialize;

use crate::models::{MIN_PRIORITY, REASON_SEPARATOR};

pub const SENSITIVE_TOPIC: &str = "sensitive_topic";
pub const AI_UNCERTAINTY: &str = "ai_uncertainty";
pub const WEAK_GROUNDING: &str = "weak_grounding";
pub const THIN_ANSWER: &str = "thin_answer";

pub const MIN_SUPPORTING_DOCUMENTS: usize = 2;
pub const MIN_ANSWER_WORDS: usize = 20;

const SENSITIVE_TERMS: &[&str] = &[
    "financial aid",
    "scholarship",
    "tuition",
    "withdrawal",
    "withdraw",
    "failing",
    "probation",
    "mental-health",
    "crisis",
    "accommodation",
    "disability",
    "waiver",
    "appeal",
    "transfer-credit",
    "graduation-date",
];

const UNCERTAINTY_PHRASES: &[&str] = &[
    "don't have that information",
    "not in the available documents",
    "cannot find",
    "unclear from the context",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Question contains any of the terms, ignoring case.
    QuestionContains(Vec<String>),
    /// Answer contains any of the phrases, ignoring case.
    ResponseContains(Vec<String>),
    FewerDocumentsThan(usize),
    FewerWordsThan(usize),
}

impl Trigger {
    fn fires(&self, exchange: &Exchange) -> bool {
        match self {
            Trigger::QuestionContains(terms) => contains_any(&exchange.question, terms),
            Trigger::ResponseContains(phrases) => contains_any(&exchange.response, phrases),
            Trigger::FewerDocumentsThan(limit) => exchange.document_count < *limit,
            Trigger::FewerWordsThan(limit) => exchange.word_count < *limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionRule {
    pub tag: String,
    pub trigger: Trigger,
    pub priority_floor: i32,
}

impl DetectionRule {
    pub fn new(tag: impl Into<String>, trigger: Trigger, priority_floor: i32) -> Self {
        DetectionRule {
            tag: tag.into(),
            trigger,
            priority_floor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub should_escalate: bool,
    pub reason: String,
    pub suggested_priority: i32,
    pub matched_rules: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DetectorRules {
    rules: Vec<DetectionRule>,
}

impl Default for DetectorRules {
    fn default() -> Self {
        DetectorRules {
            rules: vec![
                DetectionRule::new(
                    SENSITIVE_TOPIC,
                    Trigger::QuestionContains(to_owned(SENSITIVE_TERMS)),
                    4,
                ),
                DetectionRule::new(
                    AI_UNCERTAINTY,
                    Trigger::ResponseContains(to_owned(UNCERTAINTY_PHRASES)),
                    3,
                ),
                DetectionRule::new(
                    WEAK_GROUNDING,
                    Trigger::FewerDocumentsThan(MIN_SUPPORTING_DOCUMENTS),
                    2,
                ),
                DetectionRule::new(THIN_ANSWER, Trigger::FewerWordsThan(MIN_ANSWER_WORDS), 2),
            ],
        }
    }
}

impl DetectorRules {
    pub fn new(rules: Vec<DetectionRule>) -> Self {
        DetectorRules { rules }
    }

    pub fn with_rule(mut self, rule: DetectionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    pub fn evaluate(&self, question: &str, ai_response: &str, document_count: usize) -> Detection {
        let exchange = Exchange::new(question, ai_response, document_count);
        let mut matched_rules = Vec::new();
        let mut suggested_priority = MIN_PRIORITY;

        for rule in &self.rules {
            if rule.trigger.fires(&exchange) {
                suggested_priority = suggested_priority.max(rule.priority_floor);
                if !matched_rules.contains(&rule.tag) {
                    matched_rules.push(rule.tag.clone());
                }
            }
        }

        Detection {
            should_escalate: !matched_rules.is_empty(),
            reason: matched_rules.join(REASON_SEPARATOR),
            suggested_priority,
            matched_rules,
        }
    }
}

/// Evaluates an exchange against the default rule table.
pub fn evaluate(question: &str, ai_response: &str, document_count: usize) -> Detection {
    DetectorRules::default().evaluate(question, ai_response, document_count)
}

struct Exchange {
    question: String,
    response: String,
    document_count: usize,
    word_count: usize,
}

impl Exchange {
    fn new(question: &str, ai_response: &str, document_count: usize) -> Self {
        Exchange {
            question: normalize(question),
            response: normalize(ai_response),
            document_count,
            word_count: ai_response.split_whitespace().count(),
        }
    }
}

/// Lowercases, straightens curly apostrophes and folds hyphens to spaces, so
/// "mental-health" and "Mental health" compare equal.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .replace('-', " ")
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|needle| haystack.contains(&normalize(needle)))
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GROUNDED_ANSWER: &str = "Students may register for up to eighteen credits each \
        semester without approval, and anything above that requires a signed overload form \
        from the department chair before the add deadline.";

    #[test]
    fn well_grounded_routine_answer_does_not_escalate() {
        let detection = evaluate("How many credits can I take?", GROUNDED_ANSWER, 4);
        assert!(!detection.should_escalate);
        assert_eq!(detection.reason, "");
        assert_eq!(detection.suggested_priority, 1);
    }

    #[test]
    fn sensitive_topic_sets_priority_floor_of_four() {
        let detection = evaluate("Am I still eligible for my SCHOLARSHIP?", GROUNDED_ANSWER, 4);
        assert!(detection.should_escalate);
        assert_eq!(detection.reason, SENSITIVE_TOPIC);
        assert_eq!(detection.suggested_priority, 4);
    }

    #[test]
    fn uncertainty_phrase_is_matched_case_insensitively() {
        let answer = format!("{GROUNDED_ANSWER} However, I Cannot Find the exact fee.");
        let detection = evaluate("What does parking cost?", &answer, 3);
        assert_eq!(detection.reason, AI_UNCERTAINTY);
        assert_eq!(detection.suggested_priority, 3);
    }

    #[test]
    fn hyphenated_and_spaced_spellings_both_match() {
        for question in [
            "I am having a mental-health emergency",
            "Who handles mental health support?",
            "Will my transfer-credit count?",
            "Can I move my graduation-date?",
            "Is my Graduation Date fixed?",
        ] {
            let detection = evaluate(question, GROUNDED_ANSWER, 5);
            assert_eq!(detection.matched_rules, vec![SENSITIVE_TOPIC.to_string()], "{question}");
            assert_eq!(detection.suggested_priority, 4);
        }
    }

    #[test]
    fn curly_apostrophes_still_match_uncertainty() {
        let answer = format!("I don\u{2019}t have that information right now. {GROUNDED_ANSWER}");
        let detection = evaluate("Where is the lab?", &answer, 3);
        assert_eq!(detection.matched_rules, vec![AI_UNCERTAINTY.to_string()]);
    }

    #[test]
    fn tuition_question_with_short_ungrounded_answer_fires_three_rules() {
        let answer = "Please contact the bursar office about payment plan options today.";
        assert_eq!(answer.split_whitespace().count(), 10);

        let detection = evaluate("I can't pay tuition, need emergency aid", answer, 1);
        assert!(detection.should_escalate);
        assert_eq!(
            detection.reason,
            "sensitive_topic|weak_grounding|thin_answer"
        );
        assert_eq!(detection.suggested_priority, 4);
    }

    #[test]
    fn custom_rules_extend_the_table() {
        let rules = DetectorRules::default().with_rule(DetectionRule::new(
            "visa_question",
            Trigger::QuestionContains(vec!["visa".to_string()]),
            5,
        ));
        let detection = rules.evaluate("Does my F-1 visa allow a reduced load?", GROUNDED_ANSWER, 5);
        assert_eq!(detection.reason, "visa_question");
        assert_eq!(detection.suggested_priority, 5);
    }

    #[test]
    fn empty_table_never_escalates() {
        let rules = DetectorRules::new(Vec::new());
        let detection = rules.evaluate("tuition appeal", "", 0);
        assert!(!detection.should_escalate);
        assert_eq!(detection.suggested_priority, 1);
    }

    proptest! {
        #[test]
        fn weak_grounding_always_escalates(
            question in ".{0,80}",
            answer in ".{0,200}",
            documents in 0usize..2,
        ) {
            let detection = evaluate(&question, &answer, documents);
            prop_assert!(detection.should_escalate);
            prop_assert!(detection.matched_rules.iter().any(|tag| tag == WEAK_GROUNDING));
            prop_assert!(detection.suggested_priority >= 2);
        }

        #[test]
        fn suggested_priority_stays_in_range(
            question in ".{0,80}",
            answer in ".{0,200}",
            documents in 0usize..10,
        ) {
            let detection = evaluate(&question, &answer, documents);
            prop_assert!((1..=5).contains(&detection.suggested_priority));
            prop_assert_eq!(detection.should_escalate, !detection.reason.is_empty());
        }
    }
}
