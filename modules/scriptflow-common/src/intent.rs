//! Deterministic intent classification for inbound free text.
//!
//! Classification is a pure function of the input. Priority order (first
//! match wins): copy > generate/instant > redo > positive feedback >
//! negative feedback > substantial content (idea) > unknown. Within a
//! class, the pattern list order below is contractual — scenario tests
//! depend on it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::ToneHint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Generate,
    Copy,
    Redo,
    PositiveFeedback,
    NegativeFeedback,
    Idea,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

/// Requested depth of the generated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Lite,
    #[default]
    Medium,
    Deep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedIntent {
    pub intent: IntentType,
    pub is_instant_flow: bool,
    pub is_copy_flow: bool,
    pub is_redo: bool,
    pub feedback_polarity: Option<Polarity>,
    pub detected_tone: Option<ToneHint>,
    pub intensity: Intensity,
    pub is_hook_only: bool,
    pub cleaned_message: String,
    pub confidence: f32,
    pub matched_pattern: Option<String>,
}

const COPY_TRIGGERS: &[&str] = &[
    r"(?i)\bword\s+for\s+word\b",
    r"(?i)\bexact\s+words\b",
    r"(?i)\btranscript\b",
    r"(?i)\bcopy\b",
];

const GENERATE_TRIGGERS: &[&str] = &[
    r"(?i)\bgenerate\b",
    r"(?i)\binstant\b",
    r"(?i)\bmake\s+(?:me\s+)?(?:a\s+)?script\b",
    r"(?i)\bwrite\s+(?:me\s+)?(?:a\s+)?script\b",
    r"(?i)\bsurprise\s+me\b",
];

const REDO_TRIGGERS: &[&str] = &[
    r"(?i)\banother\b",
    r"(?i)\bredo\b",
    r"(?i)\bregenerate\b",
    r"(?i)\bone\s+more\b",
    r"(?i)\btry\s+again\b",
    r"(?i)\bagain\b",
    r"(?i)\bnew\s+version\b",
    r"(?i)\bdifferent\s+version\b",
];

const POSITIVE_TRIGGERS: &[&str] = &[
    "🔥",
    "❤️",
    "😍",
    "👍",
    r"(?i)\blove\s+(?:it|this)\b",
    r"(?i)\bperfect\b",
    r"(?i)\bamazing\b",
    r"(?i)\bawesome\b",
    r"(?i)\bgreat\b",
    r"(?i)\bthank(?:s|\s+you)\b",
];

const NEGATIVE_TRIGGERS: &[&str] = &[
    "👎",
    r"(?i)\bdon'?t\s+like\b",
    r"(?i)\bnot\s+good\b",
    r"(?i)\bboring\b",
    r"(?i)\bterrible\b",
    r"(?i)\bawful\b",
    r"(?i)\bhate\b",
    r"(?i)\bmeh\b",
    r"(?i)\bbad\b",
];

const HOOK_ONLY_MODIFIERS: &[&str] = &[
    r"(?i)\bhook\s+only\b",
    r"(?i)\bjust\s+the\s+hook\b",
    r"(?i)\bonly\s+the\s+hook\b",
];

const LITE_MODIFIERS: &[&str] = &[
    r"(?i)\blite\b",
    r"(?i)\bkeep\s+it\s+short\b",
    r"(?i)\bshort\s+version\b",
    r"(?i)\bquick\s+version\b",
];

const DEEP_MODIFIERS: &[&str] = &[
    r"(?i)\bdeep\s+dive\b",
    r"(?i)\bin\s+depth\b",
    r"(?i)\bdetailed\b",
    r"(?i)\blong\s+version\b",
];

const TONE_MODIFIERS: &[(&str, ToneHint)] = &[
    (r"(?i)\bprofessional\b", ToneHint::Professional),
    (r"(?i)\bformal\b", ToneHint::Professional),
    (r"(?i)\bfunny\b", ToneHint::Funny),
    (r"(?i)\bhumorous\b", ToneHint::Funny),
    (r"(?i)\bprovocative\b", ToneHint::Provocative),
    (r"(?i)\bcontroversial\b", ToneHint::Provocative),
    (r"(?i)\bedgy\b", ToneHint::Provocative),
    (r"(?i)\beducational\b", ToneHint::Educational),
    (r"(?i)\binformative\b", ToneHint::Educational),
    (r"(?i)\bcasual\b", ToneHint::Casual),
    (r"(?i)\bchill\b", ToneHint::Casual),
];

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("valid URL regex"));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid trigger regex"))
        .collect()
}

static COPY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(COPY_TRIGGERS));
static GENERATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(GENERATE_TRIGGERS));
static REDO_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(REDO_TRIGGERS));
static POSITIVE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(POSITIVE_TRIGGERS));
static NEGATIVE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(NEGATIVE_TRIGGERS));
static HOOK_ONLY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(HOOK_ONLY_MODIFIERS));
static LITE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(LITE_MODIFIERS));
static DEEP_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(DEEP_MODIFIERS));
static TONE_RES: LazyLock<Vec<(Regex, ToneHint)>> = LazyLock::new(|| {
    TONE_MODIFIERS
        .iter()
        .map(|(p, t)| (Regex::new(p).expect("valid tone regex"), *t))
        .collect()
});

/// Minimum cleaned length (exclusive) for a message to count as an idea.
const IDEA_MIN_CLEANED_LEN: usize = 3;

pub struct IntentParser;

impl IntentParser {
    /// Classify a free-text utterance. Pure and deterministic.
    pub fn parse(text: &str) -> ParsedIntent {
        let trimmed = text.trim();

        // Modifiers are orthogonal to the type and may co-occur with any of
        // them.
        let is_hook_only = HOOK_ONLY_RES.iter().any(|re| re.is_match(trimmed));
        let intensity = if LITE_RES.iter().any(|re| re.is_match(trimmed)) {
            Intensity::Lite
        } else if DEEP_RES.iter().any(|re| re.is_match(trimmed)) {
            Intensity::Deep
        } else {
            Intensity::Medium
        };
        let detected_tone = TONE_RES
            .iter()
            .find(|(re, _)| re.is_match(trimmed))
            .map(|(_, tone)| *tone);

        let cleaned_message = Self::clean(trimmed);

        let (intent, confidence, matched_pattern) =
            Self::classify(trimmed, cleaned_message.len());

        let feedback_polarity = match intent {
            IntentType::PositiveFeedback => Some(Polarity::Positive),
            IntentType::NegativeFeedback => Some(Polarity::Negative),
            _ => None,
        };

        ParsedIntent {
            intent,
            is_instant_flow: intent == IntentType::Generate,
            is_copy_flow: intent == IntentType::Copy,
            is_redo: intent == IntentType::Redo,
            feedback_polarity,
            detected_tone,
            intensity,
            is_hook_only,
            cleaned_message,
            confidence,
            matched_pattern,
        }
    }

    /// Extract an embedded URL, then parse the remainder. "`<url> generate`"
    /// and "generate" with the URL supplied separately are equivalent.
    pub fn parse_with_url(text: &str) -> (Option<String>, ParsedIntent) {
        let url = URL_RE.find(text).map(|m| m.as_str().to_string());
        let remainder = URL_RE.replace_all(text, " ");
        (url, Self::parse(&remainder))
    }

    fn classify(text: &str, cleaned_len: usize) -> (IntentType, f32, Option<String>) {
        let classes: &[(&LazyLock<Vec<Regex>>, IntentType, f32)] = &[
            (&COPY_RES, IntentType::Copy, 0.9),
            (&GENERATE_RES, IntentType::Generate, 0.9),
            (&REDO_RES, IntentType::Redo, 0.9),
            (&POSITIVE_RES, IntentType::PositiveFeedback, 0.85),
            (&NEGATIVE_RES, IntentType::NegativeFeedback, 0.85),
        ];

        for (patterns, intent, confidence) in classes {
            if let Some(re) = patterns.iter().find(|re| re.is_match(text)) {
                return (*intent, *confidence, Some(re.as_str().to_string()));
            }
        }

        if cleaned_len > IDEA_MIN_CLEANED_LEN {
            (IntentType::Idea, 0.6, None)
        } else {
            (IntentType::Unknown, 0.2, None)
        }
    }

    /// Delete every matched trigger and modifier token, then collapse
    /// whitespace.
    fn clean(text: &str) -> String {
        let mut out = text.to_string();

        let all_trigger_sets: &[&LazyLock<Vec<Regex>>] = &[
            &COPY_RES,
            &GENERATE_RES,
            &REDO_RES,
            &POSITIVE_RES,
            &NEGATIVE_RES,
            &HOOK_ONLY_RES,
            &LITE_RES,
            &DEEP_RES,
        ];
        for set in all_trigger_sets {
            for re in set.iter() {
                out = re.replace_all(&out, " ").into_owned();
            }
        }
        for (re, _) in TONE_RES.iter() {
            out = re.replace_all(&out, " ").into_owned();
        }

        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_trigger_wins() {
        let parsed = IntentParser::parse("generate");
        assert_eq!(parsed.intent, IntentType::Generate);
        assert!(parsed.is_instant_flow);
        assert!(!parsed.is_copy_flow);
        assert_eq!(parsed.cleaned_message, "");
    }

    #[test]
    fn copy_outranks_generate() {
        let parsed = IntentParser::parse("copy the script, then generate");
        assert_eq!(parsed.intent, IntentType::Copy);
        assert!(parsed.is_copy_flow);
    }

    #[test]
    fn redo_trigger() {
        let parsed = IntentParser::parse("another");
        assert_eq!(parsed.intent, IntentType::Redo);
        assert!(parsed.is_redo);
    }

    #[test]
    fn fire_emoji_is_positive_feedback() {
        let parsed = IntentParser::parse("🔥");
        assert_eq!(parsed.intent, IntentType::PositiveFeedback);
        assert_eq!(parsed.feedback_polarity, Some(Polarity::Positive));
        assert_eq!(parsed.cleaned_message, "");
    }

    #[test]
    fn thumbs_down_is_negative_feedback() {
        let parsed = IntentParser::parse("👎 boring");
        assert_eq!(parsed.intent, IntentType::NegativeFeedback);
        assert_eq!(parsed.feedback_polarity, Some(Polarity::Negative));
    }

    #[test]
    fn substantial_content_is_idea() {
        let parsed = IntentParser::parse("Make it about coding for beginners");
        assert_eq!(parsed.intent, IntentType::Idea);
        assert_eq!(parsed.cleaned_message, "Make it about coding for beginners");
    }

    #[test]
    fn short_leftover_is_unknown() {
        let parsed = IntentParser::parse("ok");
        assert_eq!(parsed.intent, IntentType::Unknown);
    }

    #[test]
    fn tone_modifier_co_occurs_with_generate() {
        let parsed = IntentParser::parse("generate, make it funny");
        assert_eq!(parsed.intent, IntentType::Generate);
        assert_eq!(parsed.detected_tone, Some(ToneHint::Funny));
        assert!(!parsed.cleaned_message.contains("funny"));
        assert!(!parsed.cleaned_message.contains("generate"));
    }

    #[test]
    fn hook_only_modifier_detected() {
        let parsed = IntentParser::parse("just the hook please");
        assert!(parsed.is_hook_only);
    }

    #[test]
    fn intensity_modifiers() {
        assert_eq!(IntentParser::parse("keep it short").intensity, Intensity::Lite);
        assert_eq!(IntentParser::parse("deep dive on this").intensity, Intensity::Deep);
        assert_eq!(IntentParser::parse("about dogs").intensity, Intensity::Medium);
    }

    #[test]
    fn cleaned_message_strips_all_triggers() {
        let parsed = IntentParser::parse("generate another 🔥 detailed");
        assert_eq!(parsed.cleaned_message, "");
    }

    #[test]
    fn reparse_of_cleaned_message_has_no_triggers() {
        // parse(parse(x).cleaned_message) must land on unknown or idea
        for input in [
            "generate a script about sales",
            "copy word for word",
            "another one please, make it funny",
            "🔥🔥 amazing",
            "write me a script on morning routines, detailed",
        ] {
            let first = IntentParser::parse(input);
            let second = IntentParser::parse(&first.cleaned_message);
            assert!(
                matches!(second.intent, IntentType::Idea | IntentType::Unknown),
                "input {input:?} re-parsed to {:?}",
                second.intent
            );
        }
    }

    #[test]
    fn url_extraction_equivalence() {
        let (url, parsed) =
            IntentParser::parse_with_url("https://www.instagram.com/reel/AbC generate");
        assert_eq!(url.as_deref(), Some("https://www.instagram.com/reel/AbC"));
        assert_eq!(parsed.intent, IntentType::Generate);

        let bare = IntentParser::parse("generate");
        assert_eq!(parsed.intent, bare.intent);
        assert_eq!(parsed.cleaned_message, bare.cleaned_message);
    }

    #[test]
    fn url_only_message_is_unknown_with_url() {
        let (url, parsed) = IntentParser::parse_with_url("https://www.instagram.com/reel/AbC");
        assert!(url.is_some());
        assert_eq!(parsed.intent, IntentType::Unknown);
    }

    #[test]
    fn pattern_order_is_contractual_within_class() {
        // "copy word for word" must report the first listed matching pattern
        let parsed = IntentParser::parse("copy word for word");
        assert_eq!(parsed.matched_pattern.as_deref(), Some(r"(?i)\bword\s+for\s+word\b"));
    }

    #[test]
    fn parser_is_deterministic() {
        let a = IntentParser::parse("generate something funny about cats");
        let b = IntentParser::parse("generate something funny about cats");
        assert_eq!(a, b);
    }
}
