use async_trait::async_trait;
use domain::{Classification, PipelineError, Sentiment};

use super::reject_empty;
use crate::traits::Classifier;

const POSITIVE: &[&str] = &[
    "отлично",
    "прекрасно",
    "хорошо",
    "замечательно",
    "супер",
    "класс",
    "люблю",
    "нравится",
    "спасибо",
    "благодарю",
    "восхитительно",
    "великолепно",
    "потрясающе",
];

const NEGATIVE: &[&str] = &[
    "плохо",
    "ужасно",
    "отвратительно",
    "ненавижу",
    "не нравится",
    "гадость",
    "кошмар",
    "ужас",
    "мерзость",
    "плохой",
    "негативный",
    "проблема",
    "ошибка",
];

/// Offline fallback: counts Russian marker words.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn score(text: &str) -> Classification {
        let lower = text.to_lowercase();
        let count = |words: &[&str]| words.iter().filter(|w| lower.contains(**w)).count();
        let positive = count(POSITIVE);
        let negative = count(NEGATIVE);

        let (sentiment, hits) = match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => (Sentiment::Positive, positive),
            std::cmp::Ordering::Less => (Sentiment::Negative, negative),
            std::cmp::Ordering::Equal => {
                return Classification {
                    sentiment: Sentiment::Neutral,
                    confidence: 0.5,
                }
            }
        };

        Classification {
            sentiment,
            confidence: (0.5 + 0.1 * hits as f64).min(0.9),
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keywords"
    }

    async fn classify(&self, text: &str) -> Result<Classification, PipelineError> {
        let text = reject_empty(text)?;
        Ok(Self::score(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_words_win() {
        let c = KeywordClassifier::score("Ужасно! Просто кошмар");
        assert_eq!(c.sentiment, Sentiment::Negative);
        // "ужасно", "кошмар" and "ужас" inside "ужасно"
        assert!((c.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn ties_are_neutral() {
        let c = KeywordClassifier::score("хорошо, но есть проблема");
        assert_eq!(c.sentiment, Sentiment::Neutral);
        assert_eq!(c.confidence, 0.5);
        assert_eq!(KeywordClassifier::score("обычный текст").sentiment, Sentiment::Neutral);
    }

    #[test]
    fn confidence_is_capped() {
        let c = KeywordClassifier::score(
            "отлично прекрасно хорошо замечательно супер класс люблю",
        );
        assert_eq!(c.sentiment, Sentiment::Positive);
        assert_eq!(c.confidence, 0.9);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let err = KeywordClassifier::new().classify("   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::PermanentValidation(_)));
    }
}
