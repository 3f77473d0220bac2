use serde::{Deserialize, Serialize};

use crate::models::{Comment, Sentiment, Source};

/// One alert rule. Empty lists mean "any"; all non-empty criteria must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default)]
    pub sentiments: Vec<Sentiment>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AlertRule {
    pub fn negative() -> Self {
        Self {
            sentiments: vec![Sentiment::Negative],
            sources: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn matches(&self, comment: &Comment) -> bool {
        if !self.sentiments.is_empty() {
            match comment.sentiment {
                Some(s) if self.sentiments.contains(&s) => {}
                _ => return false,
            }
        }

        if !self.sources.is_empty() && !self.sources.contains(&comment.source) {
            return false;
        }

        if !self.keywords.is_empty() {
            let text = comment.text.to_lowercase();
            return self
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .any(|k| text.contains(&k));
        }

        true
    }
}

pub fn any_rule_matches(rules: &[AlertRule], comment: &Comment) -> bool {
    rules.iter().any(|r| r.matches(comment))
}
