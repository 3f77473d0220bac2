mod keyword;
mod yandex;

pub use keyword::KeywordClassifier;
pub use yandex::{YandexClassifier, YandexConfig};

use domain::PipelineError;

pub(crate) fn reject_empty(text: &str) -> Result<&str, PipelineError> {
    let text = text.trim();
    if text.is_empty() {
        Err(PipelineError::PermanentValidation(
            "comment has no text to classify".to_string(),
        ))
    } else {
        Ok(text)
    }
}
