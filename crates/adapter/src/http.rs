use domain::PipelineError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub(crate) fn build_client(timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("unified-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::FatalConfig(format!("http client: {e}")))
}

/// Timeouts, connect failures and broken bodies are worth another try.
pub(crate) fn classify_reqwest_error(context: &str, err: &reqwest::Error) -> PipelineError {
    if err.is_builder() {
        PipelineError::PermanentValidation(format!("{context}: {err}"))
    } else {
        PipelineError::TransientNetwork(format!("{context}: {err}"))
    }
}

pub(crate) fn classify_status(context: &str, status: StatusCode, body: &str) -> PipelineError {
    let body: String = body.chars().take(300).collect();
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        PipelineError::TransientNetwork(format!("{context}: HTTP {status}: {body}"))
    } else {
        PipelineError::PermanentValidation(format!("{context}: HTTP {status}: {body}"))
    }
}

/// Check the status and decode a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    context: &str,
    resp: Response,
) -> Result<T, PipelineError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| classify_reqwest_error(context, &e))?;

    if !status.is_success() {
        return Err(classify_status(context, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        PipelineError::TransientNetwork(format!("{context}: unexpected response body: {e}"))
    })
}

/// Remove a credential that may appear in request URLs from an error message.
pub(crate) fn redact(err: PipelineError, secret: &str) -> PipelineError {
    if secret.is_empty() {
        return err;
    }
    let clean = |s: String| s.replace(secret, "***");
    match err {
        PipelineError::TransientNetwork(m) => PipelineError::TransientNetwork(clean(m)),
        PipelineError::RateLimited {
            retry_after,
            context,
        } => PipelineError::RateLimited {
            retry_after,
            context: clean(context),
        },
        PipelineError::TransientStorageBusy(m) => PipelineError::TransientStorageBusy(clean(m)),
        PipelineError::PermanentValidation(m) => PipelineError::PermanentValidation(clean(m)),
        PipelineError::ExhaustedRetries {
            attempts,
            last_error,
        } => PipelineError::ExhaustedRetries {
            attempts,
            last_error: clean(last_error),
        },
        PipelineError::FatalConfig(m) => PipelineError::FatalConfig(clean(m)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::REQUEST_TIMEOUT,
        ] {
            assert!(classify_status("t", status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = classify_status("classify", StatusCode::BAD_REQUEST, "bad text");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad text"));
    }

    #[test]
    fn redaction_hides_tokens() {
        let err = PipelineError::TransientNetwork(
            "error sending request for url (https://api.telegram.org/bot123:abc/getUpdates)".into(),
        );
        let msg = redact(err, "123:abc").to_string();
        assert!(!msg.contains("123:abc"));
        assert!(msg.contains("bot***"));
    }
}
