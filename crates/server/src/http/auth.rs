use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::state::AppState;

/// HTTP Basic credentials, kept only as digests.
pub struct BasicAuth {
    username: [u8; 32],
    password: [u8; 32],
}

fn digest(value: &[u8]) -> [u8; 32] {
    Sha256::digest(value).into()
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: digest(username.as_bytes()),
            password: digest(password.as_bytes()),
        }
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Some(split) = decoded.iter().position(|b| *b == b':') else {
            return false;
        };
        let (user, pass) = (&decoded[..split], &decoded[split + 1..]);

        // both digests are always compared
        let user_ok = digest(user) == self.username;
        let pass_ok = digest(pass) == self.password;
        user_ok & pass_ok
    }
}

pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| state.auth.verify(h))
        .unwrap_or(false);

    if authorized {
        return next.run(request).await;
    }

    let mut response = (StatusCode::UNAUTHORIZED, "Invalid credentials").into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"unified-monitor\""),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn accepts_matching_credentials_only() {
        let auth = BasicAuth::new("admin", "s3:cret");
        assert!(auth.verify(&header("admin", "s3:cret")));
        assert!(!auth.verify(&header("admin", "wrong")));
        assert!(!auth.verify(&header("root", "s3:cret")));
    }

    #[test]
    fn rejects_malformed_headers() {
        let auth = BasicAuth::new("admin", "secret");
        assert!(!auth.verify("Bearer abc"));
        assert!(!auth.verify("Basic !!!"));
        assert!(!auth.verify(&format!("Basic {}", STANDARD.encode("nocolon"))));
    }
}
