//! Upstream token refresh HTTP call
//!
//! A single POST to the region's refresh endpoint. Retry and backoff live
//! in [`crate::manager::CredentialManager`]; this module only knows how to
//! make one attempt and interpret its response.

use serde::{Deserialize, Serialize};

use crate::classify::TransportErrorKind;

/// Raw JSON response from the upstream refresh endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresIn", default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

/// One refresh attempt's outcome, split so the caller can classify failures
/// without re-deriving HTTP status handling.
pub enum Attempt {
    Success(TokenResponse),
    HttpError { status: u16, body: String },
    Transport(TransportErrorKind),
    Malformed(String),
}

/// Make a single refresh request. Does not retry.
pub async fn attempt_refresh(
    client: &reqwest::Client,
    refresh_url: &str,
    refresh_token: &str,
    client_id: Option<&str>,
    client_secret: Option<&str>,
    user_agent: &str,
) -> Attempt {
    let body = serde_json::json!({
        "refreshToken": refresh_token,
        "clientId": client_id,
        "clientSecret": client_secret,
    });

    let response = client
        .post(refresh_url)
        .header("Content-Type", "application/json")
        .header("User-Agent", user_agent)
        .json(&body)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) if e.is_timeout() => return Attempt::Transport(TransportErrorKind::Timeout),
        Err(e) if e.is_connect() => return Attempt::Transport(TransportErrorKind::Connect),
        Err(_) => return Attempt::Transport(TransportErrorKind::Connect),
    };

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Attempt::HttpError {
            status: status.as_u16(),
            body,
        };
    }

    match response.json::<TokenResponse>().await {
        Ok(parsed) => Attempt::Success(parsed),
        Err(e) => Attempt::Malformed(format!("invalid refresh response: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_deserializes_required_fields_only() {
        let json = r#"{"accessToken":"a1"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "a1");
        assert_eq!(token.expires_in, 3600);
        assert!(token.refresh_token.is_none());
        assert!(token.profile_arn.is_none());
    }

    #[test]
    fn token_response_deserializes_full() {
        let json = r#"{"accessToken":"a1","refreshToken":"r2","expiresIn":120,"profileArn":"arn:x"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "a1");
        assert_eq!(token.refresh_token.as_deref(), Some("r2"));
        assert_eq!(token.expires_in, 120);
        assert_eq!(token.profile_arn.as_deref(), Some("arn:x"));
    }

    #[test]
    fn token_response_rejects_missing_access_token() {
        let json = r#"{"expiresIn":3600}"#;
        let result: Result<TokenResponse, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn attempt_refresh_maps_2xx_malformed_body_to_malformed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"expiresIn":3600}"#))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let attempt = attempt_refresh(
            &client,
            &format!("{}/refresh", server.uri()),
            "rt",
            None,
            None,
            "test-agent",
        )
        .await;

        assert!(matches!(attempt, Attempt::Malformed(_)));
    }
}
