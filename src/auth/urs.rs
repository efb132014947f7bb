//! Login exchange against the Earthdata identity provider

use super::{AuthError, AuthMethod, CredentialExchange, CredentialMaterial};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::debug;

pub struct UrsExchange {
    client: ClientWithMiddleware,
    urs_base_url: String,
    cmr_base_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expiration_date: Option<String>,
}

/// Map a failed response to the error that decides the backoff window
fn classify_failure(status: StatusCode, body: &str) -> AuthError {
    let lowered = body.to_ascii_lowercase();
    if lowered.contains("locked") {
        return AuthError::AccountLocked(format!("HTTP {status}"));
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AuthError::Rejected(format!("HTTP {status}"))
        }
        _ => AuthError::Network(format!("HTTP {status}")),
    }
}

impl UrsExchange {
    #[must_use]
    pub fn new(client: ClientWithMiddleware, urs_base_url: &str, cmr_base_url: &str) -> Self {
        Self {
            client,
            urs_base_url: urs_base_url.trim_end_matches('/').to_string(),
            cmr_base_url: cmr_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Check the token against the search API; it answers 401 for unknown or expired tokens
    async fn verify_token(&self, token: &str) -> Result<(), AuthError> {
        let url = format!("{}/search/collections.json?page_size=0", self.cmr_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn find_or_create_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let url = format!("{}/api/users/find_or_create_token", self.urs_base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Credentials(format!("Unreadable token response: {e}")))?;
        debug!(
            "Received archive token expiring {}",
            token.expiration_date.as_deref().unwrap_or("unknown")
        );
        Ok(token.access_token)
    }
}

#[async_trait]
impl CredentialExchange for UrsExchange {
    async fn login(
        &self,
        method: AuthMethod,
        material: &CredentialMaterial,
    ) -> Result<String, AuthError> {
        debug!("Exchanging {} credentials", method);
        match material {
            CredentialMaterial::Token(token) => {
                self.verify_token(token).await?;
                Ok(token.clone())
            }
            CredentialMaterial::Basic { username, password } => {
                self.find_or_create_token(username, password).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_lock() {
        let error = classify_failure(
            StatusCode::FORBIDDEN,
            r#"{"error":"Account is locked due to too many failed attempts"}"#,
        );
        assert!(matches!(error, AuthError::AccountLocked(_)));
    }

    #[test]
    fn test_classify_rejected_and_other() {
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, "invalid credentials"),
            AuthError::Rejected(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, ""),
            AuthError::Network(_)
        ));
    }

    #[test]
    fn test_token_response_parses() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"abc","token_type":"Bearer","expiration_date":"12/31/2026"}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expiration_date.as_deref(), Some("12/31/2026"));
    }

    #[test]
    fn test_base_urls_are_trimmed() {
        let client = crate::http::build_client(&crate::config::HttpConfig::default()).unwrap();
        let exchange = UrsExchange::new(client, "https://urs.example/", "https://cmr.example//");
        assert_eq!(exchange.urs_base_url, "https://urs.example");
        assert_eq!(exchange.cmr_base_url, "https://cmr.example");
    }
}
