//! OAuth 2.0 authorization code flow plumbing shared by every provider.
//!
//! Builds authorization URLs, exchanges codes at the token endpoint, and
//! performs authenticated JSON GETs against provider APIs. Provider quirks
//! (Slack's `ok` envelope, where the user token lives) stay in the
//! adapters; this module only knows RFC 6749.
//!
//! # Flow Overview
//!
//! 1. Build an authorization URL carrying a state token and redirect the user.
//! 2. Receive the authorization code on the callback.
//! 3. Exchange the code (plus client secret) for a token response.
//! 4. Use the access token to fetch the provider's user profile.

use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::{AuthError, Result};

/// A JSON object as returned by a token endpoint.
pub type TokenResponse = Map<String, Value>;

/// Result of a code exchange: the token the adapter will use for API calls,
/// plus the full provider response for downstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenExchange {
    pub access_token: String,
    pub response: TokenResponse,
}

/// Raw error response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Stateless OAuth client for a single provider registration.
///
/// Holds the client credentials and a shared `reqwest` client; endpoints are
/// passed per call since providers split them across hosts.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Build the authorization URL the user should visit.
    ///
    /// Always sets `response_type=code`, `client_id` and `redirect_uri`;
    /// `extra` carries provider-specific parameters (state, scopes).
    /// Query parameters already present on `endpoint` are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UrlParse`] if `endpoint` is not a valid URL.
    pub fn authorization_url(
        &self,
        endpoint: &str,
        redirect_uri: &str,
        extra: &[(&str, &str)],
    ) -> Result<String> {
        let mut url = Url::parse(endpoint)?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            for (key, value) in extra {
                params.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }

    /// Exchange an authorization code at `token_url` with a form POST.
    ///
    /// `redirect_uri` must be byte-identical to the one used on the
    /// authorization request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidGrant`] if the server rejects the code,
    /// or [`AuthError::NetworkError`] on transport failure.
    pub async fn exchange_code(
        &self,
        token_url: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        tracing::debug!(token_url = %token_url, "exchanging authorization code");

        let response = self.http.post(token_url).form(&params).send().await?;

        Self::parse_token_response(response).await
    }

    /// GET a JSON document, optionally with a bearer token.
    ///
    /// Non-2xx statuses propagate as [`AuthError::NetworkError`].
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<Value> {
        let mut request = self.http.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let value = request.send().await?.error_for_status()?.json().await?;
        Ok(value)
    }

    /// Parse the HTTP response from the token endpoint.
    async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
        let status = response.status();

        if status.is_success() {
            let body: Value = response.json().await?;
            tracing::debug!("token exchange successful");
            match body {
                Value::Object(map) => Ok(map),
                other => Err(AuthError::MalformedResponse {
                    reason: format!("token endpoint returned non-object JSON: {other}"),
                }),
            }
        } else {
            let body = response.text().await.unwrap_or_default();

            if let Ok(error_response) = serde_json::from_str::<TokenErrorResponse>(&body) {
                let reason = error_response
                    .error_description
                    .unwrap_or(error_response.error);
                Err(AuthError::InvalidGrant { reason })
            } else {
                Err(AuthError::InvalidGrant {
                    reason: format!("HTTP {status}: {body}"),
                })
            }
        }
    }
}

/// Read a string field from a token response.
pub fn string_field(response: &TokenResponse, key: &str) -> Option<String> {
    response
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Take the root-level `access_token`, as standard providers return it.
pub fn root_access_token(response: TokenResponse) -> Result<TokenExchange> {
    let access_token =
        string_field(&response, "access_token").ok_or_else(|| AuthError::MalformedResponse {
            reason: "token response has no access_token".to_string(),
        })?;
    Ok(TokenExchange {
        access_token,
        response,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> OAuthClient {
        OAuthClient::new("test-client-id", "test-secret")
    }

    #[test]
    fn authorization_url_includes_all_params() {
        let url_str = client()
            .authorization_url(
                "https://auth.example.com/authorize",
                "http://127.0.0.1:8400/complete/google-oauth2/",
                &[("state", "random-state"), ("scope", "openid email")],
            )
            .unwrap();

        let url = Url::parse(&url_str).unwrap();
        let params: HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(params.get("response_type").unwrap(), "code");
        assert_eq!(params.get("client_id").unwrap(), "test-client-id");
        assert_eq!(
            params.get("redirect_uri").unwrap(),
            "http://127.0.0.1:8400/complete/google-oauth2/"
        );
        assert_eq!(params.get("state").unwrap(), "random-state");
        assert_eq!(params.get("scope").unwrap(), "openid email");
    }

    #[test]
    fn authorization_url_preserves_existing_query_params() {
        let url_str = client()
            .authorization_url("https://auth.example.com/authorize?custom=value", "cb", &[])
            .unwrap();

        let url = Url::parse(&url_str).unwrap();
        let params: HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(params.get("custom").unwrap(), "value");
        assert_eq!(params.get("response_type").unwrap(), "code");
    }

    #[test]
    fn authorization_url_rejects_bad_endpoint() {
        let err = client().authorization_url("not a url", "cb", &[]).unwrap_err();
        assert!(matches!(err, AuthError::UrlParse(_)));
    }

    #[test]
    fn root_access_token_requires_field() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"token_type": "Bearer"}"#).unwrap();
        assert!(matches!(
            root_access_token(response),
            Err(AuthError::MalformedResponse { .. })
        ));

        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "tok", "expires_in": 3600}"#).unwrap();
        let exchange = root_access_token(response).unwrap();
        assert_eq!(exchange.access_token, "tok");
        assert_eq!(exchange.response["expires_in"], 3600);
    }

    #[test]
    fn token_error_response_parsing() {
        let json = r#"{
            "error": "invalid_grant",
            "error_description": "The code has expired"
        }"#;

        let err: TokenErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(err.error, "invalid_grant");
        assert_eq!(err.error_description.as_deref(), Some("The code has expired"));
    }

    #[tokio::test]
    async fn exchange_code_posts_form_with_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=c-1"))
            .and(body_string_contains("client_secret=test-secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "at-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = client()
            .exchange_code(&format!("{}/token", server.uri()), "c-1", "cb")
            .await
            .unwrap();
        assert_eq!(response["access_token"], "at-1");
    }

    #[tokio::test]
    async fn exchange_code_maps_rejection_to_invalid_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request"
            })))
            .mount(&server)
            .await;

        let err = client()
            .exchange_code(&format!("{}/token", server.uri()), "stale", "cb")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { ref reason } if reason == "Bad Request"));
    }

    #[tokio::test]
    async fn get_json_sends_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(query_param("fields", "all"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
            .mount(&server)
            .await;

        let value = client()
            .get_json(&format!("{}/me", server.uri()), &[("fields", "all")], Some("at-1"))
            .await
            .unwrap();
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn get_json_propagates_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client()
            .get_json(&format!("{}/me", server.uri()), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NetworkError(_)));
    }

    #[test]
    fn oauth_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OAuthClient>();
        assert_send_sync::<TokenExchange>();
    }
}
