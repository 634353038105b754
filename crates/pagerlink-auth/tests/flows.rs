//! Full authorization round trips against mocked providers and a real
//! SQLite token store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pagerlink_auth::config::{GoogleConfig, MattermostConfig, SlackConfig};
use pagerlink_auth::{
    AuthConfig, AuthContext, AuthError, AuthManager, Backend, CallbackParams,
    MattermostIdentityLinker,
};
use pagerlink_store::{AuthTokenStore, Database, HostRecords, IdentityLinkStore};
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT_BASE: &str = "https://oncall.example.com";

struct Harness {
    db: Database,
    manager: AuthManager,
    ctx: AuthContext,
}

async fn harness(server: &MockServer, ttl: Duration) -> Harness {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    HostRecords::new(db.clone())
        .upsert_user("u-1", "org-1")
        .await
        .unwrap();

    let config = AuthConfig {
        redirect_base_url: REDIRECT_BASE.to_string(),
        google: Some(GoogleConfig::new("g-id", "g-secret").with_base_url(&server.uri())),
        slack: Some(SlackConfig::new("s-id", "s-secret").with_base_url(&server.uri())),
        mattermost: Some(MattermostConfig::new(server.uri(), "mm-id", "mm-secret")),
    };
    let tokens = Arc::new(AuthTokenStore::new(db.clone()).with_ttl(ttl));
    let manager = AuthManager::from_config(&config, tokens).unwrap();

    Harness {
        db,
        manager,
        ctx: AuthContext::new("u-1", "org-1"),
    }
}

fn query_of(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

async fn mount_google(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "g-access",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oauth2/v3/userinfo"))
        .and(header("authorization", "Bearer g-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "g-sub-1",
            "name": "Alice Example",
            "email": "alice@example.com"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn google_round_trip_binds_to_issuing_user() {
    let server = MockServer::start().await;
    mount_google(&server).await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h.manager.begin(Backend::Google, Some(&h.ctx)).await.unwrap();
    let state = query_of(&request.url)["state"].clone();

    let callback = CallbackParams::new().with("code", "c-1").with("state", state);
    let completed = h.manager.complete(Backend::Google, &callback).await.unwrap();

    assert_eq!(completed.context, h.ctx);
    assert_eq!(completed.access_token, "g-access");
    assert_eq!(completed.profile.user.email.as_deref(), Some("alice@example.com"));
    assert_eq!(completed.response["user"]["external_id"], "g-sub-1");
    assert_eq!(completed.response["expires_in"], 3599);
}

#[tokio::test]
async fn replayed_callback_is_rejected() {
    let server = MockServer::start().await;
    mount_google(&server).await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h.manager.begin(Backend::Google, Some(&h.ctx)).await.unwrap();
    let state = query_of(&request.url)["state"].clone();
    let callback = CallbackParams::new().with("code", "c-1").with("state", state);

    h.manager.complete(Backend::Google, &callback).await.unwrap();
    let err = h.manager.complete(Backend::Google, &callback).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidState { .. }));
}

#[tokio::test]
async fn begin_without_context_fails() {
    let server = MockServer::start().await;
    let h = harness(&server, Duration::from_secs(300)).await;

    for backend in Backend::ALL {
        let err = h.manager.begin(backend, None).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingAuthContext), "{backend}");
    }
}

#[tokio::test]
async fn expired_token_is_rejected_before_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "x"})))
        .expect(0)
        .mount(&server)
        .await;
    let h = harness(&server, Duration::ZERO).await;

    let request = h.manager.begin(Backend::Google, Some(&h.ctx)).await.unwrap();
    let state = query_of(&request.url)["state"].clone();
    let callback = CallbackParams::new().with("code", "c-1").with("state", state);

    let err = h.manager.complete(Backend::Google, &callback).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidState { .. }));
}

#[tokio::test]
async fn token_of_another_provider_is_rejected() {
    let server = MockServer::start().await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h.manager.begin(Backend::Google, Some(&h.ctx)).await.unwrap();
    let google_state = query_of(&request.url)["state"].clone();

    let callback = CallbackParams::new()
        .with("code", "c-1")
        .with("state", google_state);
    let err = h
        .manager
        .complete(Backend::MattermostLogin, &callback)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidState { .. }));
}

#[tokio::test]
async fn provider_error_does_not_consume_token() {
    let server = MockServer::start().await;
    mount_google(&server).await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h.manager.begin(Backend::Google, Some(&h.ctx)).await.unwrap();
    let state = query_of(&request.url)["state"].clone();

    let denied = CallbackParams::new()
        .with("error", "access_denied")
        .with("state", state.clone());
    let err = h.manager.complete(Backend::Google, &denied).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::ProviderDenied { ref error, .. } if error == "access_denied"
    ));

    let callback = CallbackParams::new().with("code", "c-1").with("state", state);
    assert!(h.manager.complete(Backend::Google, &callback).await.is_ok());
}

#[tokio::test]
async fn slack_install_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/oauth.v2.access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "access_token": "xoxb-bot",
            "token_type": "bot",
            "team": {"id": "T1", "name": "Acme"},
            "authed_user": {"id": "U1", "access_token": "xoxp-user", "token_type": "user"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users.profile.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "profile": {
                "real_name_normalized": "Alice Example",
                "email": "alice@example.com",
                "team": "T-other"
            }
        })))
        .mount(&server)
        .await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h
        .manager
        .begin(Backend::SlackInstall, Some(&h.ctx))
        .await
        .unwrap();
    assert!(!query_of(&request.url).contains_key("state"));

    // The provider redirects to our redirect URI, code appended.
    let redirected = format!("{}&code=c-1", request.redirect_uri);
    let callback = CallbackParams::from_url(&redirected).unwrap();

    let completed = h
        .manager
        .complete(Backend::SlackInstall, &callback)
        .await
        .unwrap();

    assert_eq!(completed.access_token, "xoxp-user");
    assert_eq!(completed.response["access_token"], "xoxb-bot");
    assert_eq!(completed.response["team"]["id"], "T1");
    assert_eq!(completed.profile.user.external_id.as_deref(), Some("U1"));
    assert_eq!(completed.profile.user.name.as_deref(), Some("Alice Example"));
}

#[tokio::test]
async fn slack_login_and_install_share_token_kind() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/oauth.v2.access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "authed_user": {"id": "U1", "access_token": "xoxp-user"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users.profile.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "profile": {"real_name_normalized": "Alice"}
        })))
        .mount(&server)
        .await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h
        .manager
        .begin(Backend::SlackLogin, Some(&h.ctx))
        .await
        .unwrap();
    let token = query_of(&request.redirect_uri)["slack_login_token"].clone();

    let callback = CallbackParams::new()
        .with("code", "c-1")
        .with("slack_login_token", token);
    let completed = h
        .manager
        .complete(Backend::SlackInstall, &callback)
        .await
        .unwrap();
    assert_eq!(completed.context.user_id, "u-1");
}

#[tokio::test]
async fn mattermost_login_links_identity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "mm-access",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/me"))
        .and(header("authorization", "Bearer mm-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "mm-1",
            "username": "alice",
            "nickname": "Al"
        })))
        .mount(&server)
        .await;
    let h = harness(&server, Duration::from_secs(300)).await;
    let links = IdentityLinkStore::new(h.db.clone());
    let linker = MattermostIdentityLinker::new(links.clone());

    let request = h
        .manager
        .begin(Backend::MattermostLogin, Some(&h.ctx))
        .await
        .unwrap();
    let state = query_of(&request.url)["state"].clone();
    let callback = CallbackParams::new().with("code", "c-1").with("state", state);

    h.manager
        .complete_with(Backend::MattermostLogin, &callback, &linker)
        .await
        .unwrap();

    let link = links.get_by_user("u-1").await.unwrap().unwrap();
    assert_eq!(link.mattermost_user_id, "mm-1");
    assert_eq!(link.nickname.as_deref(), Some("Al"));
    assert_eq!(link.mention_username(), "@alice");
}

#[tokio::test]
async fn mattermost_api_failure_surfaces_as_login_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "mm-access"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Invalid or expired session, please login again."
        })))
        .mount(&server)
        .await;
    let h = harness(&server, Duration::from_secs(300)).await;

    let request = h
        .manager
        .begin(Backend::MattermostLogin, Some(&h.ctx))
        .await
        .unwrap();
    let state = query_of(&request.url)["state"].clone();
    let callback = CallbackParams::new().with("code", "c-1").with("state", state);

    let err = h
        .manager
        .complete(Backend::MattermostLogin, &callback)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MattermostLogin { status: Some(401), .. }));
}
