// Integration tests for `AuthController` against a wiremock backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use optionix_core::{
    ApiClient, AuthController, AuthError, AuthPhase, MemoryStore, Platform, Registration,
    RegistrationForm, Session, TokenStore,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup(platform: Platform) -> (MockServer, Arc<MemoryStore>, AuthController) {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let auth = controller(&server.uri(), platform, store.clone());
    (server, store, auth)
}

fn controller(base_url: &str, platform: Platform, store: Arc<MemoryStore>) -> AuthController {
    let api = ApiClient::with_base_url(base_url, platform, Duration::from_secs(5), store)
        .expect("client builds");
    AuthController::new(api)
}

fn assert_consistent(session: &Session) {
    assert_eq!(session.is_authenticated(), session.user().is_some());
}

fn account() -> optionix_core::NewAccount {
    RegistrationForm {
        full_name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        password: "Analytical1".to_string(),
        confirm_password: "Analytical1".to_string(),
        accepted_terms: true,
    }
    .validate()
    .expect("valid registration form")
}

async fn mount_profile(server: &MockServer, profile_path: &str, token: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(profile_path))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ── Startup ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restore_without_credential_is_anonymous() {
    let (_server, _store, auth) = setup(Platform::Mobile).await;
    assert_eq!(auth.session().phase(), AuthPhase::Unknown);
    assert!(auth.session().loading());

    assert_eq!(auth.restore().await, AuthPhase::Anonymous);

    let session = auth.session();
    assert!(!session.loading());
    assert_consistent(&session);
}

#[tokio::test]
async fn test_restore_with_stored_credential_fetches_profile() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("abc").expect("seed");
    mount_profile(&server, "/auth/profile", "abc", json!({"id": 1, "email": "a@b.co"})).await;

    assert_eq!(auth.restore().await, AuthPhase::Authenticated);

    let session = auth.session();
    assert_eq!(session.user().and_then(|u| u.get("id")), Some(&json!(1)));
    assert_consistent(&session);
}

#[tokio::test]
async fn test_restore_with_rejected_credential_clears_it() {
    let (server, store, auth) = setup(Platform::Web).await;
    store.save("expired").expect("seed");
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Anonymous);
    assert_eq!(store.load(), None);
    assert!(!auth.session().loading());
}

#[tokio::test]
async fn test_restore_failure_of_any_kind_clears_credential() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("abc").expect("seed");
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Anonymous);
    assert_eq!(store.load(), None);
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_persists_token_and_fetches_profile() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "trader@optionix.io", "password": "Secret123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t1"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"full_name": "Trader"})).await;

    auth.login("trader@optionix.io", "Secret123")
        .await
        .expect("login succeeds");

    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Authenticated);
    assert_eq!(session.user().and_then(|u| u.display_name()), Some("Trader"));
    assert_eq!(session.error(), None);
    assert!(!session.loading());
    assert_consistent(&session);
    assert_eq!(store.load().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_web_login_uses_form_body_and_embedded_user() {
    let (server, store, auth) = setup(Platform::Web).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_string_contains("username=trader%40optionix.io"))
        .and(body_string_contains("password=Secret123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "w1",
            "token_type": "bearer",
            "user": {"id": 9, "email": "trader@optionix.io"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    auth.login("trader@optionix.io", "Secret123")
        .await
        .expect("login succeeds");

    assert_eq!(
        auth.session().user().and_then(|u| u.get("id")),
        Some(&json!(9))
    );
    assert_eq!(store.load().as_deref(), Some("w1"));
}

#[tokio::test]
async fn test_login_logout_login_keeps_only_the_fresh_token() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t1"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t2"})))
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"id": 1})).await;
    mount_profile(&server, "/auth/profile", "t2", json!({"id": 1})).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    auth.login("trader@optionix.io", "Secret123").await.expect("first login");
    assert_eq!(store.load().as_deref(), Some("t1"));

    auth.logout().await.expect("logout");
    assert_eq!(store.load(), None);
    assert_eq!(auth.session().phase(), AuthPhase::Anonymous);

    auth.login("trader@optionix.io", "Secret123").await.expect("second login");
    assert_eq!(store.load().as_deref(), Some("t2"));
    assert_consistent(&auth.session());
}

#[tokio::test]
async fn test_rejected_login_keeps_prior_state_and_credential() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("old").expect("seed");
    mount_profile(&server, "/auth/profile", "old", json!({"id": 1})).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Incorrect email or password"})),
        )
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Authenticated);

    let err = auth
        .login("trader@optionix.io", "wrong-pass")
        .await
        .expect_err("login rejected");
    assert!(matches!(err, AuthError::Rejected { .. }));
    assert_eq!(err.user_message(), "Incorrect email or password");

    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Authenticated);
    assert_eq!(session.error(), Some("Incorrect email or password"));
    assert!(!session.loading());
    assert_eq!(store.load().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_error_is_cleared_when_a_new_attempt_starts() {
    let (server, _store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t1"})))
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"id": 1})).await;

    let err = auth.login("trader@optionix.io", "Secret123").await.expect_err("first fails");
    assert_eq!(err.user_message(), "Login failed. Please check your credentials.");
    assert!(auth.session().error().is_some());

    auth.login("trader@optionix.io", "Secret123").await.expect("second succeeds");
    assert_eq!(auth.session().error(), None);
}

#[tokio::test]
async fn test_clear_error() {
    let (server, _store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let _ = auth.login("trader@optionix.io", "Secret123").await;
    assert!(auth.session().error().is_some());

    auth.clear_error();
    assert_eq!(auth.session().error(), None);
}

#[tokio::test]
async fn test_login_without_token_is_malformed() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"id": 1}})))
        .mount(&server)
        .await;

    let err = auth
        .login("trader@optionix.io", "Secret123")
        .await
        .expect_err("no token");
    assert!(matches!(err, AuthError::Malformed { .. }));
    assert_eq!(store.load(), None);
    assert!(!auth.session().is_authenticated());
}

#[tokio::test]
async fn test_failed_profile_fetch_after_login_persists_nothing() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = auth
        .login("trader@optionix.io", "Secret123")
        .await
        .expect_err("profile failed");
    assert!(matches!(err, AuthError::Server { .. }));
    assert_eq!(store.load(), None);
    assert_consistent(&auth.session());
}

#[tokio::test]
async fn test_connectivity_failure_is_distinct() {
    let store = Arc::new(MemoryStore::new());
    // Nothing listens on port 1.
    let auth = controller("http://127.0.0.1:1", Platform::Mobile, store);

    let err = auth
        .login("trader@optionix.io", "Secret123")
        .await
        .expect_err("no backend");
    assert!(matches!(err, AuthError::Connectivity { .. }));
    assert_eq!(
        auth.session().error(),
        Some("Unable to connect to server. Check your internet connection.")
    );
}

// ── Concurrency & cancellation ──────────────────────────────────────

#[tokio::test]
async fn test_overlapping_logins_reach_the_backend_once() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "t1"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"id": 1})).await;

    let (first, second) = futures::join!(
        auth.login("first@optionix.io", "Secret123"),
        auth.login("second@optionix.io", "Secret123"),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(AuthError::Busy)));
    assert_eq!(store.load().as_deref(), Some("t1"));
    // A rejected overlap does not clobber the pending attempt's state.
    assert_eq!(auth.session().error(), None);
}

#[tokio::test]
async fn test_logout_waits_for_pending_login() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "t1"}))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"id": 1})).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let (login, logout) = futures::join!(
        auth.login("trader@optionix.io", "Secret123"),
        auth.logout(),
    );

    assert!(login.is_ok());
    assert!(logout.is_ok());
    assert_eq!(store.load(), None);
    assert_eq!(auth.session().phase(), AuthPhase::Anonymous);
}

#[tokio::test]
async fn test_cancelled_login_leaves_no_trace() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "t1"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let (result, _) = tokio::join!(
        auth.login_with_cancel("trader@optionix.io", "Secret123", &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        },
    );

    assert!(matches!(result, Err(AuthError::Cancelled)));
    assert_eq!(store.load(), None);
    let session = auth.session();
    assert!(!session.loading());
    assert_eq!(session.error(), None);
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_teardown_stops_state_updates() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t1"})))
        .mount(&server)
        .await;

    let before = auth.session();
    auth.teardown();

    let result = auth.login("trader@optionix.io", "Secret123").await;
    assert!(matches!(result, Err(AuthError::Cancelled)));
    assert_eq!(auth.session(), before);
    assert_eq!(store.load(), None);
}

// ── Logout ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_logout_with_failing_backend_still_signs_out() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("abc").expect("seed");
    mount_profile(&server, "/auth/profile", "abc", json!({"id": 1})).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Authenticated);
    auth.logout().await.expect("local logout succeeds");

    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Anonymous);
    assert!(!session.loading());
    assert_eq!(session.error(), None);
    assert_eq!(store.load(), None);
}

#[tokio::test]
async fn test_logout_without_backend_still_signs_out() {
    let store = Arc::new(MemoryStore::with_token("abc"));
    let auth = controller("http://127.0.0.1:1", Platform::Web, store.clone());

    auth.logout().await.expect("local logout succeeds");
    assert_eq!(store.load(), None);
    assert!(!auth.session().is_authenticated());
}

// ── Registration ────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_with_access_token_signs_in() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_string_contains("\"data_processing_consent\":true"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"access_token": "t1"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"full_name": "Ada Lovelace"})).await;

    let outcome = auth.register(&account()).await.expect("registration succeeds");

    assert_eq!(outcome, Registration::SignedIn);
    assert!(!outcome.requires_login());
    assert!(auth.session().is_authenticated());
    assert_eq!(store.load().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_register_without_token_requires_login() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    let outcome = auth.register(&account()).await.expect("registration succeeds");

    assert_eq!(outcome, Registration::LoginRequired);
    assert!(outcome.requires_login());
    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Anonymous);
    assert!(!session.loading());
    assert_eq!(store.load(), None);
}

#[tokio::test]
async fn test_register_duplicate_account_is_rejected() {
    let (server, _store, auth) = setup(Platform::Web).await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"detail": "Email already registered"})),
        )
        .mount(&server)
        .await;

    let err = auth.register(&account()).await.expect_err("duplicate");
    assert!(matches!(err, AuthError::Rejected { .. }));
    assert_eq!(auth.session().error(), Some("Email already registered"));
}

// ── Session expiry ──────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_response_signs_out_without_logout() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("abc").expect("seed");
    mount_profile(&server, "/auth/profile", "abc", json!({"id": 1})).await;
    Mock::given(method("GET"))
        .and(path("/portfolio/summary"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Authenticated);
    let mut updates = auth.subscribe();
    updates.borrow_and_update();

    let err = auth
        .api()
        .get_json::<Value>("/portfolio/summary")
        .await
        .expect_err("expired");
    assert!(matches!(err, optionix_core::ApiError::Unauthorized));

    assert!(updates.has_changed().expect("controller alive"));
    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Anonymous);
    assert_consistent(&session);
    assert_eq!(store.load(), None);
}

#[tokio::test]
async fn test_stale_unauthorized_after_login_keeps_fresh_session() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("old").expect("seed");
    mount_profile(&server, "/auth/profile", "old", json!({"id": 1})).await;
    Mock::given(method("GET"))
        .and(path("/portfolio/summary"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "new", "user": {"id": 2}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Authenticated);

    let (stale, login) = tokio::join!(
        auth.api().get_json::<Value>("/portfolio/summary"),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            auth.login("trader@optionix.io", "Secret123").await
        },
    );

    assert!(matches!(stale, Err(optionix_core::ApiError::Unauthorized)));
    assert!(login.is_ok());
    assert_eq!(store.load().as_deref(), Some("new"));
    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Authenticated);
    assert_eq!(session.user().and_then(|u| u.get("id")), Some(&json!(2)));
    assert_consistent(&session);
}

#[tokio::test]
async fn test_unauthorized_during_pending_login_yields_to_the_login() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("old").expect("seed");
    mount_profile(&server, "/auth/profile", "old", json!({"id": 1})).await;
    Mock::given(method("GET"))
        .and(path("/portfolio/summary"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "new", "user": {"id": 2}}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(auth.restore().await, AuthPhase::Authenticated);

    let (expired, login) = tokio::join!(
        auth.api().get_json::<Value>("/portfolio/summary"),
        auth.login("trader@optionix.io", "Secret123"),
    );

    assert!(matches!(expired, Err(optionix_core::ApiError::Unauthorized)));
    assert!(login.is_ok());
    assert_eq!(store.load().as_deref(), Some("new"));
    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Authenticated);
    assert!(!session.loading());
    assert_consistent(&session);
}

// ── Unresolved startup ──────────────────────────────────────────────

#[tokio::test]
async fn test_register_before_restore_reads_stored_credential() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("abc").expect("seed");
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert_eq!(auth.session().phase(), AuthPhase::Unknown);
    let outcome = auth.register(&account()).await.expect("registration succeeds");

    assert_eq!(outcome, Registration::LoginRequired);
    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Authenticated);
    assert!(!session.loading());
    assert_consistent(&session);
    assert_eq!(store.load().as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_login_before_restore_replaces_rejected_credential() {
    let (server, store, auth) = setup(Platform::Mobile).await;
    store.save("stale").expect("seed");
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t1"})))
        .mount(&server)
        .await;
    mount_profile(&server, "/auth/profile", "t1", json!({"id": 3})).await;

    auth.login("trader@optionix.io", "Secret123")
        .await
        .expect("login succeeds");

    let session = auth.session();
    assert_eq!(session.phase(), AuthPhase::Authenticated);
    assert_eq!(session.user().and_then(|u| u.get("id")), Some(&json!(3)));
    assert_eq!(store.load().as_deref(), Some("t1"));
}
