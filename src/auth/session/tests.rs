#![allow(clippy::unwrap_used)]

use super::*;
use crate::auth::error::ErrorKind;
use crate::auth::password::MIN_COST;
use crate::auth::store::memory::{MemoryAccountStore, MemoryCredentialStore};
use crate::auth::token::{Algorithm, KeySet};
use chrono::Duration;

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "Secr3tPass!";
const SECRET: &[u8] = b"session-tests-secret-0123456789abcdef";

struct Harness {
    engine: Arc<SessionEngine>,
    accounts: MemoryAccountStore,
    credentials: MemoryCredentialStore,
}

fn harness(config: SessionConfig) -> Harness {
    let accounts = MemoryAccountStore::new();
    let credentials = MemoryCredentialStore::new();
    let codec = TokenCodec::new(
        Algorithm::HS256,
        "sesame-test",
        KeySet::symmetric(SECRET.to_vec()).unwrap(),
    )
    .unwrap();
    let engine = SessionEngine::new(
        Arc::new(accounts.clone()),
        Arc::new(credentials.clone()),
        PasswordHasher::new(MIN_COST),
        Arc::new(codec),
        config,
    );
    Harness {
        engine: Arc::new(engine),
        accounts,
        credentials,
    }
}

async fn signed_up(config: SessionConfig) -> (Harness, SignupOutcome) {
    let harness = harness(config);
    let outcome = harness.engine.signup(EMAIL, PASSWORD).await.unwrap();
    (harness, outcome)
}

fn device(name: &str) -> ClientMetadata {
    ClientMetadata::new(Some(name.to_string()), Some("127.0.0.1".to_string()))
}

#[tokio::test]
async fn login_refresh_logout_scenario() {
    let (h, signup) = signed_up(SessionConfig::default()).await;

    let first = h.engine.login(EMAIL, PASSWORD, device("laptop")).await.unwrap();
    assert_eq!(first.expires_in, 900);
    let claims = h.engine.verify_access_token(&first.access_token).unwrap();
    assert_eq!(claims.sub, signup.account_id.to_string());

    let second = h
        .engine
        .refresh(&first.refresh_token, device("laptop"))
        .await
        .unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert!(h.engine.verify_access_token(&second.access_token).is_ok());

    let replay = h.engine.refresh(&first.refresh_token, device("laptop")).await;
    assert_eq!(replay.unwrap_err().kind(), ErrorKind::InvalidToken);

    h.engine.logout(&second.refresh_token).await.unwrap();
    let after_logout = h.engine.refresh(&second.refresh_token, device("laptop")).await;
    assert_eq!(after_logout.unwrap_err().kind(), ErrorKind::InvalidToken);

    // Access tokens outlive refresh revocation.
    assert!(h.engine.verify_access_token(&second.access_token).is_ok());
}

#[tokio::test]
async fn huge_lifetimes_are_capped_instead_of_overflowing() {
    let config = SessionConfig::default()
        .with_access_ttl_seconds(i64::MAX)
        .with_refresh_ttl_seconds(10_000_000_000_000)
        .with_verification_ttl_seconds(i64::MAX);
    let (h, signup) = signed_up(config).await;

    let pair = h.engine.login(EMAIL, PASSWORD, device("laptop")).await.unwrap();
    assert_eq!(pair.expires_in, MAX_LIFETIME_SECONDS);
    let rotated = h
        .engine
        .refresh(&pair.refresh_token, device("laptop"))
        .await
        .unwrap();
    assert!(h.engine.verify_access_token(&rotated.access_token).is_ok());

    let stored = h.credentials.list_for_account(signup.account_id).await.unwrap();
    let horizon = Utc::now() + Duration::seconds(MAX_LIFETIME_SECONDS);
    assert!(stored.iter().all(|credential| credential.expires_at <= horizon));
}

#[tokio::test]
async fn login_records_client_metadata() {
    let (h, signup) = signed_up(SessionConfig::default()).await;
    h.engine.login(EMAIL, PASSWORD, device("phone")).await.unwrap();
    let stored = h.credentials.list_for_account(signup.account_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].client.user_agent.as_deref(), Some("phone"));
    assert!(stored[0].is_active(Utc::now()));
}

#[tokio::test]
async fn login_email_is_case_insensitive() {
    let (h, _) = signed_up(SessionConfig::default()).await;
    assert!(
        h.engine
            .login("  ALICE@Example.com ", PASSWORD, ClientMetadata::default())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let (h, _) = signed_up(SessionConfig::default()).await;

    let wrong_password = h
        .engine
        .login(EMAIL, "Secr3tPass?", ClientMetadata::default())
        .await
        .unwrap_err();
    let unknown_email = h
        .engine
        .login("mallory@example.com", PASSWORD, ClientMetadata::default())
        .await
        .unwrap_err();

    assert_eq!(wrong_password.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(unknown_email.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn malformed_stored_hash_is_invalid_credentials() {
    let (h, signup) = signed_up(SessionConfig::default()).await;
    let mut account = h.accounts.get_by_id(signup.account_id).await.unwrap().unwrap();
    account.password_hash = "garbage".to_string();
    h.accounts.update(&account).await.unwrap();

    let err = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
}

#[tokio::test]
async fn signup_validates_input() {
    let h = harness(SessionConfig::default());
    for (email, password) in [
        ("not-an-email", PASSWORD),
        ("bob@example", PASSWORD),
        ("bob@example.com", "short"),
        ("bob@example.com", ""),
    ] {
        let err = h.engine.signup(email, password).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "{email} / {password}");
    }
    let too_long = "a".repeat(MAX_PASSWORD_BYTES + 1);
    assert_eq!(
        h.engine
            .signup("bob@example.com", &too_long)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidInput
    );
}

#[tokio::test]
async fn signup_rejects_duplicates_after_normalization() {
    let (h, _) = signed_up(SessionConfig::default()).await;
    let err = h.engine.signup(" Alice@EXAMPLE.com", PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateAccount);
}

#[tokio::test]
async fn signup_stores_hash_and_verification_token() {
    let (h, signup) = signed_up(SessionConfig::default()).await;
    let account = h.accounts.get_by_id(signup.account_id).await.unwrap().unwrap();
    assert_eq!(account.email, EMAIL);
    assert_ne!(account.password_hash, PASSWORD);
    assert!(account.password_hash.starts_with("$argon2id$"));
    assert!(!account.email_verified);
    let pair = account.email_verification.unwrap();
    assert_eq!(pair.token, signup.verification_token);
    let ttl = pair.expires_at - account.created_at;
    assert_eq!(ttl, Duration::hours(24));
}

#[tokio::test]
async fn unverified_login_is_refused_when_required() {
    let config = SessionConfig::new().with_require_verified_email(true);
    let (h, signup) = signed_up(config).await;

    let err = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);

    let wrong = h.engine.verify_email(EMAIL, "not-the-token").await.unwrap_err();
    assert_eq!(wrong.kind(), ErrorKind::InvalidToken);

    h.engine
        .verify_email(EMAIL, &signup.verification_token)
        .await
        .unwrap();
    // Verifying twice is fine.
    h.engine
        .verify_email(EMAIL, &signup.verification_token)
        .await
        .unwrap();

    assert!(
        h.engine
            .login(EMAIL, PASSWORD, ClientMetadata::default())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn expired_verification_token_is_refused() {
    let config = SessionConfig::new().with_verification_ttl_seconds(0);
    let (h, signup) = signed_up(config).await;
    let err = h
        .engine
        .verify_email(EMAIL, &signup.verification_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);

    let unknown = h
        .engine
        .verify_email("nobody@example.com", &signup.verification_token)
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn unknown_refresh_token_is_invalid() {
    let h = harness(SessionConfig::default());
    let err = h
        .engine
        .refresh("never-issued", ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn expired_refresh_token_is_invalid_and_untouched() {
    let config = SessionConfig::new().with_refresh_ttl_seconds(0);
    let (h, signup) = signed_up(config).await;
    let pair = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap();

    let err = h
        .engine
        .refresh(&pair.refresh_token, ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);

    let stored = h.credentials.list_for_account(signup.account_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].revoked);
}

#[tokio::test]
async fn refresh_for_deleted_account_is_invalid() {
    let h = harness(SessionConfig::default());
    let now = Utc::now();
    let orphan = RefreshCredential::issue(
        Uuid::new_v4(),
        Duration::days(1),
        ClientMetadata::default(),
        now,
    )
    .unwrap();
    h.credentials.create(&orphan.credential).await.unwrap();

    let err = h
        .engine
        .refresh(&orphan.token, ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
    let stored = h
        .credentials
        .get_by_token(&orphan.credential.token_hash)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.revoked);
}

#[tokio::test]
async fn replay_is_rejected_without_cascade_by_default() {
    let (h, _) = signed_up(SessionConfig::default()).await;
    let laptop = h.engine.login(EMAIL, PASSWORD, device("laptop")).await.unwrap();
    let phone = h.engine.login(EMAIL, PASSWORD, device("phone")).await.unwrap();

    h.engine
        .refresh(&laptop.refresh_token, device("laptop"))
        .await
        .unwrap();
    assert!(
        h.engine
            .refresh(&laptop.refresh_token, device("laptop"))
            .await
            .is_err()
    );
    assert!(h.engine.refresh(&phone.refresh_token, device("phone")).await.is_ok());
}

#[tokio::test]
async fn replay_cascades_when_configured() {
    let config = SessionConfig::new()
        .with_replay_response(ReplayResponse::RevokeAll)
        .with_replay_grace_seconds(0);
    let (h, signup) = signed_up(config).await;
    let laptop = h.engine.login(EMAIL, PASSWORD, device("laptop")).await.unwrap();
    let phone = h.engine.login(EMAIL, PASSWORD, device("phone")).await.unwrap();

    let rotated = h
        .engine
        .refresh(&laptop.refresh_token, device("laptop"))
        .await
        .unwrap();
    let replay = h
        .engine
        .refresh(&laptop.refresh_token, device("attacker"))
        .await
        .unwrap_err();
    assert_eq!(replay.kind(), ErrorKind::InvalidToken);

    assert!(h.engine.refresh(&phone.refresh_token, device("phone")).await.is_err());
    assert!(
        h.engine
            .refresh(&rotated.refresh_token, device("laptop"))
            .await
            .is_err()
    );
    let stored = h.credentials.list_for_account(signup.account_id).await.unwrap();
    assert!(stored.iter().all(|credential| credential.revoked));
}

#[tokio::test]
async fn replay_within_grace_does_not_cascade() {
    let config = SessionConfig::new()
        .with_replay_response(ReplayResponse::RevokeAll)
        .with_replay_grace_seconds(60);
    let (h, _) = signed_up(config).await;
    let laptop = h.engine.login(EMAIL, PASSWORD, device("laptop")).await.unwrap();
    let rotated = h
        .engine
        .refresh(&laptop.refresh_token, device("laptop"))
        .await
        .unwrap();

    assert!(
        h.engine
            .refresh(&laptop.refresh_token, device("laptop"))
            .await
            .is_err()
    );
    assert!(
        h.engine
            .refresh(&rotated.refresh_token, device("laptop"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn logout_is_idempotent() {
    let (h, _) = signed_up(SessionConfig::default()).await;
    let pair = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap();
    h.engine.logout(&pair.refresh_token).await.unwrap();
    h.engine.logout(&pair.refresh_token).await.unwrap();
    h.engine.logout("never-issued").await.unwrap();
}

#[tokio::test]
async fn logout_all_revokes_every_device() {
    let (h, signup) = signed_up(SessionConfig::default()).await;
    let mut pairs = Vec::new();
    for name in ["laptop", "phone", "tablet"] {
        pairs.push(h.engine.login(EMAIL, PASSWORD, device(name)).await.unwrap());
    }

    assert_eq!(h.engine.logout_all(signup.account_id).await.unwrap(), 3);
    for pair in &pairs {
        let err = h
            .engine
            .refresh(&pair.refresh_token, ClientMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }
    assert_eq!(h.engine.logout_all(signup.account_id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_has_exactly_one_winner() {
    let (h, signup) = signed_up(SessionConfig::default()).await;
    let pair = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&h.engine);
        let token = pair.refresh_token.clone();
        tasks.push(tokio::spawn(async move {
            engine.refresh(&token, ClientMetadata::default()).await
        }));
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(pair) => winners.push(pair),
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InvalidToken);
                losers += 1;
            }
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(losers, 15);

    let now = Utc::now();
    let active: Vec<_> = h
        .credentials
        .list_for_account(signup.account_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|credential| credential.is_active(now))
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(
        active[0].token_hash,
        TokenDigest::of(&winners[0].refresh_token)
    );
}

#[tokio::test]
async fn tampered_access_token_is_invalid() {
    let (h, _) = signed_up(SessionConfig::default()).await;
    let pair = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap();
    let mut tampered = pair.access_token.clone();
    tampered.push('x');
    assert_eq!(
        h.engine.verify_access_token(&tampered).unwrap_err().kind(),
        ErrorKind::InvalidToken
    );
    assert_eq!(
        h.engine.verify_access_token("garbage").unwrap_err().kind(),
        ErrorKind::InvalidToken
    );
}

#[tokio::test]
async fn sweep_deletes_expired_and_old_revocations() {
    let config = SessionConfig::new().with_retention_seconds(60);
    let (h, signup) = signed_up(config).await;
    let kept = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap();
    let revoked = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap();
    h.engine.logout(&revoked.refresh_token).await.unwrap();

    assert_eq!(h.engine.sweep(Utc::now()).await.unwrap(), 0);
    assert_eq!(
        h.engine
            .sweep(Utc::now() + Duration::seconds(120))
            .await
            .unwrap(),
        1
    );
    let remaining = h.credentials.list_for_account(signup.account_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].token_hash, TokenDigest::of(&kept.refresh_token));
}

#[tokio::test]
async fn symmetric_engine_has_no_public_keys() {
    let h = harness(SessionConfig::default());
    assert!(matches!(h.engine.public_keys(), Err(TokenError::NoPublicKeys)));
    assert_eq!(h.engine.health().await.unwrap(), "memory");
}

#[tokio::test]
async fn resend_verification_replaces_the_pending_token() {
    let (h, signup) = signed_up(SessionConfig::default()).await;

    let resent = h.engine.resend_verification(" ALICE@example.com").await.unwrap();
    assert_ne!(resent, signup.verification_token);

    let stale = h
        .engine
        .verify_email(EMAIL, &signup.verification_token)
        .await
        .unwrap_err();
    assert_eq!(stale.kind(), ErrorKind::InvalidToken);
    h.engine.verify_email(EMAIL, &resent).await.unwrap();

    let verified = h.engine.resend_verification(EMAIL).await.unwrap_err();
    assert_eq!(verified.kind(), ErrorKind::InvalidInput);
    let unknown = h
        .engine
        .resend_verification("nobody@example.com")
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn password_reset_replaces_password_and_revokes_sessions() {
    let (h, signup) = signed_up(SessionConfig::default()).await;
    let laptop = h.engine.login(EMAIL, PASSWORD, device("laptop")).await.unwrap();
    let phone = h.engine.login(EMAIL, PASSWORD, device("phone")).await.unwrap();

    let token = h
        .engine
        .request_password_reset("Alice@Example.com")
        .await
        .unwrap()
        .unwrap();

    let wrong = h
        .engine
        .reset_password(EMAIL, "not-the-token", "N3wPassword!")
        .await
        .unwrap_err();
    assert_eq!(wrong.kind(), ErrorKind::InvalidToken);
    let short = h.engine.reset_password(EMAIL, &token, "short").await.unwrap_err();
    assert_eq!(short.kind(), ErrorKind::InvalidInput);

    h.engine
        .reset_password(EMAIL, &token, "N3wPassword!")
        .await
        .unwrap();

    let old = h
        .engine
        .login(EMAIL, PASSWORD, ClientMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(old.kind(), ErrorKind::InvalidCredentials);
    assert!(
        h.engine
            .login(EMAIL, "N3wPassword!", ClientMetadata::default())
            .await
            .is_ok()
    );

    for pair in [laptop, phone] {
        let err = h
            .engine
            .refresh(&pair.refresh_token, ClientMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }

    let reused = h
        .engine
        .reset_password(EMAIL, &token, "An0therPassword!")
        .await
        .unwrap_err();
    assert_eq!(reused.kind(), ErrorKind::InvalidToken);
    let account = h.accounts.get_by_id(signup.account_id).await.unwrap().unwrap();
    assert!(account.password_reset.is_none());
}

#[tokio::test]
async fn password_reset_for_unknown_email_is_silent() {
    let h = harness(SessionConfig::default());
    assert!(
        h.engine
            .request_password_reset("nobody@example.com")
            .await
            .unwrap()
            .is_none()
    );
    let err = h
        .engine
        .reset_password("nobody@example.com", "token", "N3wPassword!")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn expired_reset_token_is_refused() {
    let config = SessionConfig::new().with_password_reset_ttl_seconds(0);
    let (h, _) = signed_up(config).await;
    let token = h
        .engine
        .request_password_reset(EMAIL)
        .await
        .unwrap()
        .unwrap();
    let err = h
        .engine
        .reset_password(EMAIL, &token, "N3wPassword!")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
    assert!(
        h.engine
            .login(EMAIL, PASSWORD, ClientMetadata::default())
            .await
            .is_ok()
    );
}
