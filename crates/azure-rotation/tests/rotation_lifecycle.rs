//! End-to-end rotation lifecycle tests
//!
//! Drives the backend against the recording provider fake and storage with
//! failure injection. Crash scenarios are simulated by constructing the
//! exact storage/provider state a crash would leave behind.

use std::sync::Arc;
use std::time::Duration;

use azure_rotation::config::{CONFIG_VERSION, ConfigSnapshot, ConfigStore};
use azure_rotation::core::{ErrorKind, OperationContext, SecretString};
use azure_rotation::provider::ProviderClient;
use azure_rotation::testing::{FakeClientFactory, FakeProvider, MockStorage, ProviderCall};
use azure_rotation::wal::{WalKind, WalStore};
use azure_rotation::{Backend, DateTime, Utc};
use pretty_assertions::assert_eq;

struct Harness {
    storage: Arc<MockStorage>,
    provider: Arc<FakeProvider>,
    factory: Arc<FakeClientFactory>,
    backend: Backend,
    ctx: OperationContext,
}

impl Harness {
    fn new() -> Self {
        let storage = Arc::new(MockStorage::new());
        let provider = FakeProvider::new();
        let factory = Arc::new(FakeClientFactory::new(provider.clone()));
        let backend = Backend::new(storage.clone(), factory.clone());
        Self {
            storage,
            provider,
            factory,
            backend,
            ctx: OperationContext::new(),
        }
    }

    fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.storage.clone())
    }

    fn wal_store(&self) -> WalStore {
        WalStore::new(self.storage.clone())
    }

    /// Seed the standard starting state: application `c1` with object id
    /// `o1`, active secret `s-old` under key id `k-old`.
    async fn seed(&self, ttl: Duration) {
        self.provider.register_application("c1", "o1");
        self.provider.seed_password("o1", "k-old");
        self.config_store()
            .write(&ConfigSnapshot {
                tenant_id: "t1".into(),
                client_id: "c1".into(),
                client_secret: SecretString::new("s-old"),
                client_secret_key_id: "k-old".into(),
                root_password_ttl: ttl,
                version: CONFIG_VERSION,
                ..ConfigSnapshot::default()
            })
            .await
            .unwrap();
    }

    async fn config(&self) -> ConfigSnapshot {
        self.config_store().read().await.unwrap().unwrap()
    }
}

fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
    let delta = (actual - expected).num_seconds().abs();
    assert!(delta < 60, "timestamps differ by {delta}s");
}

#[tokio::test]
async fn happy_path_stages_new_secret_and_clears_wal() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    let outcome = h.backend.rotate_root(&h.ctx).await.unwrap();
    assert!(outcome.warnings.is_empty());

    let config = h.config().await;
    assert_eq!(config.new_client_secret, SecretString::new("secret-1"));
    assert_eq!(config.new_client_secret_key_id, "key-1");
    // the active credential is untouched until promotion
    assert_eq!(config.client_secret, SecretString::new("s-old"));
    assert_eq!(config.client_secret_key_id, "k-old");
    assert!(config.new_client_secret_created.is_some());
    assert_close(
        config.new_client_secret_expiration.unwrap(),
        Utc::now() + chrono::Duration::hours(1),
    );

    // no surviving WAL record
    assert!(h.wal_store().list().await.unwrap().is_empty());

    // the old password was not removed yet
    assert_eq!(h.provider.remove_count("k-old"), 0);

    // display name carries the vault- prefix
    let name = h.provider.display_name("key-1").unwrap();
    assert!(name.starts_with("vault-"), "display name was {name}");
}

#[tokio::test]
async fn zero_ttl_defaults_to_4380_hours() {
    let h = Harness::new();
    h.seed(Duration::ZERO).await;

    h.backend.rotate_root(&h.ctx).await.unwrap();

    let end_date = h.provider.end_date("key-1").unwrap();
    assert_close(end_date, Utc::now() + chrono::Duration::hours(4_380));

    let config = h.config().await;
    assert_close(
        config.root_password_expiration_date.unwrap(),
        Utc::now() + chrono::Duration::hours(4_380),
    );
}

// Crash between the provider-side add and the WAL put: the orphaned
// password expires on its own and the next rotation proceeds normally.
#[tokio::test]
async fn orphaned_provider_password_does_not_block_rotation() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    // the crash left key-1 on the provider, nothing staged, no WAL record
    h.provider
        .add_application_password(&h.ctx, "o1", "vault-orphan", Utc::now())
        .await
        .unwrap();

    h.backend.rotate_root(&h.ctx).await.unwrap();

    let config = h.config().await;
    assert_eq!(config.new_client_secret_key_id, "key-2");
    // the orphan is left alone
    assert!(h.provider.active_key_ids("o1").contains(&"key-1".to_string()));
    assert_eq!(h.provider.remove_count("key-1"), 0);
}

// Crash between the config stage and the WAL delete: recovery clears the
// staged fields and the client keeps using the old secret.
#[tokio::test]
async fn rollback_clears_staged_fields() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    h.provider
        .add_application_password(&h.ctx, "o1", "vault-stale", Utc::now())
        .await
        .unwrap();
    let mut staged = h.config().await;
    staged.new_client_secret = SecretString::new("secret-1");
    staged.new_client_secret_key_id = "key-1".into();
    staged.new_client_secret_created = Some(Utc::now());
    staged.new_client_secret_expiration = Some(Utc::now());
    h.config_store().write(&staged).await.unwrap();
    let wal_id = h
        .wal_store()
        .put(WalKind::RotateRootCreds, serde_json::Value::Null)
        .await
        .unwrap();

    for record in h.wal_store().list().await.unwrap() {
        h.backend
            .rollback(&h.ctx, record.kind, &record.payload)
            .await
            .unwrap();
    }
    h.wal_store().delete(&wal_id).await.unwrap();

    let config = h.config().await;
    assert!(!config.has_staged_secret());
    assert_eq!(config.client_secret, SecretString::new("s-old"));
    assert_eq!(config.client_secret_key_id, "k-old");
    // the stale provider-side password is allowed to expire naturally
    assert_eq!(h.provider.remove_count("key-1"), 0);

    // the next rotation proceeds and creates a fresh credential
    h.backend.rotate_root(&h.ctx).await.unwrap();
    assert_eq!(h.config().await.new_client_secret_key_id, "key-2");
}

#[tokio::test]
async fn rollback_is_idempotent() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    let mut staged = h.config().await;
    staged.new_client_secret = SecretString::new("secret-9");
    staged.new_client_secret_key_id = "key-9".into();
    h.config_store().write(&staged).await.unwrap();

    h.backend
        .rollback(&h.ctx, WalKind::RotateRootCreds, &serde_json::Value::Null)
        .await
        .unwrap();
    let once = h.config().await;

    h.backend
        .rollback(&h.ctx, WalKind::RotateRootCreds, &serde_json::Value::Null)
        .await
        .unwrap();
    let twice = h.config().await;

    assert_eq!(once, twice);
    assert!(!twice.has_staged_secret());
}

// Back-to-back rotations: the second promotes the first's staged secret
// before creating its own; one further client-using operation promotes the
// second. Both superseded key ids are removed exactly once.
#[tokio::test]
async fn second_rotation_promotes_the_first() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    h.backend.rotate_root(&h.ctx).await.unwrap();
    h.backend.rotate_root(&h.ctx).await.unwrap();

    let config = h.config().await;
    // the first rotation's secret was promoted to active
    assert_eq!(config.client_secret, SecretString::new("secret-1"));
    assert_eq!(config.client_secret_key_id, "key-1");
    // the second rotation's secret is staged
    assert_eq!(config.new_client_secret, SecretString::new("secret-2"));
    assert_eq!(config.new_client_secret_key_id, "key-2");
    assert_eq!(h.provider.remove_count("k-old"), 1);

    // any client-using operation promotes the remaining staged secret
    h.backend.provider_client(&h.ctx).await.unwrap();

    let config = h.config().await;
    assert_eq!(config.client_secret, SecretString::new("secret-2"));
    assert_eq!(config.client_secret_key_id, "key-2");
    assert!(!config.has_staged_secret());
    assert_eq!(h.provider.remove_count("k-old"), 1);
    assert_eq!(h.provider.remove_count("key-1"), 1);
    assert_eq!(h.provider.remove_count("key-2"), 0);
}

#[tokio::test]
async fn ambiguous_application_fails_before_creating_a_password() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;
    // a second application with the same client id
    h.provider.register_application("c1", "o2");

    let err = h.backend.rotate_root(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);

    // no password was created anywhere
    let calls = h.provider.calls();
    assert!(
        calls
            .iter()
            .all(|call| !matches!(call, ProviderCall::AddPassword { .. })),
        "unexpected add call in {calls:?}"
    );
    assert!(!h.config().await.has_staged_secret());
}

#[tokio::test]
async fn unknown_application_fails_before_creating_a_password() {
    let h = Harness::new();
    // config exists but the provider knows no application for c1
    h.config_store()
        .write(&ConfigSnapshot {
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            client_secret: SecretString::new("s-old"),
            version: CONFIG_VERSION,
            ..ConfigSnapshot::default()
        })
        .await
        .unwrap();

    let err = h.backend.rotate_root(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(!h.config().await.has_staged_secret());
}

#[tokio::test]
async fn missing_config_is_a_validation_error() {
    let h = Harness::new();
    let err = h.backend.rotate_root(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// WAL staging failure after the provider-side add: the new password is
// removed again and both the WAL error and any cleanup failure surface.
#[tokio::test]
async fn wal_put_failure_removes_the_new_password() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;
    h.storage.fail_next_put();

    let err = h.backend.rotate_root(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Wal);

    // compensating removal ran; nothing staged
    assert_eq!(h.provider.remove_count("key-1"), 1);
    assert!(!h.config().await.has_staged_secret());
    assert!(h.wal_store().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn wal_put_and_cleanup_failures_are_combined() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;
    h.storage.fail_next_put();
    h.provider.fail_next_remove();

    let err = h.backend.rotate_root(&h.ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Wal);
    let message = err.to_string();
    assert!(message.contains("scripted put failure"), "{message}");
    assert!(message.contains("scripted remove failure"), "{message}");
}

#[tokio::test]
async fn wal_delete_failure_is_a_warning_not_an_error() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;
    h.storage.fail_next_delete();

    let outcome = h.backend.rotate_root(&h.ctx).await.unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("wal record"));

    // rotation itself succeeded
    let config = h.config().await;
    assert_eq!(config.new_client_secret_key_id, "key-1");
    // the record survives until recovery clears it
    assert_eq!(h.wal_store().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_old_password_removal_is_a_warning() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    h.backend.rotate_root(&h.ctx).await.unwrap();
    h.provider.fail_next_remove();

    // promotion runs inside the second rotation; its cleanup failure must
    // not fail the rotation
    let outcome = h.backend.rotate_root(&h.ctx).await.unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("k-old"), "{:?}", outcome.warnings);

    let config = h.config().await;
    assert_eq!(config.client_secret, SecretString::new("secret-1"));
    assert_eq!(config.new_client_secret_key_id, "key-2");
}

#[tokio::test]
async fn cancelled_context_aborts_rotation() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let ctx = OperationContext::with_token(token);

    let err = h.backend.rotate_root(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!h.config().await.has_staged_secret());
}

// Staged fields surviving a restart drive promotion without the in-memory
// pending flag: a fresh backend over the same storage still promotes.
#[tokio::test]
async fn staged_fields_survive_restart_and_promote() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;
    h.backend.rotate_root(&h.ctx).await.unwrap();

    // "restart": a new backend over the same storage and provider
    let restarted = Backend::new(
        h.storage.clone(),
        Arc::new(FakeClientFactory::new(h.provider.clone())),
    );
    restarted.provider_client(&h.ctx).await.unwrap();

    let config = h.config().await;
    assert_eq!(config.client_secret, SecretString::new("secret-1"));
    assert_eq!(config.client_secret_key_id, "key-1");
    assert!(!config.has_staged_secret());
    assert_eq!(h.provider.remove_count("k-old"), 1);
}

#[tokio::test]
async fn rotation_rebuilds_the_client_after_config_write() {
    let h = Harness::new();
    h.seed(Duration::from_secs(3_600)).await;

    h.backend.provider_client(&h.ctx).await.unwrap();
    let before = h.factory.builds();

    h.backend.rotate_root(&h.ctx).await.unwrap();
    // promotion via the next client-using operation forces a rebuild with
    // the promoted secret
    h.backend.provider_client(&h.ctx).await.unwrap();
    assert!(h.factory.builds() > before);
}
