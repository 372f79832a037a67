//! Scripted in-memory identity provider

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ConfigSnapshot;
use crate::core::{OperationContext, Result, SecretString};
use crate::provider::{
    Application, ClientFactory, PasswordCredential, ProviderClient, ProviderError,
};

/// One recorded provider invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `get_application` was invoked
    GetApplication {
        /// Requested client id
        client_id: String,
    },
    /// `add_application_password` was invoked
    AddPassword {
        /// Target application object id
        object_id: String,
        /// Caller-supplied display name
        display_name: String,
    },
    /// `remove_application_password` was invoked
    RemovePassword {
        /// Target application object id
        object_id: String,
        /// Key id to remove
        key_id: String,
    },
}

#[derive(Debug, Clone)]
struct FakePassword {
    key_id: String,
    display_name: String,
    end_date: DateTime<Utc>,
    active: bool,
    remove_count: u32,
}

#[derive(Debug, Clone)]
struct FakeApplication {
    client_id: String,
    object_id: String,
    passwords: Vec<FakePassword>,
}

#[derive(Default)]
struct FakeState {
    apps: Vec<FakeApplication>,
    calls: Vec<ProviderCall>,
}

/// Recording identity-provider fake with scripted failures
///
/// Generated credentials are deterministic: the n-th created password gets
/// key id `key-n` and secret `secret-n`.
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
    counter: AtomicU32,
    fail_next_add: AtomicBool,
    fail_next_remove: AtomicBool,
    fail_next_get: AtomicBool,
}

impl FakeProvider {
    /// Create an empty provider
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an application the provider knows about
    ///
    /// Registering the same client id twice makes lookups ambiguous, which
    /// is exactly what the ambiguity tests want.
    pub fn register_application(&self, client_id: &str, object_id: &str) {
        let mut state = self.state.lock().expect("fake provider poisoned");
        state.apps.push(FakeApplication {
            client_id: client_id.to_string(),
            object_id: object_id.to_string(),
            passwords: Vec::new(),
        });
    }

    /// Seed an existing active password on an application
    pub fn seed_password(&self, object_id: &str, key_id: &str) {
        let mut state = self.state.lock().expect("fake provider poisoned");
        let app = state
            .apps
            .iter_mut()
            .find(|app| app.object_id == object_id)
            .expect("unknown application");
        app.passwords.push(FakePassword {
            key_id: key_id.to_string(),
            display_name: String::new(),
            end_date: Utc::now(),
            active: true,
            remove_count: 0,
        });
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state
            .lock()
            .expect("fake provider poisoned")
            .calls
            .clone()
    }

    /// Key ids of the passwords currently active on an application
    pub fn active_key_ids(&self, object_id: &str) -> Vec<String> {
        let state = self.state.lock().expect("fake provider poisoned");
        state
            .apps
            .iter()
            .filter(|app| app.object_id == object_id)
            .flat_map(|app| &app.passwords)
            .filter(|password| password.active)
            .map(|password| password.key_id.clone())
            .collect()
    }

    /// How many times removal of `key_id` has been requested
    pub fn remove_count(&self, key_id: &str) -> u32 {
        let state = self.state.lock().expect("fake provider poisoned");
        state
            .apps
            .iter()
            .flat_map(|app| &app.passwords)
            .filter(|password| password.key_id == key_id)
            .map(|password| password.remove_count)
            .sum()
    }

    /// Display name recorded for `key_id`, if the key exists
    pub fn display_name(&self, key_id: &str) -> Option<String> {
        let state = self.state.lock().expect("fake provider poisoned");
        state
            .apps
            .iter()
            .flat_map(|app| &app.passwords)
            .find(|password| password.key_id == key_id)
            .map(|password| password.display_name.clone())
    }

    /// Expiration recorded for `key_id`, if the key exists
    pub fn end_date(&self, key_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().expect("fake provider poisoned");
        state
            .apps
            .iter()
            .flat_map(|app| &app.passwords)
            .find(|password| password.key_id == key_id)
            .map(|password| password.end_date)
    }

    /// Fail the next `add_application_password` call
    pub fn fail_next_add(&self) {
        self.fail_next_add.store(true, Ordering::SeqCst);
    }

    /// Fail the next `remove_application_password` call
    pub fn fail_next_remove(&self) {
        self.fail_next_remove.store(true, Ordering::SeqCst);
    }

    /// Fail the next `get_application` call
    pub fn fail_next_get(&self) {
        self.fail_next_get.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn get_application(
        &self,
        ctx: &OperationContext,
        client_id: &str,
    ) -> std::result::Result<Application, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Network("scripted get failure".into()));
        }

        let mut state = self.state.lock().expect("fake provider poisoned");
        state.calls.push(ProviderCall::GetApplication {
            client_id: client_id.to_string(),
        });

        let matches: Vec<_> = state
            .apps
            .iter()
            .filter(|app| app.client_id == client_id)
            .collect();
        match matches.as_slice() {
            [] => Err(ProviderError::ApplicationNotFound {
                client_id: client_id.to_string(),
            }),
            [app] => Ok(Application {
                object_id: app.object_id.clone(),
                app_id: app.client_id.clone(),
            }),
            _ => Err(ProviderError::AmbiguousApplication {
                client_id: client_id.to_string(),
            }),
        }
    }

    async fn add_application_password(
        &self,
        ctx: &OperationContext,
        object_id: &str,
        display_name: &str,
        expiration: DateTime<Utc>,
    ) -> std::result::Result<PasswordCredential, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.fail_next_add.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 503,
                body: "scripted add failure".into(),
            });
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let key_id = format!("key-{n}");
        let secret = format!("secret-{n}");

        let mut state = self.state.lock().expect("fake provider poisoned");
        state.calls.push(ProviderCall::AddPassword {
            object_id: object_id.to_string(),
            display_name: display_name.to_string(),
        });

        let app = state
            .apps
            .iter_mut()
            .find(|app| app.object_id == object_id)
            .ok_or(ProviderError::Api {
                status: 404,
                body: "unknown application object".into(),
            })?;
        app.passwords.push(FakePassword {
            key_id: key_id.clone(),
            display_name: display_name.to_string(),
            end_date: expiration,
            active: true,
            remove_count: 0,
        });

        Ok(PasswordCredential {
            key_id,
            secret_text: SecretString::new(secret),
            end_date: expiration,
        })
    }

    async fn remove_application_password(
        &self,
        ctx: &OperationContext,
        object_id: &str,
        key_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.fail_next_remove.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 503,
                body: "scripted remove failure".into(),
            });
        }

        let mut state = self.state.lock().expect("fake provider poisoned");
        state.calls.push(ProviderCall::RemovePassword {
            object_id: object_id.to_string(),
            key_id: key_id.to_string(),
        });

        // removing an absent key is success, matching the provider contract
        if let Some(password) = state
            .apps
            .iter_mut()
            .filter(|app| app.object_id == object_id)
            .flat_map(|app| &mut app.passwords)
            .find(|password| password.key_id == key_id)
        {
            password.active = false;
            password.remove_count += 1;
        }
        Ok(())
    }
}

/// [`ClientFactory`] that hands out a shared [`FakeProvider`] and counts
/// how many times a client was (re)built
pub struct FakeClientFactory {
    provider: Arc<FakeProvider>,
    builds: AtomicU32,
}

impl FakeClientFactory {
    /// Wrap a fake provider
    pub fn new(provider: Arc<FakeProvider>) -> Self {
        Self {
            provider,
            builds: AtomicU32::new(0),
        }
    }

    /// Number of `build` invocations so far
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ClientFactory for FakeClientFactory {
    fn build(&self, _snapshot: &ConfigSnapshot) -> Result<Arc<dyn ProviderClient>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }
}
