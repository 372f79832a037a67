//! Microsoft Graph backed provider client
//!
//! Covers exactly the three operations the rotation core needs: resolving
//! an application by client id, adding a password credential, removing one
//! by key id. Tokens are acquired with the client-credentials grant against
//! the configured cloud environment and cached until shortly before expiry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::{Application, ClientFactory, PasswordCredential, ProviderClient, ProviderError};
use crate::config::ConfigSnapshot;
use crate::core::{OperationContext, Result, RotationError, SecretString};

/// User agent sent on every Graph request
const USER_AGENT: &str = concat!("azure-rotation/", env!("CARGO_PKG_VERSION"));

/// Refresh the cached token this long before its reported expiry
const TOKEN_EXPIRY_SKEW_SECS: i64 = 30;

/// Maximum length of a provider error body carried into logs and errors
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate and redact a provider response body before it reaches a log
/// line or an error message
fn sanitize_body(body: &str) -> String {
    let truncated = if body.len() > MAX_ERROR_BODY_LENGTH {
        // back up to a char boundary so the slice never panics
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} total bytes]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    if let Ok(mut parsed) = serde_json::from_str::<serde_json::Value>(&truncated) {
        for field in ["access_token", "secretText", "secret", "password"] {
            if parsed.get(field).is_some() {
                parsed[field] = json!("[REDACTED]");
            }
        }
        parsed.to_string()
    } else {
        truncated
    }
}

#[derive(Debug)]
struct Endpoints {
    login: &'static str,
    graph: &'static str,
}

/// Map an environment name to its login and Graph endpoints
///
/// The empty string selects the public cloud.
fn environment_endpoints(name: &str) -> Result<Endpoints> {
    match name {
        "" | "AzurePublicCloud" => Ok(Endpoints {
            login: "https://login.microsoftonline.com",
            graph: "https://graph.microsoft.com",
        }),
        "AzureUSGovernmentCloud" => Ok(Endpoints {
            login: "https://login.microsoftonline.us",
            graph: "https://graph.microsoft.us",
        }),
        "AzureChinaCloud" => Ok(Endpoints {
            login: "https://login.chinacloudapi.cn",
            graph: "https://microsoftgraph.chinacloudapi.cn",
        }),
        other => Err(RotationError::validation(format!(
            "unknown environment '{other}'"
        ))),
    }
}

struct CachedToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ApplicationList {
    value: Vec<ApplicationObject>,
}

#[derive(Deserialize)]
struct ApplicationObject {
    id: String,
    #[serde(rename = "appId")]
    app_id: String,
}

#[derive(Deserialize)]
struct AddPasswordResponse {
    #[serde(rename = "keyId")]
    key_id: String,
    #[serde(rename = "secretText")]
    secret_text: String,
    #[serde(rename = "endDateTime")]
    end_date_time: DateTime<Utc>,
}

/// REST client against the Microsoft Graph application surface
pub struct GraphClient {
    http: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    login_base: String,
    graph_base: String,
    scope: String,
    token: Mutex<Option<CachedToken>>,
}

impl GraphClient {
    /// Build a client from the active configuration
    ///
    /// Requires a client secret; workload identity federation needs a
    /// host-supplied token source and is rejected here.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self> {
        if snapshot.client_secret.is_empty() {
            return Err(RotationError::validation(
                "cannot build provider client without a client_secret",
            ));
        }
        let endpoints = environment_endpoints(&snapshot.environment)?;

        let scope = if snapshot.resource.is_empty() {
            format!("{}/.default", endpoints.graph)
        } else {
            format!("{}/.default", snapshot.resource.trim_end_matches('/'))
        };

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| RotationError::validation(format!("building http client: {err}")))?;

        Ok(Self {
            http,
            tenant_id: snapshot.tenant_id.clone(),
            client_id: snapshot.client_id.clone(),
            client_secret: snapshot.client_secret.clone(),
            login_base: endpoints.login.to_string(),
            graph_base: endpoints.graph.to_string(),
            scope,
            token: Mutex::new(None),
        })
    }

    async fn send(
        &self,
        ctx: &OperationContext,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        tokio::select! {
            () = ctx.cancelled() => Err(ProviderError::Cancelled),
            response = request.send() => {
                response.map_err(|err| ProviderError::Network(err.to_string()))
            }
        }
    }

    async fn bearer(&self, ctx: &OperationContext) -> std::result::Result<String, ProviderError> {
        let mut slot = self.token.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.expires_at > Utc::now() {
                return Ok(cached.value.expose(str::to_owned));
            }
        }

        debug!(tenant_id = %self.tenant_id, "acquiring provider access token");
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base, self.tenant_id
        );
        let request = self.http.post(&url).form(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            (
                "client_secret",
                &self.client_secret.expose(str::to_owned),
            ),
            ("scope", self.scope.as_str()),
        ]);

        let response = self.send(ctx, request).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        if !status.is_success() {
            let sanitized = sanitize_body(&body);
            error!(status = %status, body = %sanitized, "token request failed");
            return Err(ProviderError::Auth {
                reason: format!("HTTP {status}"),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|err| {
            ProviderError::Auth {
                reason: format!("parsing token response: {err}"),
            }
        })?;

        let expires_at =
            Utc::now() + Duration::seconds((token.expires_in - TOKEN_EXPIRY_SKEW_SECS).max(0));
        let value = token.access_token.clone();
        *slot = Some(CachedToken {
            value: SecretString::new(token.access_token),
            expires_at,
        });
        Ok(value)
    }

    async fn read_error(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::Api {
            status,
            body: sanitize_body(&body),
        }
    }
}

#[async_trait]
impl ProviderClient for GraphClient {
    async fn get_application(
        &self,
        ctx: &OperationContext,
        client_id: &str,
    ) -> std::result::Result<Application, ProviderError> {
        let bearer = self.bearer(ctx).await?;
        let url = format!("{}/v1.0/applications", self.graph_base);
        let request = self
            .http
            .get(&url)
            .bearer_auth(bearer)
            .query(&[("$filter", format!("appId eq '{client_id}'"))]);

        let response = self.send(ctx, request).await?;
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let list: ApplicationList = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        match list.value.as_slice() {
            [] => Err(ProviderError::ApplicationNotFound {
                client_id: client_id.to_string(),
            }),
            [app] => Ok(Application {
                object_id: app.id.clone(),
                app_id: app.app_id.clone(),
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
        let bearer = self.bearer(ctx).await?;
        let url = format!("{}/v1.0/applications/{object_id}/addPassword", self.graph_base);
        let request = self.http.post(&url).bearer_auth(bearer).json(&json!({
            "passwordCredential": {
                "displayName": display_name,
                "endDateTime": expiration.to_rfc3339(),
            }
        }));

        let response = self.send(ctx, request).await?;
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let created: AddPasswordResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        Ok(PasswordCredential {
            key_id: created.key_id,
            secret_text: SecretString::new(created.secret_text),
            end_date: created.end_date_time,
        })
    }

    async fn remove_application_password(
        &self,
        ctx: &OperationContext,
        object_id: &str,
        key_id: &str,
    ) -> std::result::Result<(), ProviderError> {
        let bearer = self.bearer(ctx).await?;
        let url = format!(
            "{}/v1.0/applications/{object_id}/removePassword",
            self.graph_base
        );
        let request = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .json(&json!({ "keyId": key_id }));

        let response = self.send(ctx, request).await?;
        let status = response.status();
        // a key already absent on the provider is success
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(key_id, "password credential already absent");
            return Ok(());
        }
        if !status.is_success() {
            let err = Self::read_error(response).await;
            if let ProviderError::Api { body, .. } = &err {
                if body.contains("No password credential found") {
                    debug!(key_id, "password credential already absent");
                    return Ok(());
                }
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Production [`ClientFactory`] building [`GraphClient`] values
#[derive(Debug, Default)]
pub struct GraphClientFactory;

impl GraphClientFactory {
    /// Create the factory
    pub fn new() -> Self {
        Self
    }
}

impl ClientFactory for GraphClientFactory {
    fn build(&self, snapshot: &ConfigSnapshot) -> Result<Arc<dyn ProviderClient>> {
        Ok(Arc::new(GraphClient::from_snapshot(snapshot)?))
    }
}
