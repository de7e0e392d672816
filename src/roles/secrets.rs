//! # Secret Store
//!
//! Password material for managed roles, one Kubernetes secret per role with
//! the keys `username` and `password`.
//!
//! Reads are never cached across passes. Writes carry the resource version
//! they were based on so a concurrent edit surfaces as a conflict.

use crate::constants::{SECRET_PASSWORD_KEY, SECRET_USERNAME_KEY};
use crate::roles::retry::RetryPolicy;
use crate::roles::types::{Password, SecretPassword};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Decoded content of a role secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEntry {
    /// `None` when the secret has no `username` key
    pub username: Option<String>,
    pub password: Password,
    pub resource_version: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret {0} not found")]
    NotFound(String),
    #[error("secret {name} is unusable: {reason}")]
    Invalid { name: String, reason: String },
    #[error("secret {0} was modified concurrently")]
    Conflict(String),
    #[error("secret {name} could not be accessed: {reason}")]
    Transient { name: String, reason: String },
}

impl SecretStoreError {
    /// Conflicts and transient failures are worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SecretStoreError::Conflict(_) | SecretStoreError::Transient { .. }
        )
    }
}

/// Read and write access to role secrets of one namespace
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<SecretEntry, SecretStoreError>;

    /// Replace `username` and `password`, returning the new resource version
    async fn write(
        &self,
        name: &str,
        username: &str,
        password: &Password,
        expected_version: &str,
    ) -> Result<String, SecretStoreError>;
}

/// Secret store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    api: Api<Secret>,
}

impl std::fmt::Debug for KubeSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretStore").finish_non_exhaustive()
    }
}

impl KubeSecretStore {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

fn classify_kube_error(name: &str, error: kube::Error) -> SecretStoreError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            SecretStoreError::NotFound(name.to_string())
        }
        kube::Error::Api(api_err) if api_err.code == 409 => {
            SecretStoreError::Conflict(name.to_string())
        }
        kube::Error::Api(api_err) if matches!(api_err.code, 400 | 403 | 422) => {
            SecretStoreError::Invalid {
                name: name.to_string(),
                reason: api_err.message,
            }
        }
        other => SecretStoreError::Transient {
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Decode the role keys of a secret
///
/// # Errors
/// `Invalid` when the password is missing or a value is not UTF-8.
pub fn decode_secret(name: &str, secret: &Secret) -> Result<SecretEntry, SecretStoreError> {
    let invalid = |reason: String| SecretStoreError::Invalid {
        name: name.to_string(),
        reason,
    };
    let data = secret.data.as_ref();
    let text = |key: &str| -> Result<Option<String>, SecretStoreError> {
        data.and_then(|data| data.get(key))
            .map(|value| {
                String::from_utf8(value.0.clone())
                    .map_err(|error| invalid(format!("key {key} is not valid UTF-8: {error}")))
            })
            .transpose()
    };

    let password = text(SECRET_PASSWORD_KEY)?
        .ok_or_else(|| invalid(format!("missing key {SECRET_PASSWORD_KEY}")))?;
    let username = text(SECRET_USERNAME_KEY)?;
    let resource_version = secret
        .metadata
        .resource_version
        .clone()
        .ok_or_else(|| invalid("missing resource version".to_string()))?;

    Ok(SecretEntry {
        username,
        password: Password::new(password),
        resource_version,
    })
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn read(&self, name: &str) -> Result<SecretEntry, SecretStoreError> {
        let secret = self
            .api
            .get(name)
            .await
            .map_err(|e| classify_kube_error(name, e))?;
        decode_secret(name, &secret)
    }

    async fn write(
        &self,
        name: &str,
        username: &str,
        password: &Password,
        expected_version: &str,
    ) -> Result<String, SecretStoreError> {
        let mut data = BTreeMap::new();
        data.insert(
            SECRET_USERNAME_KEY.to_string(),
            ByteString(username.as_bytes().to_vec()),
        );
        data.insert(
            SECRET_PASSWORD_KEY.to_string(),
            ByteString(password.expose().as_bytes().to_vec()),
        );
        // resourceVersion in a merge patch turns it into a conditional update
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": expected_version },
            "data": data,
        });
        let patched = self
            .api
            .patch(
                name,
                &PatchParams::apply(crate::constants::FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| classify_kube_error(name, e))?;
        patched
            .metadata
            .resource_version
            .ok_or_else(|| SecretStoreError::Transient {
                name: name.to_string(),
                reason: "patched secret has no resource version".to_string(),
            })
    }
}

/// Why a role's password could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretProblem {
    pub message: String,
    /// Worth retrying soon rather than at the next regular pass
    pub transient: bool,
}

/// Read the password of `role` from `secret_name`
///
/// A secret without a `username` key is completed with the role name
/// before use. A username naming another role fails the role. Conflicts
/// and transient failures are retried according to `policy`.
pub async fn resolve_password<S>(
    store: &S,
    secret_name: &str,
    role: &str,
    policy: &RetryPolicy,
) -> Result<SecretPassword, SecretProblem>
where
    S: SecretStore + ?Sized,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match store.read(secret_name).await {
            Ok(entry) => match entry.username.as_deref() {
                Some(username) if username == role => {
                    return Ok(SecretPassword {
                        password: entry.password,
                        resource_version: entry.resource_version,
                    });
                }
                Some(username) => {
                    return Err(SecretProblem {
                        message: format!(
                            "secret {secret_name} belongs to role {username}, not {role}"
                        ),
                        transient: false,
                    });
                }
                None => {
                    info!(
                        secret = secret_name,
                        role = role,
                        "Secret has no username, writing the role name"
                    );
                    match store
                        .write(secret_name, role, &entry.password, &entry.resource_version)
                        .await
                    {
                        Ok(resource_version) => {
                            return Ok(SecretPassword {
                                password: entry.password,
                                resource_version,
                            });
                        }
                        Err(error) => error,
                    }
                }
            },
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(SecretProblem {
                message: error.to_string(),
                transient: false,
            });
        }
        if !policy.allows_retry_after(attempt) {
            warn!(
                secret = secret_name,
                role = role,
                attempts = attempt,
                error = %error,
                "Giving up on secret for this pass"
            );
            return Err(SecretProblem {
                message: error.to_string(),
                transient: true,
            });
        }
        debug!(secret = secret_name, attempt = attempt, error = %error, "Retrying secret access");
        policy.pause(attempt).await;
    }
}
