/*
 *        Copyright (c) 2022-2023 Dinu Blanovschi
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        https://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

use std::sync::Arc;

use git2::{Cred, CredentialType, RemoteCallbacks};
use gonzalo_keystore::KeyBlobStore;

use crate::error::GitError;

/// How a [`crate::repo::GitRepo`] authenticates against its remote. See spec
/// §3 and `git/auth.go`.
#[derive(Clone)]
pub enum GitAuth {
    /// `git@<provider>:<vendor>/<project>` transport, pinning the remote
    /// host key the same way [`gonzalo_ssh`] does.
    Ssh {
        user: String,
        private_key_pem: Arc<str>,
        host_key_store: Arc<dyn KeyBlobStore>,
    },
    /// `https://[user[:password]@]<provider>/<vendor>/<project>.git`.
    Https {
        user: Option<String>,
        password: Option<String>,
    },
}

impl GitAuth {
    pub fn ssh(user: impl Into<String>, private_key_pem: impl Into<Arc<str>>, host_key_store: Arc<dyn KeyBlobStore>) -> Self {
        let user = user.into();
        let user = if user.is_empty() { "git".to_owned() } else { user };
        GitAuth::Ssh {
            user,
            private_key_pem: private_key_pem.into(),
            host_key_store,
        }
    }

    pub fn https(user: Option<String>, password: Option<String>) -> Self {
        GitAuth::Https { user, password }
    }

    pub fn none() -> Self {
        GitAuth::Https {
            user: None,
            password: None,
        }
    }

    pub fn is_ssh(&self) -> bool {
        matches!(self, GitAuth::Ssh { .. })
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            GitAuth::Ssh { user, .. } => Some(user.as_str()),
            GitAuth::Https { user, .. } => user.as_deref(),
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            GitAuth::Ssh { .. } => None,
            GitAuth::Https { password, .. } => password.as_deref(),
        }
    }

    /// Builds the `git2` remote callbacks for this auth, wiring up the TOFU
    /// host-key check for SSH and plain credentials for HTTPS.
    pub fn remote_callbacks<'a>(&'a self, provider: &'a str) -> RemoteCallbacks<'a> {
        let mut callbacks = RemoteCallbacks::new();

        match self {
            GitAuth::Ssh {
                user,
                private_key_pem,
                host_key_store,
            } => {
                callbacks.credentials(move |_url, _username, allowed| {
                    if allowed.contains(CredentialType::SSH_KEY) {
                        Cred::ssh_key_from_memory(user, None, private_key_pem, None)
                    } else {
                        Err(git2::Error::from_str("no usable ssh credential type offered"))
                    }
                });

                let store = Arc::clone(host_key_store);
                let provider = provider.to_owned();
                callbacks.certificate_check(move |cert, _host| {
                    let hostkey = cert.as_hostkey().and_then(|h| h.hostkey()).ok_or_else(|| {
                        git2::Error::from_str("remote did not present an ssh host key")
                    })?;

                    if store.has(&provider, "git") {
                        let known = store.get(&provider, "git");
                        if known.is_empty() {
                            return Err(git2::Error::from_str("empty pinned host key"));
                        }
                        if known != hostkey {
                            return Err(git2::Error::from_str(&format!(
                                "{}",
                                GitError::PinningMismatch(provider.clone())
                            )));
                        }
                    } else if let Err(err) = store.set(&provider, "git", hostkey) {
                        return Err(git2::Error::from_str(&err.to_string()));
                    }

                    Ok(git2::CertificateCheckStatus::CertificateOk)
                });
            }
            GitAuth::Https { user, password } => {
                if user.is_some() || password.is_some() {
                    let user = user.clone().unwrap_or_default();
                    let password = password.clone().unwrap_or_default();
                    callbacks.credentials(move |_url, _username, _allowed| {
                        Cred::userpass_plaintext(&user, &password)
                    });
                }
            }
        }

        callbacks
    }
}
