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

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use gonzalo_git::{GitAuth, GitPool, GitRepo};
use gonzalo_keystore::{FsKeyBlobStore, KeyBlobStore};
use gonzalo_project::{Project, DEFAULT_RECIPE_FILE};
use gonzalo_ssh::{HostAddr, KeyPair, SSHConnection, SSHPool};

use crate::config::{ProcessConfig, ProviderConfig};

/// Binds one [`SSHPool`] and one [`GitPool`] together, mirroring
/// `server/server.go`'s `Gonzalo` struct and the thin `crates/upsilon`
/// binary's facade in the host workspace.
pub struct Gonzalo {
    bootstrap_key: Arc<KeyPair>,
    ssh: SSHPool,
    git: GitPool,
}

impl Gonzalo {
    /// Creates the storage directory layout, loads the bootstrap SSH key,
    /// and wires a [`GitPool`]/[`SSHPool`] pair per `config`. Analogous to
    /// `main()` in `cmd/gonzalo-server/main.go`.
    pub fn bootstrap(config: &ProcessConfig) -> anyhow::Result<Self> {
        let known_hosts_dir = config.storage.join("ssh").join("known_hosts");
        let private_dir = config.storage.join("ssh").join("private");
        let git_dir = config.storage.join("git");

        for dir in [&known_hosts_dir, &private_dir, &git_dir] {
            std::fs::create_dir_all(dir).with_context(|| format!("creating storage directory {}", dir.display()))?;
            set_dir_mode(dir, 0o700)?;
        }

        let host_store: Arc<dyn KeyBlobStore> = Arc::new(FsKeyBlobStore::new(&known_hosts_dir, 0o644)?);
        let private_store: Arc<dyn KeyBlobStore> = Arc::new(FsKeyBlobStore::new(&private_dir, 0o600)?);

        let bootstrap_key = load_bootstrap_key(&config.bootstrap_key)?;

        let git = GitPool::new(&git_dir);
        for (provider, provider_config) in &config.providers {
            let auth = match provider_config {
                ProviderConfig::Https => GitAuth::none(),
                ProviderConfig::Ssh { key, user } => {
                    let pem = std::fs::read_to_string(key)
                        .with_context(|| format!("reading git ssh key for provider {provider}"))?;
                    GitAuth::ssh(user.clone(), pem, Arc::clone(&host_store))
                }
            };
            git.set_provider_auth(provider.clone(), auth);
        }

        let ssh = SSHPool::new(host_store, private_store, config.rotation_bits);

        Ok(Self {
            bootstrap_key: Arc::new(bootstrap_key),
            ssh,
            git,
        })
    }

    /// Returns the rotated, pooled connection to `(host, port, user)`,
    /// running the key-rotation handshake on first contact. Mirrors
    /// `Gonzalo.SSHClient` in `server/server.go`.
    pub async fn ssh_client(&self, host: &str, port: u16, user: &str) -> anyhow::Result<Arc<SSHConnection>> {
        let addr = HostAddr::new(host, port);
        let manager = self
            .ssh
            .add(Arc::clone(&self.bootstrap_key), addr, user.to_owned(), true)
            .await?;
        Ok(Arc::clone(manager.connection()))
    }

    /// Returns the [`GitRepo`] for `(provider, vendor, project)`, creating it
    /// against the provider's configured default auth if it doesn't exist
    /// yet. Mirrors `Gonzalo.Repo`.
    pub fn repo(&self, provider: &str, vendor: &str, project: &str) -> anyhow::Result<Arc<GitRepo>> {
        Ok(self.git.add(provider, vendor, project)?)
    }

    /// Binds the repo for `(provider, vendor, project)` to the `.deploy`
    /// recipe file. Mirrors `Gonzalo.Project`.
    pub fn project(&self, provider: &str, vendor: &str, project: &str) -> anyhow::Result<Project> {
        let repo = self.repo(provider, vendor, project)?;
        Ok(Project::new(repo, DEFAULT_RECIPE_FILE))
    }
}

fn load_bootstrap_key(path: &Path) -> anyhow::Result<KeyPair> {
    let pem = std::fs::read_to_string(path).with_context(|| format!("reading bootstrap key from {}", path.display()))?;
    russh_keys::decode_secret_key(&pem, None).with_context(|| format!("parsing bootstrap key from {}", path.display()))
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}
