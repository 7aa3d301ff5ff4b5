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

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::auth::GitAuth;
use crate::error::{GitError, Result};
use crate::repo::GitRepo;

/// A `(provider, vendor, project)`-keyed registry of [`GitRepo`]s with a
/// per-provider default [`GitAuth`] table. See spec §4.7, grounded on
/// `git/pool.go`.
pub struct GitPool {
    dir: PathBuf,
    repos: RwLock<HashMap<(String, String, String), Arc<GitRepo>>>,
    provider_auth: RwLock<HashMap<String, GitAuth>>,
}

impl GitPool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            repos: RwLock::new(HashMap::new()),
            provider_auth: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_provider_auth(&self, provider: impl Into<String>, auth: GitAuth) {
        self.provider_auth.write().unwrap().insert(provider.into(), auth);
    }

    pub fn get(&self, provider: &str, vendor: &str, project: &str) -> Option<Arc<GitRepo>> {
        self.repos
            .read()
            .unwrap()
            .get(&key(provider, vendor, project))
            .cloned()
    }

    /// Returns the existing repo or constructs one using the per-provider
    /// default auth, failing *NoAuth* if none is registered.
    pub fn add(&self, provider: &str, vendor: &str, project: &str) -> Result<Arc<GitRepo>> {
        if let Some(existing) = self.get(provider, vendor, project) {
            return Ok(existing);
        }

        let auth = self
            .provider_auth
            .read()
            .unwrap()
            .get(provider)
            .cloned()
            .ok_or_else(|| GitError::NoAuth(provider.to_owned()))?;

        self.add_custom_auth(provider, vendor, project, auth)
    }

    /// Like [`Self::add`] but bypasses the per-provider auth table.
    pub fn add_custom_auth(&self, provider: &str, vendor: &str, project: &str, auth: GitAuth) -> Result<Arc<GitRepo>> {
        if let Some(existing) = self.get(provider, vendor, project) {
            return Ok(existing);
        }

        let mut repos = self.repos.write().unwrap();
        let k = key(provider, vendor, project);
        if let Some(existing) = repos.get(&k) {
            return Ok(Arc::clone(existing));
        }

        let repo = Arc::new(GitRepo::new(&self.dir, provider, vendor, project, auth)?);
        repos.insert(k, Arc::clone(&repo));
        Ok(repo)
    }
}

fn key(provider: &str, vendor: &str, project: &str) -> (String, String, String) {
    (provider.to_owned(), vendor.to_owned(), project.to_owned())
}
