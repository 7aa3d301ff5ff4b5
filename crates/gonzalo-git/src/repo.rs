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

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::build::CheckoutBuilder;
use git2::{AutotagOption, FetchOptions, Repository, ResetType};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::auth::GitAuth;
use crate::error::{GitError, Result};
use crate::lookup::lookup;

const REMOTE: &str = "origin";

enum RepoState {
    Absent,
    OpenedCold,
    OpenedLive(Repository),
}

/// One on-disk clone of `(provider, vendor, project)`, with a self-healing
/// open/update/reset state machine. See spec §4.5, grounded on
/// `git/git.go`'s `Repo`.
///
/// A per-repo mutex serializes `Open`/`Update`/`Reset`/`Delete` -- the
/// source (`git/git.go`) leaves concurrent access on the same `Repo`
/// unserialized, which the spec's own design notes (§9) call out as a gap
/// in the underlying git libraries' safety story. We close it here.
pub struct GitRepo {
    provider: String,
    vendor: String,
    project: String,
    path: PathBuf,
    auth: GitAuth,
    state: Mutex<RepoState>,
}

impl GitRepo {
    pub fn new(dir: impl AsRef<Path>, provider: &str, vendor: &str, project: &str, auth: GitAuth) -> Result<Self> {
        validate_component("provider", provider)?;
        validate_component("vendor", vendor)?;
        validate_component("project", project)?;

        let path = dir.as_ref().join(provider).join(vendor).join(project);
        let state = if path.is_dir() { RepoState::OpenedCold } else { RepoState::Absent };

        Ok(Self {
            provider: provider.to_owned(),
            vendor: vendor.to_owned(),
            project: project.to_owned(),
            path,
            auth,
            state: Mutex::new(state),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The clone URL: `<provider>:<vendor>/<project>` over SSH, or
    /// `https://[user[:password]@]<provider>/<vendor>/<project>.git`.
    pub fn uri(&self) -> String {
        if self.auth.is_ssh() {
            return format!("{}:{}/{}", self.provider, self.vendor, self.project);
        }

        let prefix = match (self.auth.user(), self.auth.password()) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                format!("{}:{}@", escape(user), escape(password))
            }
            (Some(user), _) if !user.is_empty() => format!("{}@", escape(user)),
            _ => String::new(),
        };

        format!("https://{prefix}{}/{}/{}.git", self.provider, self.vendor, self.project)
    }

    /// Opens the on-disk clone if present; clones fresh (via [`Self::update`])
    /// otherwise. No-op if already live.
    pub fn open(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if matches!(&*state, RepoState::OpenedLive(_)) {
                return Ok(());
            }
        }

        match Repository::open(&self.path) {
            Ok(repo) => {
                *self.state.lock().unwrap() = RepoState::OpenedLive(repo);
                Ok(())
            }
            Err(_) => self.update(),
        }
    }

    /// Opens-or-clones and brings the clone up to date with `origin`,
    /// self-healing by re-cloning on any failure. See spec §4.5.
    pub fn update(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match self.update_locked(&mut state) {
            Ok(()) => Ok(()),
            Err(err) => {
                *state = RepoState::Absent;
                let _ = fs::remove_dir_all(&self.path);
                Err(err)
            }
        }
    }

    fn update_locked(&self, state: &mut RepoState) -> Result<()> {
        match std::mem::replace(state, RepoState::Absent) {
            RepoState::OpenedLive(repo) => match self.fetch(&repo) {
                Ok(()) => {
                    *state = RepoState::OpenedLive(repo);
                    Ok(())
                }
                Err(_) => {
                    drop(repo);
                    self.reclone(state)
                }
            },
            RepoState::OpenedCold => match Repository::open(&self.path) {
                Ok(repo) => match self.fetch(&repo) {
                    Ok(()) => {
                        *state = RepoState::OpenedLive(repo);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
                Err(_) => self.reclone(state),
            },
            RepoState::Absent => self.reclone(state),
        }
    }

    fn reclone(&self, state: &mut RepoState) -> Result<()> {
        log::info!("{}/{}/{}: re-cloning from scratch", self.provider, self.vendor, self.project);
        if self.path.exists() {
            fs::remove_dir_all(&self.path)?;
        }

        let repo = self.clone_fresh()?;
        *state = RepoState::OpenedLive(repo);
        Ok(())
    }

    fn clone_fresh(&self) -> Result<Repository> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let callbacks = self.auth.remote_callbacks(&self.provider);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts.download_tags(AutotagOption::All);

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        Ok(builder.clone(&self.uri(), &self.path)?)
    }

    fn fetch(&self, repo: &Repository) -> Result<()> {
        let mut remote = repo.find_remote(REMOTE)?;
        let callbacks = self.auth.remote_callbacks(&self.provider);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts.download_tags(AutotagOption::All);

        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        Ok(())
    }

    /// Hard-resets the working tree to `commitish`, resolved via
    /// [`crate::lookup::lookup`]. See spec §4.5/§4.6.
    pub fn reset(&self, commitish: &str) -> Result<()> {
        self.open()?;

        let state = self.state.lock().unwrap();
        let RepoState::OpenedLive(repo) = &*state else {
            return Err(GitError::InvalidArgument("repo failed to open".to_owned()));
        };

        let head_oid = repo.head()?.target().ok_or_else(|| GitError::InvalidArgument("detached HEAD with no target".to_owned()))?;
        if head_oid.to_string() == commitish {
            return reset_hard(repo, head_oid);
        }

        let commits = lookup(repo, commitish)?;
        if commits.is_empty() {
            return Err(GitError::NotFound(commitish.to_owned()));
        }
        if commits.len() > 1 {
            return Err(GitError::Ambiguous(commits.into_iter().map(|c| c.ref_name).collect()));
        }

        reset_hard(repo, commits[0].commit)
    }

    /// Tears down the on-disk clone entirely; the next [`Self::open`] starts
    /// from `Absent`.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        *state = RepoState::Absent;
        if self.path.exists() {
            fs::remove_dir_all(&self.path)?;
        }
        Ok(())
    }
}

fn reset_hard(repo: &Repository, oid: git2::Oid) -> Result<()> {
    let object = repo.find_object(oid, None)?;
    repo.checkout_tree(&object, Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(oid)?;
    repo.reset(&object, ResetType::Hard, None)?;
    Ok(())
}

fn validate_component(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(GitError::InvalidArgument(format!("{kind} {name:?} is invalid")));
    }
    Ok(())
}

fn escape(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}
