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

use gonzalo_git::GitRepo;

use crate::config::{Config, Env};
use crate::error::Result;

/// The in-repo path of the deployment recipe read by [`Project::config`].
pub const DEFAULT_RECIPE_FILE: &str = ".deploy";

/// Binds one [`GitRepo`] to a recipe file name. Resolving a deploy query for
/// `(commitish, env)` updates the repo, resets it to `commitish`, decodes the
/// recipe at that snapshot, and looks up `env`. See spec §4.8.
pub struct Project {
    repo: Arc<GitRepo>,
    recipe_file: String,
}

impl Project {
    pub fn new(repo: Arc<GitRepo>, recipe_file: impl Into<String>) -> Self {
        Self {
            repo,
            recipe_file: recipe_file.into(),
        }
    }

    pub fn repo(&self) -> &Arc<GitRepo> {
        &self.repo
    }

    /// Updates and resets the repo to `commitish`, then decodes the recipe
    /// file at that snapshot.
    pub fn config(&self, commitish: &str) -> Result<Config> {
        self.repo.update()?;
        self.repo.reset(commitish)?;

        let path = self.repo.path().join(&self.recipe_file);
        let data = std::fs::read(path)?;
        Config::from_yaml(&data)
    }

    pub fn config_env(&self, commitish: &str, env: &str) -> Result<Env> {
        self.config(commitish)?.get_env(env)
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command as Proc;

    use gonzalo_git::GitAuth;
    use tempfile::TempDir;

    use super::*;

    fn init_origin_with_recipe() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let status = Proc::new("git").current_dir(dir.path()).args(args).status().unwrap();
            assert!(status.success());
        };

        run(&["init", "--initial-branch=main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join(".deploy"), "prod:\n  host: h1\n  user: u1\n").unwrap();
        run(&["add", ".deploy"]);
        run(&["commit", "-m", "first"]);
        dir
    }

    #[test]
    fn config_env_reads_recipe_at_commitish() {
        let origin = init_origin_with_recipe();
        let base = TempDir::new().unwrap();
        let path = base.path().join("local").join("vendor").join("proj");

        // Clone before constructing the `GitRepo` so its state machine
        // snapshots `OpenedCold` rather than `Absent` -- `update()` then
        // fetches from the real (local) `origin` remote left by this clone
        // instead of re-cloning through `uri()`'s unreachable https URL.
        git2::Repository::clone(origin.path().to_str().unwrap(), &path).unwrap();
        let repo = Arc::new(gonzalo_git::GitRepo::new(base.path(), "local", "vendor", "proj", GitAuth::none()).unwrap());

        let project = Project::new(Arc::clone(&repo), DEFAULT_RECIPE_FILE);
        let env = project.config_env("main", "prod").unwrap();
        assert_eq!(env.host, "h1");
        assert_eq!(env.user, "u1");

        let err = project.config_env("main", "staging").unwrap_err();
        assert!(matches!(err, crate::error::ProjectError::EnvNotDefined(name) if name == "staging"));
    }
}
