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

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{ProjectError, Result};

pub type Command = String;
pub type Role = u32;

/// One named deployment target, decoded from a mapping entry in the `.deploy`
/// recipe. Unrecognized keys are ignored; every field is optional at the
/// YAML layer and defaults empty. See spec §6.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Env {
    #[serde(default, rename = "buildkey")]
    pub build_key: String,

    #[serde(default)]
    pub backups: i64,

    /// Deprecated synonym of [`Self::host`]; callers choosing between the
    /// two are on their own, merging them is left to the external deploy
    /// driver.
    #[serde(default)]
    pub server: String,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub root: String,

    #[serde(default)]
    pub dest: String,

    #[serde(default)]
    pub role: Role,

    #[serde(default)]
    pub chatroom: String,

    #[serde(default)]
    pub required: Vec<String>,

    #[serde(default)]
    pub backup: IndexMap<String, Command>,

    #[serde(default)]
    pub build: Vec<Command>,

    #[serde(default, rename = "pre-upload")]
    pub pre_upload: Vec<Command>,

    #[serde(default, rename = "during-upload")]
    pub during_upload: Vec<Command>,

    #[serde(default, rename = "post-upload-current")]
    pub post_upload_current: Vec<Command>,

    #[serde(default, rename = "post-upload-next")]
    pub post_upload_next: Vec<Command>,

    #[serde(default, rename = "post-deploy")]
    pub post_deploy: Vec<Command>,
}

/// The whole `.deploy` recipe: an ordered mapping from environment name to
/// [`Env`] (iteration order is preserved but not semantically meaningful --
/// see spec §3). No cross-environment merging is performed; an
/// inherit-from-`all` pattern was left as a TODO upstream and is not
/// implemented here either, see spec §9.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Config(IndexMap<String, Env>);

impl Config {
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }

    pub fn get_env(&self, name: &str) -> Result<Env> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| ProjectError::EnvNotDefined(name.to_owned()))
    }

    pub fn envs(&self) -> impl Iterator<Item = (&str, &Env)> {
        self.0.iter().map(|(name, env)| (name.as_str(), env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_recognized_fields() {
        let yaml = br#"
prod:
  host: h1
  user: u1
  buildkey: shared
  required:
    - dist
  build:
    - make build
staging:
  host: h2
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let prod = config.get_env("prod").unwrap();
        assert_eq!(prod.host, "h1");
        assert_eq!(prod.user, "u1");
        assert_eq!(prod.build_key, "shared");
        assert_eq!(prod.required, vec!["dist".to_owned()]);
        assert_eq!(prod.build, vec!["make build".to_owned()]);
    }

    #[test]
    fn missing_env_fails() {
        let config = Config::from_yaml(b"prod:\n  host: h1\n").unwrap();
        let err = config.get_env("qa").unwrap_err();
        assert!(matches!(err, ProjectError::EnvNotDefined(name) if name == "qa"));
    }
}
