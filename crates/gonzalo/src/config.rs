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

use serde::Deserialize;

/// Process-level configuration, read from a `gonzalo.yaml` file via
/// `figment`'s YAML provider. This is the Rust-native externalization of the
/// hard-coded provider table in `cmd/gonzalo-server/main.go` -- see
/// `SPEC_FULL.md` §6.
#[derive(Debug, Deserialize)]
pub struct ProcessConfig {
    /// Base directory for host keys, private keys, and git clones.
    pub storage: PathBuf,

    /// Bootstrap SSH private key used for the first connection to a target
    /// that has not yet been through the key-rotation handshake.
    #[serde(rename = "bootstrap-key")]
    pub bootstrap_key: PathBuf,

    /// RSA bit length used when generating a rotated identity.
    #[serde(rename = "rotation-bits", default = "default_rotation_bits")]
    pub rotation_bits: usize,

    pub providers: HashMap<String, ProviderConfig>,
}

const fn default_rotation_bits() -> usize {
    2048
}

/// A provider's default git auth, analogous to one entry of the
/// `map[string]git.Auth` built by hand in `main.go`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Clone anonymously over HTTPS, e.g. public GitHub repositories.
    Https,
    /// Clone over SSH using a dedicated private key, pinning the provider's
    /// host key via the same key store the `gonzalo-ssh` pool uses.
    Ssh {
        key: PathBuf,
        #[serde(default = "default_git_user")]
        user: String,
    },
}

fn default_git_user() -> String {
    "git".to_owned()
}
