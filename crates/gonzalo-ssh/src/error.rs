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

use gonzalo_keystore::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("no host key is pinned for this connection")]
    PinningMissing,

    #[error("stored host key does not match the key presented by the remote")]
    PinningMismatch,

    #[error("key store failure: {0}")]
    StoreFailure(#[from] StoreError),

    #[error("ssh transport failure: {0}")]
    NetworkFailure(#[from] russh::Error),

    #[error("ssh key material failure: {0}")]
    KeyMaterial(#[from] russh_keys::Error),

    #[error("public key rejected: {0}")]
    AuthFailure(String),

    #[error("remote command exited with status {code}: {stderr}")]
    CommandFailed { code: u32, stderr: String },

    #[error("rsa key generation failed: {0}")]
    RsaKeygen(#[from] rsa::Error),

    #[error("rsa pem encoding failed: {0}")]
    RsaEncode(#[from] rsa::pkcs1::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system clock error: {0}")]
    Clock(#[from] std::time::SystemTimeError),

    #[error("stored host key is empty or unreadable")]
    EmptyHostKey,
}

pub type Result<T> = std::result::Result<T, SshError>;
