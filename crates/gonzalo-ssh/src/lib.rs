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

//! A supervised, identity-rotated SSH client: [`SSHConnection`] dials and
//! pins a single host, [`SSHManager`] wraps one with TOFU host-key
//! verification and the authorized_keys rotation handshake, and [`SSHPool`]
//! keeps one manager alive per `(host, user)`.

mod addr;
mod connection;
mod error;
mod manager;
mod pool;
mod rsa_keygen;
#[cfg(test)]
mod test_support;

pub use addr::HostAddr;
pub use connection::SSHConnection;
pub use error::{Result, SshError};
pub use manager::SSHManager;
pub use pool::SSHPool;
pub use rsa_keygen::generate_rsa_private_key_pem;

pub use russh_keys::key::KeyPair;
