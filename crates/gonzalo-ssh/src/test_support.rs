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

//! An in-process fake SSH server, exercised only by this crate's tests. It
//! accepts any public key and runs `exec` requests as real `sh -c`
//! subprocesses rooted at a caller-supplied fake `$HOME`, so the rotation
//! handshake's shell pipeline runs against a throwaway directory tree
//! instead of a mocked transport.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use russh::server::{self, Auth, Handler, Server, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;

use crate::addr::HostAddr;

#[derive(Debug, thiserror::Error)]
pub(crate) enum FakeSshError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),
}

/// A throwaway SSH server bound to an ephemeral localhost port. Dropping it
/// aborts the accept loop.
pub(crate) struct FakeServer {
    pub addr: HostAddr,
    pub host_public_key_bytes: Vec<u8>,
    join: tokio::task::JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.join.abort();
    }
}

impl FakeServer {
    /// Starts the server; `exec` requests run as `sh -c <cmd>` with `$HOME`
    /// pointed at `remote_home`.
    pub async fn start(remote_home: PathBuf) -> Self {
        let host_key = KeyPair::generate_ed25519().expect("ed25519 keygen");
        let host_public_key_bytes = host_key
            .clone_public_key()
            .expect("clone host public key")
            .public_key_bytes();

        let config = Arc::new(server::Config {
            keys: vec![host_key],
            ..Default::default()
        });

        // Grab a free port by binding and immediately releasing it, then
        // hand the same port to `server::run`, which does its own bind.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
        let port = probe.local_addr().expect("probe local addr").port();
        drop(probe);

        let factory = FakeSshFactory {
            remote_home: Arc::new(remote_home),
        };

        let join = tokio::spawn(async move {
            let _ = server::run(config, ("127.0.0.1", port), factory).await;
        });

        // Give the listener a moment to come up before the caller dials it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        Self {
            addr: HostAddr::new("127.0.0.1", port),
            host_public_key_bytes,
            join,
        }
    }
}

struct FakeSshFactory {
    remote_home: Arc<PathBuf>,
}

impl Server for FakeSshFactory {
    type Handler = FakeSshHandler;

    fn new_client(&mut self, _peer_addr: Option<SocketAddr>) -> Self::Handler {
        FakeSshHandler {
            remote_home: Arc::clone(&self.remote_home),
        }
    }
}

struct FakeSshHandler {
    remote_home: Arc<PathBuf>,
}

#[async_trait::async_trait]
impl Handler for FakeSshHandler {
    type Error = FakeSshError;

    async fn auth_publickey(self, _user: &str, _public_key: &PublicKey) -> Result<(Self, Auth), Self::Error> {
        Ok((self, Auth::Accept))
    }

    async fn channel_open_session(
        self,
        _channel: Channel<server::Msg>,
        session: Session,
    ) -> Result<(Self, bool, Session), Self::Error> {
        Ok((self, true, session))
    }

    async fn exec_request(self, channel: ChannelId, data: &[u8], mut session: Session) -> Result<(Self, Session), Self::Error> {
        let cmd = String::from_utf8_lossy(data).into_owned();

        let spawned = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .env("HOME", self.remote_home.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let child = match spawned {
            Ok(child) => {
                session.channel_success(channel);
                child
            }
            Err(err) => {
                session.channel_failure(channel);
                return Err(FakeSshError::from(err));
            }
        };

        let output = child.wait_with_output().await?;

        let handle = session.handle();
        if !output.stdout.is_empty() {
            let _ = handle.data(channel, CryptoVec::from_slice(&output.stdout)).await;
        }
        if !output.stderr.is_empty() {
            let _ = handle.extended_data(channel, 1, CryptoVec::from_slice(&output.stderr)).await;
        }

        // Deliberately sent ahead of the exit-status request: the wire
        // protocol does not guarantee an `exit-status` precedes `eof`.
        let _ = handle.eof(channel).await;
        let code = output.status.code().unwrap_or(1) as u32;
        let _ = handle.exit_status_request(channel, code).await;
        let _ = handle.close(channel).await;

        Ok((self, session))
    }
}
