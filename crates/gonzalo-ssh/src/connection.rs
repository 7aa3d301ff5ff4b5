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

use std::sync::{Arc, Mutex as StdMutex};

use russh::client::{self, Msg};
use russh::{Channel, ChannelMsg};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::sync::Mutex as AsyncMutex;

use crate::addr::HostAddr;
use crate::error::{Result, SshError};

/// The [`russh::client::Handler`] that implements host-key pinning.
///
/// In [`HostKeyMode::TrustOnFirstUse`] mode it accepts whatever key the
/// remote presents and records it so the caller can pin it afterwards. In
/// [`HostKeyMode::Pinned`] mode it accepts only an exact match, refusing
/// everything else -- this is the TOFU contract from the spec's §4.2/§4.3.
#[derive(Clone)]
struct HostKeyHandler {
    mode: HostKeyMode,
}

#[derive(Clone)]
enum HostKeyMode {
    TrustOnFirstUse(Arc<StdMutex<Option<Vec<u8>>>>),
    Pinned(Vec<u8>),
}

#[async_trait::async_trait]
impl client::Handler for HostKeyHandler {
    type Error = SshError;

    async fn check_server_key(
        self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<(Self, bool), Self::Error> {
        use russh_keys::PublicKeyBase64;

        let presented = server_public_key.public_key_bytes();
        let ok = match &self.mode {
            HostKeyMode::TrustOnFirstUse(captured) => {
                *captured.lock().unwrap() = Some(presented);
                true
            }
            HostKeyMode::Pinned(expected) => &presented == expected,
        };

        Ok((self, ok))
    }
}

struct ConnState {
    host_key: Option<Vec<u8>>,
    signer: Arc<KeyPair>,
    client: Option<client::Handle<HostKeyHandler>>,
}

/// A lazily dialed, mutex-serialized SSH session holder pinned to a single
/// host key. See spec §4.2.
pub struct SSHConnection {
    addr: HostAddr,
    user: String,
    state: AsyncMutex<ConnState>,
}

impl SSHConnection {
    pub fn new(addr: HostAddr, user: String, host_key: Option<Vec<u8>>, signer: Arc<KeyPair>) -> Self {
        Self {
            addr,
            user,
            state: AsyncMutex::new(ConnState {
                host_key,
                signer,
                client: None,
            }),
        }
    }

    pub fn addr(&self) -> &HostAddr {
        &self.addr
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Dials the remote's host key without performing any authentication;
    /// used by [`crate::manager::SSHManager`]'s TOFU bootstrap. Returns the
    /// raw wire-format host key bytes the remote presented.
    pub async fn capture_fresh_host_key(addr: &HostAddr, user: &str, signer: Arc<KeyPair>) -> Result<Vec<u8>> {
        let captured = Arc::new(StdMutex::new(None));
        let handler = HostKeyHandler {
            mode: HostKeyMode::TrustOnFirstUse(Arc::clone(&captured)),
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (addr.host.as_str(), addr.port), handler).await?;
        // Authenticate so the remote completes the handshake; a rejection
        // here is expected and irrelevant, we only wanted the host key.
        let _ = handle.authenticate_publickey(user, signer).await;
        drop(handle);

        captured
            .lock()
            .unwrap()
            .take()
            .ok_or(SshError::EmptyHostKey)
    }

    pub async fn current_signer(&self) -> Arc<KeyPair> {
        Arc::clone(&self.state.lock().await.signer)
    }

    /// Closes any existing client, dials fresh using the pinned host key and
    /// the current signer, and stores the new client.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await
    }

    async fn connect_locked(&self, state: &mut ConnState) -> Result<()> {
        state.client = None;

        let host_key = state.host_key.clone().ok_or(SshError::PinningMissing)?;
        let handler = HostKeyHandler {
            mode: HostKeyMode::Pinned(host_key),
        };

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, (self.addr.host.as_str(), self.addr.port), handler).await?;

        let authenticated = handle
            .authenticate_publickey(self.user.clone(), Arc::clone(&state.signer))
            .await?;

        if !authenticated {
            return Err(SshError::AuthFailure(format!(
                "{} rejected public key for user {}",
                self.addr, self.user
            )));
        }

        state.client = Some(handle);
        Ok(())
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.client = None;
    }

    async fn ensure_connected<'a>(&self, state: &'a mut ConnState) -> Result<&'a client::Handle<HostKeyHandler>> {
        if state.client.is_none() {
            self.connect_locked(state).await?;
        }

        Ok(state.client.as_ref().expect("just connected"))
    }

    /// Opens a new channel, connecting first if necessary. The connection
    /// mutex is held only for the duration of channel creation -- callers
    /// run the command on the returned, detached channel.
    async fn open_channel(&self) -> Result<Channel<Msg>> {
        let mut state = self.state.lock().await;
        let handle = self.ensure_connected(&mut state).await?;
        Ok(handle.channel_open_session().await?)
    }

    /// Replaces the signer used for future connections and closes the
    /// current client so the next command redials as the new identity.
    pub async fn set_private_key(&self, signer: Arc<KeyPair>) {
        let mut state = self.state.lock().await;
        state.signer = signer;
        state.client = None;
    }

    /// Runs `cmd` to completion on a fresh channel, feeding `stdin` if given
    /// and collecting stdout/stderr. Fails if the remote command exits
    /// non-zero.
    pub async fn output(&self, cmd: &str, stdin: Option<&[u8]>) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut channel = self.open_channel().await?;
        channel.exec(true, cmd.as_bytes()).await?;

        if let Some(input) = stdin {
            channel.data(input).await?;
        }
        channel.eof().await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        match exit_status {
            Some(0) | None => Ok((stdout, stderr)),
            Some(code) => Err(SshError::CommandFailed {
                code,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::rsa_keygen::generate_rsa_private_key_pem;
    use crate::test_support::FakeServer;

    async fn test_signer() -> Arc<KeyPair> {
        let pem = generate_rsa_private_key_pem(2048).unwrap();
        let pem_str = String::from_utf8(pem).unwrap();
        Arc::new(russh_keys::decode_secret_key(&pem_str, None).unwrap())
    }

    #[tokio::test]
    async fn connect_succeeds_with_the_pinned_host_key() {
        let remote_home = TempDir::new().unwrap();
        let server = FakeServer::start(remote_home.path().to_path_buf()).await;
        let signer = test_signer().await;

        let conn = SSHConnection::new(
            server.addr.clone(),
            "tester".to_owned(),
            Some(server.host_public_key_bytes.clone()),
            signer,
        );
        conn.connect().await.unwrap();
    }

    #[tokio::test]
    async fn connect_fails_without_a_pinned_host_key() {
        let signer = test_signer().await;
        let conn = SSHConnection::new(HostAddr::new("127.0.0.1", 1), "tester".to_owned(), None, signer);
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, SshError::PinningMissing));
    }

    #[tokio::test]
    async fn connect_refuses_a_host_key_other_than_the_pinned_one() {
        let remote_home = TempDir::new().unwrap();
        let server = FakeServer::start(remote_home.path().to_path_buf()).await;
        let signer = test_signer().await;

        let mut wrong_key = server.host_public_key_bytes.clone();
        wrong_key[0] ^= 0xff;

        let conn = SSHConnection::new(server.addr.clone(), "tester".to_owned(), Some(wrong_key), signer);
        assert!(conn.connect().await.is_err());
    }

    #[tokio::test]
    async fn output_runs_a_command_and_captures_stdout() {
        let remote_home = TempDir::new().unwrap();
        let server = FakeServer::start(remote_home.path().to_path_buf()).await;
        let signer = test_signer().await;

        let conn = SSHConnection::new(
            server.addr.clone(),
            "tester".to_owned(),
            Some(server.host_public_key_bytes.clone()),
            signer,
        );
        let (stdout, _stderr) = conn.output("echo hello", None).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&stdout).trim(), "hello");
    }

    /// The fake server deliberately emits `eof` before `exit-status`; if
    /// `output` still broke its read loop on `Eof` this would observe
    /// `exit_status == None` and report success for a command that failed.
    #[tokio::test]
    async fn output_surfaces_a_nonzero_exit_status_even_when_eof_arrives_first() {
        let remote_home = TempDir::new().unwrap();
        let server = FakeServer::start(remote_home.path().to_path_buf()).await;
        let signer = test_signer().await;

        let conn = SSHConnection::new(
            server.addr.clone(),
            "tester".to_owned(),
            Some(server.host_public_key_bytes.clone()),
            signer,
        );
        let err = conn.output("exit 7", None).await.unwrap_err();
        assert!(matches!(err, SshError::CommandFailed { code: 7, .. }));
    }
}
