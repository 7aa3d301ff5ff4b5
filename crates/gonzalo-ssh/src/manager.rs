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
use std::time::{SystemTime, UNIX_EPOCH};

use gonzalo_keystore::KeyBlobStore;
use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;

use crate::addr::HostAddr;
use crate::connection::SSHConnection;
use crate::error::{Result, SshError};
use crate::rsa_keygen::generate_rsa_private_key_pem;

const HOST_USER: &str = "host";

/// Supervises one SSH [`SSHConnection`], loading a previously-rotated
/// identity and pinning the remote host key on construction. See spec §4.3.
pub struct SSHManager {
    addr: HostAddr,
    user: String,
    connection: Arc<SSHConnection>,
    private_store: Arc<dyn KeyBlobStore>,
}

impl SSHManager {
    pub async fn new(
        bootstrap_signer: Arc<KeyPair>,
        addr: HostAddr,
        user: String,
        host_store: Arc<dyn KeyBlobStore>,
        private_store: Arc<dyn KeyBlobStore>,
    ) -> Result<Self> {
        let addr_str = addr.to_string();

        let signer = if private_store.has(&addr_str, &user) {
            match load_signer(&private_store.get(&addr_str, &user)) {
                Ok(stored) => Arc::new(stored),
                Err(_) => bootstrap_signer,
            }
        } else {
            bootstrap_signer
        };

        let host_key = check_host_key(&addr, &host_store, Arc::clone(&signer), &user).await?;

        let connection = Arc::new(SSHConnection::new(
            addr.clone(),
            user.clone(),
            Some(host_key),
            signer,
        ));

        Ok(Self {
            addr,
            user,
            connection,
            private_store,
        })
    }

    pub fn addr(&self) -> &HostAddr {
        &self.addr
    }

    pub fn connection(&self) -> &Arc<SSHConnection> {
        &self.connection
    }

    /// Runs the key-rotation protocol at most once per manager: if the
    /// private-key store already owns an identity for `(addr, user)` this is
    /// a no-op, otherwise a fresh RSA keypair is installed into the remote
    /// `authorized_keys` and persisted locally. See spec §4.3.
    pub async fn replace_key(&self, bits: usize) -> Result<()> {
        let addr_str = self.addr.to_string();
        if self.private_store.has(&addr_str, &self.user) {
            return Ok(());
        }

        log::info!("{}: rotating ssh identity for user {}", self.addr, self.user);

        let current_signer = self.connection.current_signer().await;
        let current_b64 = current_signer.clone_public_key()?.public_key_base64();

        let new_pem = generate_rsa_private_key_pem(bits)?;
        let new_keypair = load_signer(&new_pem)?;
        let new_b64 = new_keypair.clone_public_key()?.public_key_base64();

        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let rotate_cmd = format!(
            r#"tmp="$HOME/.ssh/authorized_keys.{nanos}" && \
bu="$HOME/.ssh/authorized_keys.gonzalo.backup" && \
cp "$HOME/.ssh/authorized_keys" "$bu" && \
cp "$HOME/.ssh/authorized_keys" "$tmp" && \
echo 'ssh-rsa {new_b64}' >> "$tmp" && \
line=$(cat -n "$tmp" | grep '{current_b64}' | cut -f1 | xargs) && \
sed -i "${{line}}d" "$tmp" && \
mv "$tmp" "$HOME/.ssh/authorized_keys""#
        );

        self.connection.output(&rotate_cmd, None).await?;

        if let Err(err) = self.private_store.set(&addr_str, &self.user, &new_pem) {
            let _ = self
                .connection
                .output(
                    r#"cp "$HOME/.ssh/authorized_keys.gonzalo.backup" "$HOME/.ssh/authorized_keys""#,
                    None,
                )
                .await;
            return Err(err.into());
        }

        self.connection
            .set_private_key(Arc::new(new_keypair))
            .await;

        log::info!("{}: ssh identity rotated and persisted for user {}", self.addr, self.user);

        Ok(())
    }
}

fn load_signer(pem: &[u8]) -> Result<KeyPair> {
    let text = std::str::from_utf8(pem).map_err(|_| SshError::EmptyHostKey)?;
    Ok(russh_keys::decode_secret_key(text, None)?)
}

async fn check_host_key(
    addr: &HostAddr,
    store: &Arc<dyn KeyBlobStore>,
    signer: Arc<KeyPair>,
    user: &str,
) -> Result<Vec<u8>> {
    let addr_str = addr.to_string();

    if store.has(&addr_str, HOST_USER) {
        let raw = store.get(&addr_str, HOST_USER);
        if raw.is_empty() {
            return Err(SshError::EmptyHostKey);
        }
        russh_keys::key::parse_public_key(&raw, None)?;
        return Ok(raw);
    }

    log::info!("{addr}: no pinned host key on file, trusting the key presented on first contact");
    let fresh = SSHConnection::capture_fresh_host_key(addr, user, signer).await?;
    store.set(&addr_str, HOST_USER, &fresh)?;
    log::info!("{addr}: pinned host key ({} bytes)", fresh.len());
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use gonzalo_keystore::FsKeyBlobStore;
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::RsaPrivateKey;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::FakeServer;

    async fn bootstrap_signer() -> (Arc<KeyPair>, String) {
        let pem = generate_rsa_private_key_pem(2048).unwrap();
        let pem_str = String::from_utf8(pem).unwrap();
        let keypair = russh_keys::decode_secret_key(&pem_str, None).unwrap();
        let b64 = keypair.clone_public_key().unwrap().public_key_base64();
        (Arc::new(keypair), b64)
    }

    fn stores(dir: &Path) -> (Arc<dyn KeyBlobStore>, Arc<dyn KeyBlobStore>) {
        let host_dir = dir.join("host");
        let priv_dir = dir.join("priv");
        std::fs::create_dir_all(&host_dir).unwrap();
        std::fs::create_dir_all(&priv_dir).unwrap();
        (
            Arc::new(FsKeyBlobStore::new(host_dir, 0o644).unwrap()),
            Arc::new(FsKeyBlobStore::new(priv_dir, 0o600).unwrap()),
        )
    }

    #[tokio::test]
    async fn new_pins_the_host_key_on_first_contact() {
        let remote_home = TempDir::new().unwrap();
        let server = FakeServer::start(remote_home.path().to_path_buf()).await;

        let base = TempDir::new().unwrap();
        let (host_store, private_store) = stores(base.path());
        let (signer, _) = bootstrap_signer().await;

        let manager = SSHManager::new(
            signer,
            server.addr.clone(),
            "tester".to_owned(),
            Arc::clone(&host_store),
            private_store,
        )
        .await
        .unwrap();

        let addr_str = server.addr.to_string();
        assert!(host_store.has(&addr_str, HOST_USER));
        assert_eq!(host_store.get(&addr_str, HOST_USER), server.host_public_key_bytes);

        // The pinned connection actually dials and authenticates.
        manager.connection().connect().await.unwrap();
    }

    #[tokio::test]
    async fn replace_key_rotates_authorized_keys_and_then_short_circuits() {
        let remote_home = TempDir::new().unwrap();
        let ssh_dir = remote_home.path().join(".ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        let authorized_keys = ssh_dir.join("authorized_keys");

        let (bootstrap, bootstrap_b64) = bootstrap_signer().await;
        std::fs::write(&authorized_keys, format!("ssh-rsa {bootstrap_b64} test@bootstrap\n")).unwrap();

        let server = FakeServer::start(remote_home.path().to_path_buf()).await;

        let base = TempDir::new().unwrap();
        let (host_store, private_store) = stores(base.path());

        let manager = SSHManager::new(
            Arc::clone(&bootstrap),
            server.addr.clone(),
            "tester".to_owned(),
            host_store,
            Arc::clone(&private_store),
        )
        .await
        .unwrap();

        manager.replace_key(2048).await.unwrap();

        let addr_str = server.addr.to_string();
        assert!(private_store.has(&addr_str, "tester"));

        // Property: the rotated key is a parseable PEM at the requested bit length.
        let stored_pem = private_store.get(&addr_str, "tester");
        let stored_pem_str = String::from_utf8(stored_pem).unwrap();
        let parsed = RsaPrivateKey::from_pkcs1_pem(&stored_pem_str).unwrap();
        assert_eq!(parsed.size() * 8, 2048);

        let stored_keypair = russh_keys::decode_secret_key(&stored_pem_str, None).unwrap();
        let stored_b64 = stored_keypair.clone_public_key().unwrap().public_key_base64();

        // Property: the connection's signer now matches the rotated key.
        let current = manager.connection().current_signer().await;
        assert_eq!(current.clone_public_key().unwrap().public_key_base64(), stored_b64);

        // Property: the bootstrap key is gone from authorized_keys, the new one is present.
        let contents = std::fs::read_to_string(&authorized_keys).unwrap();
        assert!(!contents.contains(&bootstrap_b64));
        assert!(contents.contains(&stored_b64));

        // Property: a second call performs no further remote mutation.
        let before_second_call = contents;
        manager.replace_key(2048).await.unwrap();
        let after_second_call = std::fs::read_to_string(&authorized_keys).unwrap();
        assert_eq!(before_second_call, after_second_call);
    }
}
