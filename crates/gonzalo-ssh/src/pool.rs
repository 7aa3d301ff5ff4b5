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
use std::sync::Arc;

use gonzalo_keystore::KeyBlobStore;
use russh_keys::key::KeyPair;
use tokio::sync::RwLock;

use crate::addr::HostAddr;
use crate::error::Result;
use crate::manager::SSHManager;

/// A `(host, user)`-keyed registry of [`SSHManager`]s. Construction of a
/// given key's manager (including, for a first-time target, the full
/// key-rotation round trip) is serialized by the pool's write lock -- see
/// spec §4.4 and §5.
pub struct SSHPool {
    managers: RwLock<HashMap<(HostAddr, String), Arc<SSHManager>>>,
    host_store: Arc<dyn KeyBlobStore>,
    private_store: Arc<dyn KeyBlobStore>,
    rotation_bits: usize,
}

impl SSHPool {
    pub fn new(
        host_store: Arc<dyn KeyBlobStore>,
        private_store: Arc<dyn KeyBlobStore>,
        rotation_bits: usize,
    ) -> Self {
        Self {
            managers: RwLock::new(HashMap::new()),
            host_store,
            private_store,
            rotation_bits,
        }
    }

    pub async fn get(&self, addr: &HostAddr, user: &str) -> Option<Arc<SSHManager>> {
        self.managers
            .read()
            .await
            .get(&(addr.clone(), user.to_owned()))
            .cloned()
    }

    /// Returns the existing manager for `(addr, user)`, or constructs one
    /// (optionally running [`SSHManager::replace_key`] on it) and registers
    /// it.
    pub async fn add(
        &self,
        bootstrap_signer: Arc<KeyPair>,
        addr: HostAddr,
        user: String,
        do_rotate: bool,
    ) -> Result<Arc<SSHManager>> {
        if let Some(existing) = self.get(&addr, &user).await {
            return Ok(existing);
        }

        let mut managers = self.managers.write().await;
        let key = (addr.clone(), user.clone());
        if let Some(existing) = managers.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let manager = SSHManager::new(
            bootstrap_signer,
            addr,
            user,
            Arc::clone(&self.host_store),
            Arc::clone(&self.private_store),
        )
        .await?;

        if do_rotate {
            manager.replace_key(self.rotation_bits).await?;
        }

        let manager = Arc::new(manager);
        managers.insert(key, Arc::clone(&manager));
        Ok(manager)
    }
}
