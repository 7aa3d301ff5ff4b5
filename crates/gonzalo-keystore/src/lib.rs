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

//! Content-addressed storage for opaque key material: pinned SSH host keys
//! and rotated SSH private keys, keyed by `(remote address, user)`.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;

use regex::Regex;
use sha1::{Digest, Sha1};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("base directory {0} does not exist or is not a directory")]
    InvalidBaseDir(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// An opaque, content-addressed map from `(remote address, user)` to a byte
/// blob. Two kinds of blob are stored through this same untyped interface: a
/// marshaled SSH host public key, and a PEM-encoded RSA private key.
pub trait KeyBlobStore: Send + Sync {
    fn has(&self, addr: &str, user: &str) -> bool;

    /// Returns the stored bytes, or an empty vector on a miss or read
    /// failure.
    fn get(&self, addr: &str, user: &str) -> Vec<u8>;

    fn set(&self, addr: &str, user: &str, bytes: &[u8]) -> Result<()>;

    fn del(&self, addr: &str, user: &str) -> Result<()>;
}

fn sanitize_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9.\-_]+").unwrap())
}

/// Computes the deterministic, human-inspectable storage key for `(addr,
/// user)`: `<human(addr+"-"+user)>.<sha1hex(addr+"-"+user)>`.
pub fn storage_key(addr: &str, user: &str) -> String {
    let raw = format!("{addr}-{user}");
    let human = sanitize_re().replace_all(&raw, "-");

    let mut hasher = Sha1::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(human.len() + 1 + digest.len() * 2);
    out.push_str(&human);
    out.push('.');
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }

    out
}

/// A [`KeyBlobStore`] backed by one regular file per entry under a base
/// directory, written at a fixed file mode.
pub struct FsKeyBlobStore {
    dir: PathBuf,
    mode: u32,
}

impl FsKeyBlobStore {
    /// `dir` must already exist and be a directory.
    pub fn new(dir: impl Into<PathBuf>, mode: u32) -> Result<Self> {
        let dir = dir.into();
        let meta = fs::metadata(&dir).map_err(|_| StoreError::InvalidBaseDir(dir.clone()))?;
        if !meta.is_dir() {
            return Err(StoreError::InvalidBaseDir(dir));
        }

        Ok(Self { dir, mode })
    }

    fn path(&self, addr: &str, user: &str) -> PathBuf {
        self.dir.join(storage_key(addr, user))
    }

    /// Writes `bytes` via temp-file + rename so a reader never observes a
    /// partially written entry, even across a crash mid-write.
    fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension(format!("tmp.{}", process::id()));
        fs::write(&tmp, bytes)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(self.mode))?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl KeyBlobStore for FsKeyBlobStore {
    fn has(&self, addr: &str, user: &str) -> bool {
        self.path(addr, user).is_file()
    }

    fn get(&self, addr: &str, user: &str) -> Vec<u8> {
        fs::read(self.path(addr, user)).unwrap_or_default()
    }

    fn set(&self, addr: &str, user: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(addr, user);
        self.atomic_write(&path, bytes)
    }

    fn del(&self, addr: &str, user: &str) -> Result<()> {
        fs::remove_file(self.path(addr, user))?;
        Ok(())
    }
}
