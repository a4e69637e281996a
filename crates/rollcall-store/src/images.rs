//! Captured face image storage.

use crate::{validate_subject_id, write_atomic, StoreError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const NONCE_LEN: usize = 12;

/// Storage for the PNG captures accepted at enrollment, one per slot.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, subject_id: &str, slot: u8, png: &[u8]) -> Result<(), StoreError>;

    async fn get(&self, subject_id: &str, slot: u8) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a slot's image; a missing file is not an error.
    async fn remove(&self, subject_id: &str, slot: u8) -> Result<(), StoreError>;
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "stale face image removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Plaintext `<studentId>_<slot>.png` files.
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "image store opened (plaintext)");
        Ok(Self { dir })
    }

    fn image_path(&self, subject_id: &str, slot: u8) -> Result<PathBuf, StoreError> {
        validate_subject_id(subject_id)?;
        Ok(self.dir.join(format!("{subject_id}_{slot}.png")))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put(&self, subject_id: &str, slot: u8, png: &[u8]) -> Result<(), StoreError> {
        let path = self.image_path(subject_id, slot)?;
        write_atomic(&path, png).await?;
        tracing::debug!(path = %path.display(), bytes = png.len(), "face image saved");
        Ok(())
    }

    async fn get(&self, subject_id: &str, slot: u8) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.image_path(subject_id, slot)?).await
    }

    async fn remove(&self, subject_id: &str, slot: u8) -> Result<(), StoreError> {
        remove_optional(&self.image_path(subject_id, slot)?).await
    }
}

/// AES-256-GCM sealed `<studentId>_<slot>.png.sealed` files.
///
/// The key is the SHA-256 digest of a passphrase. Each file is
/// `nonce (12 bytes) || ciphertext+tag`.
pub struct SealedImageStore {
    dir: PathBuf,
    cipher: Aes256Gcm,
}

impl SealedImageStore {
    pub async fn open(dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let digest = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest));

        tracing::info!(dir = %dir.display(), "image store opened (sealed)");
        Ok(Self { dir, cipher })
    }

    fn image_path(&self, subject_id: &str, slot: u8) -> Result<PathBuf, StoreError> {
        validate_subject_id(subject_id)?;
        Ok(self.dir.join(format!("{subject_id}_{slot}.png.sealed")))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StoreError::Crypto("encrypt failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open_sealed(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Crypto("sealed file truncated"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Crypto("decrypt failed (wrong key or corrupted file)"))
    }
}

#[async_trait]
impl ImageStore for SealedImageStore {
    async fn put(&self, subject_id: &str, slot: u8, png: &[u8]) -> Result<(), StoreError> {
        let path = self.image_path(subject_id, slot)?;
        let sealed = self.seal(png)?;
        write_atomic(&path, &sealed).await?;
        tracing::debug!(path = %path.display(), bytes = png.len(), "face image sealed");
        Ok(())
    }

    async fn get(&self, subject_id: &str, slot: u8) -> Result<Option<Vec<u8>>, StoreError> {
        match read_optional(&self.image_path(subject_id, slot)?).await? {
            Some(sealed) => self.open_sealed(&sealed).map(Some),
            None => Ok(None),
        }
    }

    async fn remove(&self, subject_id: &str, slot: u8) -> Result<(), StoreError> {
        remove_optional(&self.image_path(subject_id, slot)?).await
    }
}
