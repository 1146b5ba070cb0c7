//! Persistent RSA keypair for this host.
//!
//! Keys live as two PEM files in one directory. They are created once, never
//! rotated, and re-read from disk on every use.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{Result, TransferError};

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";
pub const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Clone)]
pub struct KeyStore {
    key_dir: PathBuf,
    create_lock: Arc<Mutex<()>>,
}

impl KeyStore {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.key_dir.clone())
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.key_dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.key_dir.join(PUBLIC_KEY_FILE)
    }

    /// Generate and persist a keypair unless a private key already exists.
    ///
    /// Returns `true` if a new keypair was written. Concurrent callers sharing this
    /// store are serialized. Both halves are written to temp files first; the public
    /// key is renamed into place before the private key is linked in, so anyone who
    /// sees `private_key.pem` also finds `public_key.pem`. The link fails if another
    /// process published a private key first. An existing private key is never
    /// replaced, even if the public half is missing.
    pub async fn ensure_keypair(&self) -> Result<bool> {
        let _guard = self.create_lock.lock().await;

        let private_path = self.private_key_path();
        if fs::try_exists(&private_path).await? {
            debug!("Keypair already present at {:?}", private_path);
            return Ok(false);
        }

        info!(
            "No keypair in {:?}, generating {}-bit RSA key",
            self.key_dir, RSA_KEY_BITS
        );
        let (private_pem, public_pem) = tokio::task::spawn_blocking(generate_keypair_pem)
            .await
            .map_err(|e| TransferError::Crypto(format!("key generation task failed: {}", e)))??;

        fs::create_dir_all(&self.key_dir).await?;

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let private_tmp = self.key_dir.join(format!(".{}.{}", PRIVATE_KEY_FILE, tag));
        let public_tmp = self.key_dir.join(format!(".{}.{}", PUBLIC_KEY_FILE, tag));

        let mut file = create_private_key_file(&private_tmp).await?;
        file.write_all(private_pem.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        fs::write(&public_tmp, public_pem.as_bytes()).await?;
        fs::rename(&public_tmp, self.public_key_path()).await?;

        let linked = fs::hard_link(&private_tmp, &private_path).await;
        let _ = fs::remove_file(&private_tmp).await;
        match linked {
            Ok(()) => {
                info!("Keypair saved to {:?}", self.key_dir);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                info!("Another process created {:?} first, keeping it", private_path);
                // Our public half may have replaced theirs; derive it from the winner
                let winner = self.load_private_key().await?;
                let public_pem = RsaPublicKey::from(&winner)
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| TransferError::Crypto(e.to_string()))?;
                fs::write(&public_tmp, public_pem.as_bytes()).await?;
                fs::rename(&public_tmp, self.public_key_path()).await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_private_key(&self) -> Result<RsaPrivateKey> {
        let path = self.private_key_path();
        let pem = read_key_file(&path).await?;
        RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| TransferError::KeyFileMalformed(path, e.to_string()))
    }

    pub async fn load_public_key(&self) -> Result<RsaPublicKey> {
        let path = self.public_key_path();
        let pem = read_key_file(&path).await?;
        RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|e| TransferError::KeyFileMalformed(path, e.to_string()))
    }

    /// Exact bytes of the public key file, validated, as sent to peers and fingerprinted
    pub async fn load_public_key_pem(&self) -> Result<Vec<u8>> {
        let path = self.public_key_path();
        let pem = read_key_file(&path).await?;
        RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|e| TransferError::KeyFileMalformed(path, e.to_string()))?;
        Ok(pem.into_bytes())
    }
}

fn generate_keypair_pem() -> Result<(String, String)> {
    let private_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, RSA_KEY_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| TransferError::Crypto(e.to_string()))?;
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| TransferError::Crypto(e.to_string()))?;

    Ok((private_pem.as_str().to_owned(), public_pem))
}

/// Owner-only permissions on Unix; fails if the file already exists
async fn create_private_key_file(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

async fn read_key_file(path: &Path) -> Result<String> {
    match fs::read_to_string(path).await {
        Ok(pem) => Ok(pem),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(TransferError::KeyFileMissing(path.to_path_buf()))
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => Err(TransferError::KeyFileMalformed(
            path.to_path_buf(),
            "not valid UTF-8".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}
