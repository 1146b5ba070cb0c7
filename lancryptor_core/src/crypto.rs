//! Cryptographic primitives used by the transfer protocol.
//!
//! - RSA-OAEP (SHA-256 digest and MGF1) to wrap the per-transfer session key
//! - AES-256-CBC as an incremental stream, with explicit PKCS#7 padding
//! - SHA-256 for payload integrity and public key fingerprints

use aes::Aes256;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Result, TransferError};

pub const AES_KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;
pub const HASH_SIZE: usize = 32;
/// `key || iv` as it travels inside the RSA envelope
pub const SESSION_KEY_MATERIAL_SIZE: usize = AES_KEY_SIZE + IV_SIZE;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// One-time symmetric key material for a single transfer
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; AES_KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl SessionKey {
    /// Fresh random key and IV
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut key = [0u8; AES_KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn to_bytes(&self) -> [u8; SESSION_KEY_MATERIAL_SIZE] {
        let mut out = [0u8; SESSION_KEY_MATERIAL_SIZE];
        out[..AES_KEY_SIZE].copy_from_slice(&self.key);
        out[AES_KEY_SIZE..].copy_from_slice(&self.iv);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SESSION_KEY_MATERIAL_SIZE {
            return Err(TransferError::Crypto(format!(
                "session key material must be {} bytes, got {}",
                SESSION_KEY_MATERIAL_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; AES_KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&bytes[..AES_KEY_SIZE]);
        iv.copy_from_slice(&bytes[AES_KEY_SIZE..]);
        Ok(Self { key, iv })
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Encrypt `plaintext` for the holder of `public_key`
pub fn asymmetric_encrypt(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let mut rng = rsa::rand_core::OsRng;
    Ok(public_key.encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)?)
}

/// Parse a SubjectPublicKeyInfo PEM, as sent by a receiver
pub fn parse_public_key(pem: &[u8]) -> Result<RsaPublicKey> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| TransferError::Crypto("public key is not valid UTF-8".to_string()))?;
    RsaPublicKey::from_public_key_pem(text)
        .map_err(|e| TransferError::Crypto(format!("invalid public key: {}", e)))
}

/// Fails on wrong key, corrupted ciphertext or tampering
pub fn asymmetric_decrypt(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    Ok(private_key.decrypt(Oaep::new::<Sha256>(), ciphertext)?)
}

/// Incremental AES-256-CBC encryption.
///
/// Input must already be padded. `update` emits every complete block and keeps the
/// rest; `finalize` is only valid at the true end of the stream.
pub struct StreamEncryptor {
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl StreamEncryptor {
    pub fn new(session: &SessionKey) -> Self {
        Self {
            cipher: Aes256CbcEnc::new(&session.key.into(), &session.iv.into()),
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = take_full_blocks(&mut self.pending, chunk);
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    pub fn finalize(self) -> Result<Vec<u8>> {
        finish_stream(&self.pending)
    }
}

/// Incremental AES-256-CBC decryption; the output still carries its padding.
pub struct StreamDecryptor {
    cipher: Aes256CbcDec,
    pending: Vec<u8>,
}

impl StreamDecryptor {
    pub fn new(session: &SessionKey) -> Self {
        Self {
            cipher: Aes256CbcDec::new(&session.key.into(), &session.iv.into()),
            pending: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = take_full_blocks(&mut self.pending, chunk);
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    pub fn finalize(self) -> Result<Vec<u8>> {
        finish_stream(&self.pending)
    }
}

/// Append `chunk` to `pending` and split off the block-aligned prefix
fn take_full_blocks(pending: &mut Vec<u8>, chunk: &[u8]) -> Vec<u8> {
    pending.extend_from_slice(chunk);
    let aligned = pending.len() - pending.len() % BLOCK_SIZE;
    pending.drain(..aligned).collect()
}

fn finish_stream(pending: &[u8]) -> Result<Vec<u8>> {
    if pending.is_empty() {
        Ok(Vec::new())
    } else {
        Err(TransferError::Crypto(format!(
            "stream ended with {} bytes that do not fill a cipher block",
            pending.len()
        )))
    }
}

/// PKCS#7 padding to a 16-byte boundary; always adds between 1 and 16 bytes
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

pub fn pkcs7_unpad(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(TransferError::Integrity(format!(
            "padded length {} is not a positive multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    let pad_len = data[data.len() - 1] as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE {
        return Err(TransferError::Integrity(format!(
            "invalid padding byte {}",
            pad_len
        )));
    }

    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b as usize != pad_len) {
        return Err(TransferError::Integrity("inconsistent padding bytes".to_string()));
    }

    Ok(body.to_vec())
}

/// SHA-256 digest
pub fn content_hash(data: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::digest(data).into()
}

/// Hex fingerprint of PEM-encoded public key bytes, for comparison by a human
pub fn fingerprint(public_key_pem: &[u8]) -> String {
    hex::encode(content_hash(public_key_pem))
}
