//! Wire framing: fixed-width big-endian integers, length-prefixed blobs,
//! the 256-byte filename field and the 32-byte hash field.
//!
//! Every fixed-size read goes through [`recv_exact`]; a single `read` may return
//! fewer bytes than asked for.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::FILENAME_FIELD_LEN;
use crate::crypto::HASH_SIZE;
use crate::error::{Result, TransferError};

/// Read exactly `n` bytes, looping over short reads.
/// Fails with `ConnectionLost` if the peer closes first.
pub async fn recv_exact<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    recv_exact_into(reader, &mut buf).await?;
    Ok(buf)
}

pub async fn recv_exact_into<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TransferError::ConnectionLost);
        }
        filled += n;
    }
    Ok(())
}

pub async fn read_u8<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    recv_exact_into(reader, &mut buf).await?;
    Ok(buf[0])
}

pub async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    recv_exact_into(reader, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

pub async fn read_u64<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    recv_exact_into(reader, &mut buf).await?;
    Ok(u64::from_be_bytes(buf))
}

pub async fn write_u32<W: AsyncWrite + Unpin>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_be_bytes()).await?;
    Ok(())
}

pub async fn write_u64<W: AsyncWrite + Unpin>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_be_bytes()).await?;
    Ok(())
}

/// Write a u32 length prefix followed by `data`
pub async fn write_blob<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| TransferError::Protocol(format!("blob of {} bytes is too large", data.len())))?;
    write_u32(writer, len).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Read a length-prefixed blob, refusing declared lengths above `max_len`
pub async fn read_blob<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let len = read_u32(reader).await? as usize;
    if len > max_len {
        return Err(TransferError::Protocol(format!(
            "Message too large: {} bytes (max {})",
            len, max_len
        )));
    }
    recv_exact(reader, len).await
}

/// Encode a filename into the fixed NUL-padded field.
///
/// Names longer than the field are cut to the longest prefix that fits on a UTF-8
/// character boundary, so the same input always yields the same field.
pub fn encode_filename(name: &str) -> [u8; FILENAME_FIELD_LEN] {
    let mut cutoff = name.len().min(FILENAME_FIELD_LEN);
    while !name.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut field = [0u8; FILENAME_FIELD_LEN];
    field[..cutoff].copy_from_slice(&name.as_bytes()[..cutoff]);
    field
}

pub fn decode_filename(field: &[u8]) -> Result<String> {
    let end = field
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8(field[..end].to_vec())
        .map_err(|_| TransferError::Protocol("filename is not valid UTF-8".to_string()))
}

pub async fn read_hash<R: AsyncRead + Unpin>(reader: &mut R) -> Result<[u8; HASH_SIZE]> {
    let mut hash = [0u8; HASH_SIZE];
    recv_exact_into(reader, &mut hash).await?;
    Ok(hash)
}

/// File description sent after the session key: name, archive hash, ciphertext length
#[derive(Debug, Clone, PartialEq)]
pub struct TransferHeader {
    pub file_name: String,
    pub content_hash: [u8; HASH_SIZE],
    pub payload_len: u64,
}

impl TransferHeader {
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&encode_filename(&self.file_name)).await?;
        writer.write_all(&self.content_hash).await?;
        write_u64(writer, self.payload_len).await
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut name_field = [0u8; FILENAME_FIELD_LEN];
        recv_exact_into(reader, &mut name_field).await?;
        let file_name = decode_filename(&name_field)?;

        let content_hash = read_hash(reader).await?;
        let payload_len = read_u64(reader).await?;

        Ok(Self {
            file_name,
            content_hash,
            payload_len,
        })
    }
}
