/// Default TCP port for file transfer
pub const TRANSFER_PORT: u16 = 5001;

/// Plaintext chunk size for the encrypted stream (64KB)
pub const BUFFER_SIZE: usize = 64 * 1024;

/// First bytes a sender writes on a new connection
pub const HANDSHAKE_TOKEN: &[u8] = b"REQ_PUBLIC_KEY";

pub const APPROVE_BYTE: u8 = 0x01;
pub const REJECT_BYTE: u8 = 0x00;

/// Fixed width of the NUL-padded filename field
pub const FILENAME_FIELD_LEN: usize = 256;

/// Upper bound for a receiver's PEM public key (16KB)
pub const MAX_PUBLIC_KEY_LEN: usize = 16 * 1024;

/// Upper bound for the RSA-wrapped session key
pub const MAX_SESSION_BLOB_LEN: usize = 1024;

/// Default upper bound for the encrypted payload (2GB)
pub const DEFAULT_MAX_PAYLOAD: u64 = 2 * 1024 * 1024 * 1024;
