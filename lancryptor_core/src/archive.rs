//! Single-entry deflate zip container used as the transfer payload.

use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, TransferError};

/// A file recovered from a received archive
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedFile {
    /// Entry name with any directory components removed
    pub name: String,
    pub contents: Vec<u8>,
}

/// Read `path` and pack it into an in-memory zip under its base name
pub fn compress_file(path: &Path) -> Result<Vec<u8>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::FileNotFound(path.to_path_buf()))?;
    let contents = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TransferError::FileNotFound(path.to_path_buf()),
        _ => TransferError::Io(e),
    })?;
    compress_bytes(name, &contents)
}

pub fn compress_bytes(name: &str, contents: &[u8]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(name, options)?;
    zip.write_all(contents)?;

    Ok(zip.finish()?.into_inner())
}

/// Unpack an archive that must hold exactly one file of at most `max_size` bytes
pub fn decompress_single(zip_data: &[u8], max_size: u64) -> Result<ArchivedFile> {
    let mut archive = ZipArchive::new(Cursor::new(zip_data))?;

    let mut found: Option<ArchivedFile> = None;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        if found.is_some() {
            return Err(TransferError::Archive(
                "archive holds more than one file".to_string(),
            ));
        }

        // enclosed_name rejects absolute paths and `..` escapes
        let name = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .ok_or_else(|| {
                TransferError::Archive(format!("unsafe entry name {:?}", entry.name()))
            })?;

        if entry.size() > max_size {
            return Err(TransferError::Archive(format!(
                "entry {} expands to {} bytes, limit is {}",
                name,
                entry.size(),
                max_size
            )));
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.by_ref().take(max_size + 1).read_to_end(&mut contents)?;
        if contents.len() as u64 > max_size {
            return Err(TransferError::Archive(format!(
                "entry {} exceeds {} bytes",
                name, max_size
            )));
        }

        found = Some(ArchivedFile { name, contents });
    }

    found.ok_or_else(|| TransferError::Archive("archive is empty".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1024 * 1024;

    #[test]
    fn test_compress_roundtrip_preserves_name_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"hello-test").unwrap();

        let zipped = compress_file(&path).unwrap();
        let file = decompress_single(&zipped, LIMIT).unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.contents, b"hello-test");
    }

    #[test]
    fn test_zero_byte_file() {
        let zipped = compress_bytes("empty.bin", b"").unwrap();
        let file = decompress_single(&zipped, LIMIT).unwrap();
        assert_eq!(file.name, "empty.bin");
        assert!(file.contents.is_empty());
    }

    #[test]
    fn test_compression_shrinks_repetitive_data() {
        let data = vec![0x41u8; 100_000];
        let zipped = compress_bytes("a.txt", &data).unwrap();
        assert!(zipped.len() < data.len() / 10);
        assert_eq!(decompress_single(&zipped, LIMIT).unwrap().contents, data);
    }

    #[test]
    fn test_missing_source_file() {
        let result = compress_file(Path::new("/definitely/not/here.txt"));
        assert!(matches!(result, Err(TransferError::FileNotFound(_))));
    }

    #[test]
    fn test_nested_entry_name_is_flattened() {
        let zipped = compress_bytes("docs/inner/notes.txt", b"x").unwrap();
        assert_eq!(decompress_single(&zipped, LIMIT).unwrap().name, "notes.txt");
    }

    #[test]
    fn test_traversal_entry_rejected() {
        let zipped = compress_bytes("../../etc/passwd", b"x").unwrap();
        assert!(decompress_single(&zipped, LIMIT).is_err());
    }

    #[test]
    fn test_multiple_entries_rejected() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.start_file("a.txt", options).unwrap();
        zip.write_all(b"a").unwrap();
        zip.start_file("b.txt", options).unwrap();
        zip.write_all(b"b").unwrap();
        let zipped = zip.finish().unwrap().into_inner();

        assert!(decompress_single(&zipped, LIMIT).is_err());
    }

    #[test]
    fn test_size_limit_enforced() {
        let zipped = compress_bytes("big.bin", &vec![0u8; 4096]).unwrap();
        assert!(decompress_single(&zipped, 1000).is_err());
    }

    #[test]
    fn test_garbage_is_not_an_archive() {
        assert!(matches!(
            decompress_single(b"definitely not a zip", LIMIT),
            Err(TransferError::Archive(_))
        ));
    }
}
