use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Both digests of one file's full content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// 64-bit xxHash, lower-case hex, 16 characters.
    pub xxh64: String,
    /// BLAKE3, lower-case hex, 64 characters.
    pub blake3: String,
    pub bytes: u64,
}

/// Streams the file through a fixed-size buffer; the content is never held whole.
pub fn hash_file(path: &Path, buffer_size: usize) -> io::Result<FileDigest> {
    let file = File::open(path)?;
    hash_reader(file, buffer_size)
}

pub fn hash_reader<R: Read>(mut reader: R, buffer_size: usize) -> io::Result<FileDigest> {
    let mut xxh = XxHash64::with_seed(0);
    let mut blake = blake3::Hasher::new();
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut bytes = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        xxh.write(&buffer[..read]);
        blake.update(&buffer[..read]);
        bytes += read as u64;
    }

    Ok(FileDigest {
        xxh64: format!("{:016x}", xxh.finish()),
        blake3: blake.finalize().to_hex().to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_known_blake3_of_empty_input() {
        let digest = hash_reader(Cursor::new(Vec::<u8>::new()), 16).unwrap();
        assert_eq!(
            digest.blake3,
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
        assert_eq!(digest.xxh64, "ef46db3751d8e999");
        assert_eq!(digest.bytes, 0);
    }

    #[test]
    fn test_buffer_size_does_not_change_digest() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let small = hash_reader(Cursor::new(&data), 7).unwrap();
        let large = hash_reader(Cursor::new(&data), DEFAULT_BUFFER_SIZE).unwrap();
        assert_eq!(small, large);
        assert_eq!(small.bytes, 50_000);
        assert_eq!(small.xxh64.len(), 16);
        assert_eq!(small.blake3.len(), 64);
    }

    #[test]
    fn test_identical_files_share_digests() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.bin", "b.bin"] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            f.write_all(b"same content").unwrap();
        }
        let a = hash_file(&dir.path().join("a.bin"), DEFAULT_BUFFER_SIZE).unwrap();
        let b = hash_file(&dir.path().join("b.bin"), DEFAULT_BUFFER_SIZE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hash_file(&dir.path().join("nope"), DEFAULT_BUFFER_SIZE).is_err());
    }
}
