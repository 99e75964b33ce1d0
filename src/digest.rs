//! Integrity digest (component C2).
//!
//! A 128-bit content hash used purely for post-transfer verification, not
//! authentication. MD5 is adequate here — accidental corruption, not a
//! malicious peer, is the threat model (§1 Non-goals excludes encryption
//! and authentication).

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::constants::DIGEST_BLOCK_SIZE;

/// A 16-byte content digest. Wrapped rather than a bare `[u8; 16]` so call
/// sites read `Digest` instead of an anonymous byte array, and so it can
/// carry its own `Display`/`PartialEq` without clashing with the `md5`
/// crate's own `Digest` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest(pub [u8; 16]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Digest(arr))
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Stream the file in `DIGEST_BLOCK_SIZE` chunks into an MD5 context.
pub async fn digest(path: &Path) -> std::io::Result<Digest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; DIGEST_BLOCK_SIZE.min(8 * 1024 * 1024)];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }

    Ok(Digest(ctx.compute().0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn digest_matches_known_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let got = digest(&path).await.unwrap();
        // md5("hello world") is a well-known fixed digest.
        let expected = "5eb63bbbe01eeed093cb22bb8f5acdc3";
        assert_eq!(got.to_string(), expected);
    }

    #[tokio::test]
    async fn digest_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();

        let got = digest(&path).await.unwrap();
        // md5 of the empty string.
        assert_eq!(got.to_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn same_content_same_digest() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let content = vec![0x5Au8; 10_000];
        tokio::fs::write(&a, &content).await.unwrap();
        tokio::fs::write(&b, &content).await.unwrap();

        assert_eq!(digest(&a).await.unwrap(), digest(&b).await.unwrap());
    }
}
