use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Only this prefix of a document is hashed.
pub const FINGERPRINT_WINDOW: usize = 64 * 1024;
pub const FINGERPRINT_LEN: usize = 12;

/// Truncated sha256 over the first 64 KiB.
pub fn fingerprint(bytes: &[u8]) -> String {
    let window = &bytes[..bytes.len().min(FINGERPRINT_WINDOW)];
    let digest = Sha256::digest(window);
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Reads at most the fingerprint window, whatever the file size.
pub async fn fingerprint_file(path: &Path) -> Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut buf = Vec::with_capacity(FINGERPRINT_WINDOW);
    file.take(FINGERPRINT_WINDOW as u64)
        .read_to_end(&mut buf)
        .await?;
    Ok(fingerprint(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fingerprint_is_twelve_hex_chars() {
        let fp = fingerprint(b"abc");
        assert_eq!(fp, "ba7816bf8f01");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn bytes_past_the_window_are_ignored() {
        let mut a = vec![b'x'; FINGERPRINT_WINDOW];
        let mut b = a.clone();
        a.extend_from_slice(b"tail one");
        b.extend_from_slice(b"another tail");
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let mut c = vec![b'x'; FINGERPRINT_WINDOW];
        c[10] = b'y';
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[tokio::test]
    async fn file_fingerprint_matches_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("page.md");
        let body = vec![b'z'; FINGERPRINT_WINDOW * 2];
        std::fs::write(&path, &body).unwrap();
        assert_eq!(fingerprint_file(&path).await.unwrap(), fingerprint(&body));
    }
}
