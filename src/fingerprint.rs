//! Script Fingerprint (C1): SHA-1 over `deploy ∥ revert ∥ verify` bytes.
//!
//! A missing file contributes zero bytes. No line-ending normalization.
//! Used for `changes.script_hash` at deploy time and for divergence
//! detection in the reconciler (C10).

use std::fs;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::Result;

/// Compute the fingerprint of the three scripts that back a change. Missing
/// files contribute zero bytes rather than erroring (spec.md §8 "Missing
/// script files").
pub fn fingerprint(deploy: &Path, revert: &Path, verify: &Path) -> Result<String> {
    let mut hasher = Sha1::new();
    hasher.update(read_if_exists(deploy)?);
    hasher.update(read_if_exists(revert)?);
    hasher.update(read_if_exists(verify)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Same as [`fingerprint`] but over already-read bytes, for callers that
/// have the script contents in hand (e.g. the executor, which reads the
/// deploy script once for both execution and fingerprinting).
#[must_use]
pub fn fingerprint_bytes(deploy: &[u8], revert: &[u8], verify: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(deploy);
    hasher.update(revert);
    hasher.update(verify);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn read_if_exists(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fingerprint_matches_manual_sha1() {
        let dir = tempdir().unwrap();
        let deploy = dir.path().join("deploy.sql");
        let revert = dir.path().join("revert.sql");
        let verify = dir.path().join("verify.sql");
        fs::write(&deploy, "CREATE TABLE u(id INT);").unwrap();
        fs::write(&revert, "DROP TABLE u;").unwrap();
        fs::write(&verify, "SELECT 1;").unwrap();

        let got = fingerprint(&deploy, &revert, &verify).unwrap();
        let want = fingerprint_bytes(
            b"CREATE TABLE u(id INT);",
            b"DROP TABLE u;",
            b"SELECT 1;",
        );
        assert_eq!(got, want);
        assert_eq!(got.len(), 40);
    }

    #[test]
    fn missing_files_contribute_zero_bytes() {
        let dir = tempdir().unwrap();
        let deploy = dir.path().join("deploy.sql");
        fs::write(&deploy, "CREATE TABLE u(id INT);").unwrap();
        let missing_revert = dir.path().join("revert.sql");
        let missing_verify = dir.path().join("verify.sql");

        let got = fingerprint(&deploy, &missing_revert, &missing_verify).unwrap();
        let want = fingerprint_bytes(b"CREATE TABLE u(id INT);", b"", b"");
        assert_eq!(got, want);
    }

    #[test]
    fn order_matters() {
        let a = fingerprint_bytes(b"a", b"b", b"c");
        let b = fingerprint_bytes(b"b", b"a", b"c");
        assert_ne!(a, b);
    }
}
