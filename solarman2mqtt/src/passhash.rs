use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 of an account password, as the token endpoint expects it.
pub fn passhash(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
