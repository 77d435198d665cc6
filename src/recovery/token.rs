use sha2::{Digest, Sha256};

/// Generate a fresh token value: 256 bits from the thread-local CSPRNG, hex encoded.
pub fn generate() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// The form a token is stored and looked up by.
pub fn hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
