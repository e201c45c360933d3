//! Secure randomness for session code tokens

/// Raised when no random bytes could be obtained
#[derive(Debug, thiserror::Error)]
#[error("Random source unavailable: {0}")]
pub struct TokenSourceError(pub String);

/// Cryptographically secure byte source
pub trait TokenSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenSourceError>;
}

/// Operating system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenSourceError> {
        getrandom::fill(buf).map_err(|e| TokenSourceError(e.to_string()))
    }
}

/// Generate a hex token from `len` random bytes
pub fn generate_token(source: &dyn TokenSource, len: usize) -> Result<String, TokenSourceError> {
    let mut bytes = vec![0u8; len];
    source.fill(&mut bytes)?;
    Ok(data_encoding::HEXLOWER.encode(&bytes))
}
