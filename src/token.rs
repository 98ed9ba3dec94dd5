use anyhow::{Context, Result};
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::fmt;

/// Argo CD API token. Debug/Display print `<REDACTED, length N>` instead of the value.
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    #[cfg(test)]
    pub fn new(token: impl Into<String>) -> Self {
        ApiToken(token.into())
    }

    /// `Authorization` header value, flagged sensitive so it stays out of HTTP logs.
    pub fn bearer_header(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.0))
            .context("Argo CD token contains characters not allowed in an HTTP header")?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<REDACTED, length {}>", self.0.len())
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_redacted() {
        let token = ApiToken::new("s3cr3t");
        assert_eq!(format!("{:?}", token), "<REDACTED, length 6>");
        assert_eq!(token.to_string(), "<REDACTED, length 6>");
    }

    #[test]
    fn test_bearer_header() {
        let header = ApiToken::new("abc").bearer_header().unwrap();
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "Bearer abc");
    }

    #[test]
    fn test_bearer_header_rejects_newline() {
        assert!(ApiToken::new("abc\ndef").bearer_header().is_err());
    }
}
