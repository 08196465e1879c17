//! Content addressing for cache entries
//!
//! Every cached artifact (the encoded image and its detections) is named after
//! a digest of the URL it came from.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of digest bytes kept in a key
const KEY_BYTES: usize = 16;

/// Fixed-length hex identifier derived from a source URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Length of the hex representation
    pub const LEN: usize = KEY_BYTES * 2;

    /// Hex form used in cache file names
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for this key with the given extension (without the dot)
    #[must_use]
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the content key of a URL
///
/// # Examples
/// ```
/// use covercrop::content_key::{address_of, ContentKey};
///
/// let key = address_of("https://example.com/cover.jpg");
/// assert_eq!(key, address_of("https://example.com/cover.jpg"));
/// assert_eq!(key.as_str().len(), ContentKey::LEN);
/// ```
#[must_use]
pub fn address_of(url: &str) -> ContentKey {
    let digest = Sha256::digest(url.as_bytes());
    let hex = digest
        .iter()
        .take(KEY_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    ContentKey(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_address_is_deterministic() {
        let url = "https://pics.example.com/digital/video/abc00123/abc00123pl.jpg";
        assert_eq!(address_of(url), address_of(url));
    }

    #[test]
    fn test_known_digest_prefix() {
        // sha256("") = e3b0c442 98fc1c14 9afbf4c8 996fb924 ...
        assert_eq!(
            address_of("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb924"
        );
    }

    #[test]
    fn test_key_shape() {
        let key = address_of("https://example.com/a.jpg");
        assert_eq!(key.as_str().len(), ContentKey::LEN);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key.file_name("jpg"), format!("{}.jpg", key));
    }

    #[test]
    fn test_no_collisions_in_corpus() {
        let urls: Vec<String> = (0..2000)
            .map(|i| format!("https://cdn.example.com/covers/{}/big.jpg", i))
            .chain([
                "https://example.com/a.jpg".to_string(),
                "https://example.com/a.jpg?".to_string(),
                "http://example.com/a.jpg".to_string(),
                "https://example.com/A.jpg".to_string(),
            ])
            .collect();

        let keys: HashSet<ContentKey> = urls.iter().map(|u| address_of(u)).collect();
        assert_eq!(keys.len(), urls.len());
    }
}
