//! `data:` URL helpers shared by the vendor mappings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// An inline payload carried in a `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime_type: &'a str,
    /// Still base64-encoded.
    pub payload: &'a str,
}

impl DataUrl<'_> {
    #[must_use]
    pub fn decode(&self) -> Option<Vec<u8>> {
        STANDARD.decode(self.payload.as_bytes()).ok()
    }
}

/// Split a base64 `data:` URL. Returns `None` for remote URLs and for data
/// URLs that are not base64.
#[must_use]
pub fn parse_data_url(url: &str) -> Option<DataUrl<'_>> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    Some(DataUrl { mime_type, payload })
}

#[must_use]
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[must_use]
pub fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD.decode(encoded.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_url() {
        let url = to_data_url("image/png", b"\x89PNG");
        let parsed = parse_data_url(&url).unwrap();
        assert_eq!(parsed.mime_type, "image/png");
        assert_eq!(parsed.decode().unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_remote_and_plain_urls_are_not_data() {
        assert!(parse_data_url("https://example.com/a.png").is_none());
        assert!(parse_data_url("data:text/plain,hello").is_none());
    }
}
