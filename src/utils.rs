//! Small helpers shared across interfaces: URI normalization and content
//! addressing.

pub mod cid;
pub mod uri;

use crate::Result;

/// Normalizes a protocol or schema URI to its canonical form: scheme and
/// host lower-cased, trailing slash stripped, so the same logical URI
/// compares equal regardless of how a caller capitalized or trailed it.
///
/// # Errors
/// Returns an error if `url` is not a valid URI.
pub fn clean_url(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).map_err(|e| crate::bad_request!("invalid URL {url}: {e}"))?;
    let mut clean = format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default()
    );
    if let Some(port) = parsed.port() {
        clean.push_str(&format!(":{port}"));
    }
    clean.push_str(parsed.path().trim_end_matches('/'));
    Ok(clean)
}
