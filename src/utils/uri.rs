//! URI validation for protocol, schema, and type identifiers, which must be
//! well-formed absolute URIs but are otherwise opaque to the core.

use crate::{Result, bad_request};

/// Validates that `uri` parses as an absolute URI.
///
/// # Errors
/// Returns an error if `uri` is not a valid absolute URI.
pub fn validate(uri: &str) -> Result<()> {
    url::Url::parse(uri).map_err(|e| bad_request!("invalid URI {uri}: {e}"))?;
    Ok(())
}
