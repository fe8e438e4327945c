//! # Message Shape Validation
//!
//! [`validate`] is the generic check every message passes through
//! [`crate::endpoint::handle`] before interface-specific authorization and
//! handling: it binds the signed payload to the message it was signed over,
//! so an authorization produced for one descriptor cannot be replayed
//! against another with the signature left untouched.

use crate::endpoint::Message;
use crate::{Result, unexpected};

/// Validates that `message`'s authorization, if present, was signed over
/// this exact descriptor.
///
/// # Errors
/// Returns an error if the authorization's `descriptor_cid` does not match
/// the CID of `message`'s descriptor.
pub fn validate(message: &impl Message) -> Result<()> {
    let Some(authorization) = message.authorization() else {
        return Ok(());
    };

    let expected = message.descriptor_cid()?;
    let actual = authorization.payload()?.descriptor_cid;
    if actual != expected {
        return Err(unexpected!(
            "message descriptor CID {expected} does not match signed descriptor CID {actual}"
        ));
    }

    Ok(())
}
