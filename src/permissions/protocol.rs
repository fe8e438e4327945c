//! Entry point for protocol-based authorization of messages that carry no
//! record of their own to check against — currently just [`super::super::records::Read`],
//! which only has a filter until the matching write is fetched.

use crate::provider::MessageStore;
use crate::records::{Read, Write, protocol};
use crate::store::{Query, RecordsQuery};
use crate::{Result, unexpected};

use super::{Grant, Scope};

/// Resolves protocol-governed authorization for a message against the
/// named protocol, fetching whatever additional state (such as the record's
/// write) the check requires.
pub(crate) struct Protocol {
    protocol: String,
}

impl Protocol {
    /// Returns a checker for `protocol`.
    pub(crate) fn new(protocol: impl Into<String>) -> Self {
        Self { protocol: protocol.into() }
    }

    /// Authorizes `read` by fetching the record it targets and delegating to
    /// [`protocol::Authorizer::permit_read`].
    ///
    /// # Errors
    /// Returns an error if the targeted record cannot be found or the read
    /// is not permitted under the record's protocol.
    pub(crate) async fn permit_read(
        &self, owner: &str, read: &Read, store: &impl MessageStore,
    ) -> Result<()> {
        let query: Query = RecordsQuery::from(read.clone()).into();
        let (entries, _) = store.query(owner, &query).await?;
        let Some(entry) = entries.first() else {
            return Err(unexpected!("unable to find record for read"));
        };
        let Some(write) = entry.as_write() else {
            return Err(unexpected!("expected `RecordsWrite` message"));
        };

        let verifier =
            protocol::Authorizer::new(&self.protocol).context_id(write.context_id.as_ref());
        verifier.permit_read(owner, read, write, store).await
    }
}

/// Fetches the permission scope a first-class permissions-protocol record
/// (a grant) declares, so a message referencing it can be checked against
/// the scope without re-deriving the full [`Grant`].
///
/// # Errors
/// Returns an error if `write` is not a valid grant record.
pub(crate) async fn fetch_scope(
    _owner: &str, write: &Write, _store: &impl MessageStore,
) -> Result<Scope> {
    Ok(Grant::from_write(write)?.data.scope)
}
