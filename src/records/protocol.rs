//! # Protocol-based Authorization
//!
//! [`Authorizer`] checks a [`Write`]/[`Delete`]/[`Query`]/[`Subscribe`]/
//! [`Read`] message against the rule set its protocol declares for the
//! message's protocol path: the record's declared type and size, its tags,
//! whether it is a role record, and — the bulk of the work — whether the
//! actor invoking the message (by identity, by role, or as a record's
//! recipient) is named in one of the rule set's `$actions`.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::protocols::{self, Action, ActionRule, Actor, Definition, ProtocolType, RuleSet};
use crate::provider::MessageStore;
use crate::records::{Delete, Query, Read, RecordsFilter, Subscribe, Write, write};
use crate::store::{ProtocolsQuery, RecordsQueryBuilder};
use crate::{Result, forbidden, unexpected, utils};

/// Checks protocol-governed messages against the rule set declared for
/// their protocol path.
///
/// Built with [`Authorizer::new`] and, for delete authorization, narrowed
/// with [`Authorizer::context_id`] and [`Authorizer::initial_write`] before
/// calling one of the `permit_*` methods.
pub struct Authorizer {
    protocol: String,
    context_id: Option<String>,
    initial_write: Option<Write>,
}

impl Authorizer {
    /// Returns an authorizer for `protocol`.
    #[must_use]
    pub fn new(protocol: impl Into<String>) -> Self {
        Self { protocol: protocol.into(), context_id: None, initial_write: None }
    }

    /// Narrows role verification to the thread rooted at `context_id`.
    #[must_use]
    pub fn context_id(mut self, context_id: Option<&String>) -> Self {
        self.context_id = context_id.cloned();
        self
    }

    /// Supplies the record's initial write, needed by [`Self::permit_delete`]
    /// since a `Delete` message carries no protocol fields of its own.
    #[must_use]
    pub fn initial_write(mut self, write: &Write) -> Self {
        self.initial_write = Some(write.clone());
        self
    }

    /// Authorizes a [`Write`]: validates the record's type, protocol path,
    /// role, size, and tags against its protocol, then checks the author
    /// (or invoked role) is permitted one of `create`, `update`, or
    /// `co-update`.
    ///
    /// # Errors
    /// Returns an error if the record violates its protocol's structure or
    /// no action rule authorizes the write.
    pub async fn permit_write(&self, owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
        let definition = protocol_definition(owner, &self.protocol, store).await?;
        let Some(protocol_path) = &write.descriptor.protocol_path else {
            return Err(unexpected!("missing `protocol_path`"));
        };
        let Some(rule_set) = protocols::rule_set(protocol_path, &definition.structure) else {
            return Err(unexpected!("no rule set defined for protocol path"));
        };

        verify_type(write, &definition.types)?;
        verify_protocol_path(owner, write, store).await?;
        if rule_set.role.is_some() {
            verify_role_record(owner, write, store).await?;
        }
        verify_size_limit(write.descriptor.data_size, rule_set)?;
        verify_tags(write.descriptor.tags.as_ref(), rule_set)?;

        let chain = if write::initial_write(owner, &write.record_id, store).await?.is_some() {
            record_chain(owner, &write.record_id, store).await?
        } else if let Some(parent_id) = &write.descriptor.parent_id {
            record_chain(owner, parent_id, store).await?
        } else {
            vec![]
        };

        let author = write.authorization.author()?;
        let invoked_role = write.authorization.payload()?.protocol_role;
        if let Some(role) = &invoked_role {
            verify_invoked_role(owner, &self.protocol, &author, role, self.context_id.as_deref(), store)
                .await?;
        }

        let allowed = allowed_write_actions(owner, write, store).await?;
        check_action_rules(
            &author,
            invoked_role.as_deref(),
            &allowed,
            rule_set,
            &chain,
            write.descriptor.recipient.as_deref(),
        )
    }

    /// Authorizes a [`Delete`] against the record's initial write, set with
    /// [`Self::initial_write`].
    ///
    /// # Errors
    /// Returns an error if no initial write was supplied or no action rule
    /// authorizes the delete (or prune).
    pub async fn permit_delete(&self, owner: &str, delete: &Delete, store: &impl MessageStore) -> Result<()> {
        let Some(initial) = &self.initial_write else {
            return Err(unexpected!("missing initial write"));
        };
        let definition = protocol_definition(owner, &self.protocol, store).await?;
        let Some(protocol_path) = &initial.descriptor.protocol_path else {
            return Err(unexpected!("missing `protocol_path`"));
        };
        let Some(rule_set) = protocols::rule_set(protocol_path, &definition.structure) else {
            return Err(unexpected!("no rule set defined for protocol path"));
        };

        let chain = record_chain(owner, &initial.record_id, store).await?;
        let author = delete.authorization.author()?;
        let initial_author = initial.authorization.author()?;

        let mut allowed = vec![];
        if delete.descriptor.prune {
            allowed.push(Action::CoPrune);
            if author == initial_author {
                allowed.push(Action::Prune);
            }
        }
        allowed.push(Action::CoDelete);
        if author == initial_author {
            allowed.push(Action::Delete);
        }

        let invoked_role = delete.authorization.payload()?.protocol_role;
        check_action_rules(
            &author,
            invoked_role.as_deref(),
            &allowed,
            rule_set,
            &chain,
            chain.last().and_then(|w| w.descriptor.recipient.as_deref()),
        )
    }

    /// Authorizes a role-invoking [`Query`].
    ///
    /// # Errors
    /// Returns an error if the query carries no invoked role, the role
    /// path is not a declared role, or the author does not hold it.
    pub async fn permit_query(&self, owner: &str, query: &Query, store: &impl MessageStore) -> Result<()> {
        let Some(authzn) = &query.authorization else {
            return Err(forbidden!("missing authorization"));
        };
        self.permit_role_invocation(owner, &authzn.author()?, &authzn.payload()?.protocol_role, store)
            .await
    }

    /// Authorizes a role-invoking [`Subscribe`].
    ///
    /// # Errors
    /// Returns an error if the subscription carries no invoked role, the
    /// role path is not a declared role, or the author does not hold it.
    pub async fn permit_subscribe(
        &self, owner: &str, subscribe: &Subscribe, store: &impl MessageStore,
    ) -> Result<()> {
        let Some(authzn) = &subscribe.authorization else {
            return Err(forbidden!("missing authorization"));
        };
        self.permit_role_invocation(owner, &authzn.author()?, &authzn.payload()?.protocol_role, store)
            .await
    }

    /// Authorizes a [`Read`] of `write` under this protocol: either the
    /// reader invokes a role it holds, or the rule set's `$actions` name the
    /// reader directly (by identity, as `write`'s recipient, or as
    /// `anyone`).
    ///
    /// # Errors
    /// Returns an error if the record's rule set is missing or no action
    /// rule authorizes the read.
    pub async fn permit_read(
        &self, owner: &str, read: &Read, write: &Write, store: &impl MessageStore,
    ) -> Result<()> {
        let definition = protocol_definition(owner, &self.protocol, store).await?;
        let Some(protocol_path) = &write.descriptor.protocol_path else {
            return Err(unexpected!("missing `protocol_path`"));
        };
        let Some(rule_set) = protocols::rule_set(protocol_path, &definition.structure) else {
            return Err(unexpected!("no rule set defined for protocol path"));
        };

        let Some(authzn) = &read.authorization else {
            return Err(forbidden!("missing authorization"));
        };
        let author = authzn.author()?;
        let invoked_role = authzn.payload()?.protocol_role;

        if let Some(role) = &invoked_role {
            return verify_invoked_role(
                owner,
                &self.protocol,
                &author,
                role,
                self.context_id.as_deref(),
                store,
            )
            .await;
        }

        let chain = record_chain(owner, &write.record_id, store).await?;
        check_action_rules(
            &author,
            None,
            &[Action::Read],
            rule_set,
            &chain,
            write.descriptor.recipient.as_deref(),
        )
    }

    async fn permit_role_invocation(
        &self, owner: &str, author: &str, protocol_role: &Option<String>, store: &impl MessageStore,
    ) -> Result<()> {
        let Some(protocol_role) = protocol_role else {
            return Err(unexpected!("missing protocol role"));
        };
        let definition = protocol_definition(owner, &self.protocol, store).await?;
        let Some(rule_set) = protocols::rule_set(protocol_role, &definition.structure) else {
            return Err(unexpected!("no rule set defined for protocol role"));
        };
        if !rule_set.role.unwrap_or_default() {
            return Err(forbidden!("protocol path {protocol_role} does not match role record type"));
        }
        verify_invoked_role(
            owner,
            &self.protocol,
            author,
            protocol_role,
            self.context_id.as_deref(),
            store,
        )
        .await
    }
}

/// Verifies the `data_format` and `schema` parameters.
fn verify_type(write: &Write, types: &BTreeMap<String, ProtocolType>) -> Result<()> {
    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol path"));
    };
    let Some(type_name) = protocol_path.split('/').last() else {
        return Err(unexpected!("missing type name"));
    };
    let Some(protocol_type) = types.get(type_name) else {
        return Err(forbidden!("record with type {type_name} not allowed in protocol"));
    };

    if protocol_type.schema.is_some() && protocol_type.schema != write.descriptor.schema {
        return Err(forbidden!("invalid schema for type {type_name}"));
    }
    if let Some(data_formats) = &protocol_type.data_formats {
        if !data_formats.contains(&write.descriptor.data_format) {
            return Err(forbidden!("invalid data_format for type {type_name}"));
        }
    }

    Ok(())
}

// Verify the `protocol_path` matches the path of the actual record chain.
async fn verify_protocol_path(owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol path"));
    };
    let Some(type_name) = protocol_path.split('/').last() else {
        return Err(unexpected!("missing type name"));
    };

    let Some(parent_id) = &write.descriptor.parent_id else {
        if protocol_path != type_name {
            return Err(forbidden!("invalid protocol path for parentless record"));
        }
        return Ok(());
    };

    let Some(parent) = write::initial_write(owner, parent_id, store).await? else {
        return Err(unexpected!("unable to find parent record {parent_id}"));
    };

    let Some(parent_path) = &parent.descriptor.protocol_path else {
        return Err(unexpected!("parent record is missing protocol path"));
    };
    if &format!("{parent_path}/{type_name}") != protocol_path {
        return Err(forbidden!("invalid `protocol_path`"));
    }

    let Some(context_id) = &write.context_id else {
        return Err(unexpected!("missing context_id"));
    };
    let Some(parent_context_id) = &parent.context_id else {
        return Err(unexpected!("missing parent context_id"));
    };
    if context_id != &format!("{parent_context_id}/{}", write.record_id) {
        return Err(forbidden!("invalid `context_id`"));
    }

    Ok(())
}

// Verify `write` does not collide with an existing role record for the
// same recipient.
async fn verify_role_record(owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
    let Some(recipient) = &write.descriptor.recipient else {
        return Err(unexpected!("role record is missing recipient"));
    };
    let Some(protocol) = &write.descriptor.protocol else {
        return Err(unexpected!("missing protocol"));
    };
    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol_path"));
    };

    let query = RecordsQueryBuilder::new()
        .method(None)
        .add_filter(
            RecordsFilter::new()
                .protocol(protocol)
                .protocol_path(protocol_path)
                .add_recipient(recipient),
        )
        .build();
    let (entries, _) = store.query(owner, &query).await?;

    for entry in entries {
        if let Some(matched) = entry.as_write() {
            if matched.record_id != write.record_id {
                return Err(forbidden!("DID '{recipient}' is already recipient of a role record"));
            }
        }
    }

    Ok(())
}

// Verifies an author invoking `protocol_role` holds a role record granting
// it, optionally restricted to the thread rooted at `context_id`.
async fn verify_invoked_role(
    owner: &str, protocol: &str, author: &str, protocol_role: &str, context_id: Option<&str>,
    store: &impl MessageStore,
) -> Result<()> {
    let segment_count = protocol_role.split('/').count();
    if context_id.is_none() && segment_count > 1 {
        return Err(unexpected!("unable to verify role without `context_id`"));
    }

    let query = RecordsQueryBuilder::new()
        .method(None)
        .add_filter(
            RecordsFilter::new()
                .protocol(protocol)
                .protocol_path(protocol_role)
                .add_recipient(author),
        )
        .build();
    let (entries, _) = store.query(owner, &query).await?;
    if entries.is_empty() {
        return Err(forbidden!("unable to find role record for {protocol_role}"));
    }

    Ok(())
}

// Verify write record adheres to the $size constraint.
fn verify_size_limit(data_size: u64, rule_set: &RuleSet) -> Result<()> {
    let Some(range) = &rule_set.size else {
        return Ok(());
    };
    if let Some(min) = range.min {
        if data_size < min {
            return Err(forbidden!("data size is less than allowed"));
        }
    }
    if let Some(max) = range.max {
        if data_size > max {
            return Err(forbidden!("data size is greater than allowed"));
        }
    }
    Ok(())
}

fn verify_tags(tags: Option<&Map<String, Value>>, rule_set: &RuleSet) -> Result<()> {
    let Some(rule_set_tags) = &rule_set.tags else {
        return Ok(());
    };

    let additional_properties = rule_set_tags.allow_undefined_tags.unwrap_or_default();
    let required = rule_set_tags.required_tags.clone().unwrap_or_default();
    let properties = &rule_set_tags.undefined_tags;

    let schema = json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": additional_properties,
    });

    let instance = serde_json::to_value(tags)?;
    if !jsonschema::is_valid(&schema, &instance) {
        return Err(forbidden!("tags do not match schema"));
    }

    Ok(())
}

// Actions a write may be authorized under, based on whether it is the
// initial write or an update, and whether its author matches the initial
// write's.
async fn allowed_write_actions(
    owner: &str, write: &Write, store: &impl MessageStore,
) -> Result<Vec<Action>> {
    if write.is_initial()? {
        return Ok(vec![Action::Create]);
    }
    let Some(initial) = write::initial_write(owner, &write.record_id, store).await? else {
        return Ok(vec![]);
    };
    if write.authorization.author()? == initial.authorization.author()? {
        return Ok(vec![Action::CoUpdate, Action::Update]);
    }
    Ok(vec![Action::CoUpdate])
}

// Finds an action rule in `rule_set` authorizing `author` (or its invoked
// role) for one of `allowed`, either directly by actor/role or via
// `check_actor` against the ancestor named in the rule's `of`.
fn check_action_rules(
    author: &str, invoked_role: Option<&str>, allowed: &[Action], rule_set: &RuleSet,
    record_chain: &[Write], recipient_of: Option<&str>,
) -> Result<()> {
    let Some(action_rules) = &rule_set.actions else {
        return Err(forbidden!("no action rule defined, {author} is unauthorized"));
    };

    for rule in action_rules {
        if !rule.can.iter().any(|action| allowed.contains(action)) {
            continue;
        }
        if rule.who == Some(Actor::Anyone) {
            return Ok(());
        }

        if let Some(invoked) = invoked_role {
            if rule.role.as_deref() == Some(invoked) {
                return Ok(());
            }
            continue;
        }

        if rule.who == Some(Actor::Recipient) && rule.of.is_none() {
            if recipient_of == Some(author) {
                return Ok(());
            }
            continue;
        }

        if check_actor(author, rule, record_chain)? {
            return Ok(());
        }
    }

    Err(forbidden!("action not allowed for {author}"))
}

// Checks a match with `action_rule.who`/`of` in the record chain.
fn check_actor(author: &str, action_rule: &ActionRule, record_chain: &[Write]) -> Result<bool> {
    let ancestor =
        record_chain.iter().find(|write| write.descriptor.protocol_path == action_rule.of);
    let Some(ancestor) = ancestor else {
        return Ok(false);
    };
    if action_rule.who == Some(Actor::Recipient) {
        return Ok(Some(author.to_owned()) == ancestor.descriptor.recipient);
    }
    Ok(author == ancestor.authorization.author()?)
}

// Fetches the protocol definition for the protocol specified in the
// message, or the built-in permissions protocol definition for the
// first-class protocol.
async fn protocol_definition(
    owner: &str, protocol_uri: &str, store: &impl MessageStore,
) -> Result<Definition> {
    let protocol_uri = utils::clean_url(protocol_uri)?;
    if protocol_uri == protocols::PROTOCOL_URI {
        return Ok(Definition::default());
    }

    let query = ProtocolsQuery { protocol: Some(protocol_uri.clone()) }.into();
    let (entries, _) = store.query(owner, &query).await?;
    let Some(entry) = entries.first() else {
        return Err(unexpected!("unable to find protocol definition for {protocol_uri}"));
    };
    let Some(configure) = entry.as_configure() else {
        return Err(unexpected!("unexpected message type"));
    };

    Ok(configure.descriptor.definition.clone())
}

// Constructs the chain of existing initial writes from the root record
// down to (and including) `record_id`.
async fn record_chain(
    owner: &str, record_id: &str, store: &impl MessageStore,
) -> Result<Vec<Write>> {
    let mut chain = vec![];
    let mut current_id = Some(record_id.to_owned());

    while let Some(record_id) = &current_id {
        let Some(initial) = write::initial_write(owner, record_id, store).await? else {
            return Err(unexpected!("no parent found with ID {record_id} when constructing record chain"));
        };
        chain.push(initial.clone());
        current_id.clone_from(&initial.descriptor.parent_id);
    }

    chain.reverse();
    Ok(chain)
}
