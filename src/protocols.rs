//! # Protocols Interface
//!
//! [`configure`] registers a protocol definition — the types, nesting, and
//! action rules that govern every record written under that protocol — and
//! [`query`] fetches definitions back out. Every record that declares a
//! `protocol` is validated and authorized against the matching definition by
//! [`crate::records::protocol::Authorizer`].

pub mod configure;
pub mod query;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vercre_infosec::jose::jwk::PublicKeyJwk;

pub use self::configure::{Configure, ConfigureBuilder, ConfigureDescriptor};
pub use self::query::{Query, QueryBuilder, QueryDescriptor, QueryReply};
use crate::{Result, bad_request, utils};

/// The first-class protocol every tenant has configured implicitly: the
/// permissions protocol that grants/requests/revocations themselves are
/// written under.
pub const PROTOCOL_URI: &str = "https://vercre.website/dwn/permissions";

/// A protocol definition: named record types nested under a `structure` of
/// path-keyed rule sets.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// The protocol's URI.
    pub protocol: String,
    /// Whether the definition itself may be returned by an unauthorized
    /// `ProtocolsQuery`.
    pub published: bool,
    /// Record types the protocol declares.
    pub types: BTreeMap<String, ProtocolType>,
    /// Path-keyed, recursively nested action rules.
    pub structure: BTreeMap<String, RuleSet>,
}

/// A record type declared by a [`Definition`].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolType {
    /// The schema URI records of this type must declare.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Media types records of this type may declare.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_formats: Option<Vec<String>>,
}

/// The set of rules governing records at a protocol path, recursively
/// nesting a rule set per child type.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RuleSet {
    /// Path-encryption configuration for this protocol path.
    #[serde(rename = "$encryption", skip_serializing_if = "Option::is_none")]
    pub encryption: Option<PathEncryption>,
    /// Action rules governing who may act on records at this path.
    #[serde(rename = "$actions", skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionRule>>,
    /// Whether records at this path are role records.
    #[serde(rename = "$role", skip_serializing_if = "Option::is_none")]
    pub role: Option<bool>,
    /// Byte-size bounds for records at this path.
    #[serde(rename = "$size", skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeRange>,
    /// Tag constraints for records at this path.
    #[serde(rename = "$tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Nested rule sets, keyed by child type name.
    #[serde(flatten)]
    pub nested: BTreeMap<String, RuleSet>,
}

/// Inclusive byte-size bounds.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct SizeRange {
    /// Minimum size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    /// Maximum size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

/// Encryption configuration for a protocol path.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEncryption {
    /// The ID of the root key deriving this path's encryption public key.
    pub root_key_id: String,
    /// The public key used to encrypt the record's symmetric data key.
    pub public_key_jwk: PublicKeyJwk,
}

/// Tag constraints declared on a rule set.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tags {
    /// Tag names every record at this path must set.
    #[serde(rename = "$requiredTags", skip_serializing_if = "Option::is_none")]
    pub required_tags: Option<Vec<String>>,
    /// Whether tags outside `undefined_tags`'s keys are permitted.
    #[serde(rename = "$allowUndefinedTags", skip_serializing_if = "Option::is_none")]
    pub allow_undefined_tags: Option<bool>,
    /// JSON Schema fragments for tags declared by name.
    #[serde(flatten)]
    pub undefined_tags: BTreeMap<String, serde_json::Value>,
}

/// A single action rule: who may do what at a protocol path.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRule {
    /// The actor category this rule applies to. Mutually exclusive with
    /// `role`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who: Option<Actor>,
    /// The protocol path of the role record this rule applies to. Mutually
    /// exclusive with `who`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// The protocol path `who` refers to; required when `who` is `Author`
    /// or `Recipient`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub of: Option<String>,
    /// Actions the actor/role may perform.
    pub can: Vec<Action>,
}

/// Who an [`ActionRule`] applies to.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Actor {
    /// Any author.
    #[default]
    Anyone,
    /// The author of the record named by `of`.
    Author,
    /// The recipient of the record named by `of`.
    Recipient,
}

/// An action an [`ActionRule`] may grant.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Create a new record.
    Create,
    /// Delete a record, without deleting its descendants.
    Delete,
    /// Delete a record and every descendant.
    Prune,
    /// Query for records.
    Query,
    /// Subscribe to records.
    Subscribe,
    /// Read a record.
    #[default]
    Read,
    /// Update an existing record.
    Update,
    /// Delete a record authored by someone else, as its recipient.
    #[serde(rename = "co-delete")]
    CoDelete,
    /// Prune a record authored by someone else, as its recipient.
    #[serde(rename = "co-prune")]
    CoPrune,
    /// Update a record authored by someone else, as its recipient.
    #[serde(rename = "co-update")]
    CoUpdate,
}

/// Validates `definition`'s rule-set structure: size bounds are sane, role
/// paths resolve, actor/role action rules are internally consistent, and
/// nested rule sets only reference declared types.
///
/// # Errors
/// Returns an error describing the first structural violation found.
pub fn validate_structure(definition: &Definition) -> Result<()> {
    let type_names: Vec<&String> = definition.types.keys().collect();
    for rule_set in definition.structure.values() {
        let roles = role_paths(String::new(), rule_set);
        verify_rule_set(rule_set, &String::new(), &type_names, &roles)?;
    }
    Ok(())
}

fn verify_rule_set(
    rule_set: &RuleSet, protocol_path: &str, types: &[&String], roles: &[String],
) -> Result<()> {
    if let Some(size) = &rule_set.size {
        if let (Some(min), Some(max)) = (size.min, size.max) {
            if min > max {
                return Err(bad_request!("invalid size range at '{protocol_path}'"));
            }
        }
    }

    let actions = rule_set.actions.as_deref().unwrap_or_default();
    for (i, action) in actions.iter().enumerate() {
        if let Some(role) = &action.role {
            if !roles.contains(role) {
                return Err(bad_request!("missing role {role} in action for {protocol_path}"));
            }
            let read_like = [Action::Read, Action::Query, Action::Subscribe];
            if !read_like.iter().all(|a| action.can.contains(a)) {
                return Err(bad_request!(
                    "role {role} missing read-like action(s) for {protocol_path}"
                ));
            }
        }

        if action.who == Some(Actor::Anyone) && action.of.is_some() {
            return Err(bad_request!("`of` must not be set when `who` is 'anyone'"));
        }
        if action.who == Some(Actor::Author) && action.of.is_none() {
            return Err(bad_request!("`of` must be set when `who` is 'author'"));
        }
        if action.can.contains(&Action::Update) && !action.can.contains(&Action::Create) {
            return Err(bad_request!("action rule contains 'update' but no 'create'"));
        }
        if action.can.contains(&Action::Delete) && !action.can.contains(&Action::Create) {
            return Err(bad_request!("action rule contains 'delete' but no 'create'"));
        }

        for other in &actions[i + 1..] {
            if action.who.is_some() {
                if action.who == other.who && action.of == other.of {
                    return Err(bad_request!(
                        "more than one action rule for the same actor at {protocol_path}"
                    ));
                }
            } else if action.role.is_some() && action.role == other.role {
                return Err(bad_request!(
                    "more than one action rule for the same role at {protocol_path}"
                ));
            }
        }
    }

    for (name, nested) in &rule_set.nested {
        if !types.contains(&name) {
            return Err(bad_request!("rule set {name} is not a declared type"));
        }
        let path = if protocol_path.is_empty() {
            name.clone()
        } else {
            format!("{protocol_path}/{name}")
        };
        verify_rule_set(nested, &path, types, roles)?;
    }

    Ok(())
}

fn role_paths(protocol_path: String, rule_set: &RuleSet) -> Vec<String> {
    let mut roles = Vec::new();
    for (name, nested) in &rule_set.nested {
        let path =
            if protocol_path.is_empty() { name.clone() } else { format!("{protocol_path}/{name}") };
        if nested.role.unwrap_or_default() {
            roles.push(path);
        } else {
            roles.extend(role_paths(path, nested));
        }
    }
    roles
}

/// Looks up the rule set governing `protocol_path` within `structure`,
/// descending one path segment at a time.
#[must_use]
pub fn rule_set<'a>(protocol_path: &str, structure: &'a BTreeMap<String, RuleSet>) -> Option<&'a RuleSet> {
    let (head, rest) = protocol_path.split_once('/').unwrap_or((protocol_path, ""));
    let set = structure.get(head)?;
    if rest.is_empty() { Some(set) } else { rule_set(rest, &set.nested) }
}

pub(crate) fn normalize_definition(definition: &mut Definition) -> Result<()> {
    definition.protocol = utils::clean_url(&definition.protocol)?;
    for t in definition.types.values_mut() {
        if let Some(schema) = &t.schema {
            t.schema = Some(utils::clean_url(schema)?);
        }
    }
    Ok(())
}
