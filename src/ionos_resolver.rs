//! Identity resolution.
//!
//! Unique responsibility: given an already fetched list of resources and a
//! user-supplied identifier (id or name), find at most one match.
//!
//! Rules:
//! - zero matches: `Ok(None)`, the caller decides whether that is fatal,
//! - one match: `Ok(Some(resource))`,
//! - more than one match: [`AmbiguousIdentifier`], never an arbitrary pick.
//!
//! Also hosts the `key=value` filters applied to listings.

use serde_json::Value;
use thiserror::Error;

use crate::ionos_resource::{IdentityField, KindSpec, Resource, ResourceKind};

/// More than one resource matched an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("found {matches} resources of type {kind} for '{identifier}'")]
pub struct AmbiguousIdentifier {
    /// Kind that was searched.
    pub kind: ResourceKind,
    /// Identifier that was looked up.
    pub identifier: String,
    /// Number of matching resources.
    pub matches: usize,
}

/// Find the single resource whose identity tuple contains `identifier`.
///
/// # Errors
///
/// Returns [`AmbiguousIdentifier`] if more than one candidate matches.
pub fn resolve<'a>(
    kind: ResourceKind,
    candidates: &'a [Resource],
    identifier: &str,
    identity: &[IdentityField],
) -> Result<Option<&'a Resource>, AmbiguousIdentifier> {
    let mut matched = candidates
        .iter()
        .filter(|r| identity.iter().any(|f| f.value(r) == Some(identifier)));

    let Some(first) = matched.next() else {
        return Ok(None);
    };

    let extra = matched.count();
    if extra > 0 {
        return Err(AmbiguousIdentifier {
            kind,
            identifier: identifier.to_string(),
            matches: extra + 1,
        });
    }
    Ok(Some(first))
}

/// [`resolve`] using the kind's own identity fields.
///
/// # Errors
///
/// Returns [`AmbiguousIdentifier`] if more than one candidate matches.
pub fn resolve_in<'a>(
    spec: &KindSpec,
    candidates: &'a [Resource],
    identifier: &str,
) -> Result<Option<&'a Resource>, AmbiguousIdentifier> {
    resolve(spec.kind, candidates, identifier, spec.identity)
}

/// Where a filter looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKey {
    /// The resource id.
    Id,
    /// An API property (camelCase).
    Property(String),
}

/// A single `key=value` listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Field inspected.
    pub key: FilterKey,
    /// Expected value, compared against the field's textual form.
    pub value: String,
}

impl Filter {
    /// Parse `id=…`, `properties.<field>=…` or `<field>=…`.
    ///
    /// Parameter names of the kind (snake_case) are mapped to their API property.
    /// Returns `None` when the input has no `=`.
    #[must_use]
    pub fn parse(spec: &KindSpec, raw: &str) -> Option<Self> {
        let (key, value) = raw.split_once('=')?;
        let key = key.trim();
        let key = if key == "id" {
            FilterKey::Id
        } else {
            let name = key.strip_prefix("properties.").unwrap_or(key);
            let property = spec.field(name).map_or(name, |f| f.property);
            FilterKey::Property(property.to_string())
        };
        Some(Self {
            key,
            value: value.trim().to_string(),
        })
    }

    /// Check one resource against this filter.
    #[must_use]
    pub fn matches(&self, resource: &Resource) -> bool {
        match &self.key {
            FilterKey::Id => resource.id == self.value,
            FilterKey::Property(p) => match resource.properties.get(p) {
                Some(Value::String(s)) => *s == self.value,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == self.value,
            },
        }
    }
}

/// Keep only the resources matching every filter.
#[must_use]
pub fn apply_filters(resources: Vec<Resource>, filters: &[Filter]) -> Vec<Resource> {
    if filters.is_empty() {
        return resources;
    }
    resources
        .into_iter()
        .filter(|r| filters.iter().all(|f| f.matches(r)))
        .collect()
}
