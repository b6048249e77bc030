//! Diff classification.
//!
//! Unique responsibility: compare an existing resource with the desired
//! parameters and decide what has to happen: nothing, an in-place update, or a
//! replace (delete + recreate).
//!
//! The decision is deterministic and purely data-driven by the kind's
//! [`FieldSpec`] policies:
//! - a differing `Replace` field forces a replace,
//! - a shrinking `GrowOnly` field forces a replace, growth is an update,
//! - a differing `Update` field is an update,
//! - null / absent desired values never count as a difference,
//! - a field whose condition does not hold (e.g. `priority` on an `A` record) is ignored.

use std::cmp::Ordering;

use serde_json::Value;
use thiserror::Error;

use crate::ionos_resource::{FieldPolicy, FieldSpec, KindSpec, ParamSet, Resource, ResourceKind};

/// Planned action for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    /// Existing state already matches.
    Noop,
    /// Apply the listed parameters in place.
    Update {
        /// Parameters whose value changes.
        fields: Vec<&'static str>,
    },
    /// Delete and recreate because of the listed parameters.
    Replace {
        /// Parameters that cannot be changed in place.
        fields: Vec<&'static str>,
    },
}

impl PlannedAction {
    /// Refuse a replace unless the caller allowed it.
    ///
    /// # Errors
    ///
    /// Returns [`ReplaceForbidden`] for a `Replace` plan when `allow_replace` is false.
    pub fn permit(self, kind: ResourceKind, allow_replace: bool) -> Result<Self, ReplaceForbidden> {
        match self {
            Self::Replace { fields } if !allow_replace => Err(ReplaceForbidden { kind, fields }),
            other => Ok(other),
        }
    }
}

/// A replace was required but not allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} should be replaced (changed: {}) but allow_replace is set to false", .fields.join(", "))]
pub struct ReplaceForbidden {
    /// Kind that would have been replaced.
    pub kind: ResourceKind,
    /// Parameters that required the replace.
    pub fields: Vec<&'static str>,
}

/// Classify the change needed to move `existing` to `desired`.
#[must_use]
pub fn classify(spec: &KindSpec, existing: &Resource, desired: &ParamSet) -> PlannedAction {
    let mut replace = Vec::new();
    let mut update = Vec::new();

    for field in spec.fields {
        let Some(wanted) = desired.get(field.param) else {
            continue;
        };
        if !field.applies(existing, desired) {
            continue;
        }
        let current = existing.properties.get(field.property).unwrap_or(&Value::Null);
        match change_for(field, current, wanted) {
            Change::None => {}
            Change::InPlace => update.push(field.param),
            Change::Destructive => replace.push(field.param),
        }
    }

    if !replace.is_empty() {
        PlannedAction::Replace { fields: replace }
    } else if !update.is_empty() {
        PlannedAction::Update { fields: update }
    } else {
        PlannedAction::Noop
    }
}

enum Change {
    None,
    InPlace,
    Destructive,
}

fn change_for(field: &FieldSpec, current: &Value, wanted: &Value) -> Change {
    if values_equal(current, wanted) {
        return Change::None;
    }
    match field.policy {
        FieldPolicy::Update => Change::InPlace,
        FieldPolicy::Replace => Change::Destructive,
        FieldPolicy::GrowOnly => match compare_numbers(current, wanted) {
            Some(Ordering::Less) => Change::InPlace,
            // Shrinking, or not comparable as numbers.
            _ => Change::Destructive,
        },
    }
}

fn compare_numbers(current: &Value, wanted: &Value) -> Option<Ordering> {
    current.as_f64()?.partial_cmp(&wanted.as_f64()?)
}

/// Semantic equality: numbers compare by value, arrays ignore order.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut xs: Vec<String> = x.iter().map(Value::to_string).collect();
            let mut ys: Vec<String> = y.iter().map(Value::to_string).collect();
            xs.sort_unstable();
            ys.sort_unstable();
            xs == ys
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn volume(size: u64, disk_type: &str) -> Resource {
        Resource::new(
            "v-1",
            json!({"name": "data", "size": size, "type": disk_type, "bus": "VIRTIO"}),
        )
    }

    #[test]
    fn identical_state_is_noop() {
        let spec = ResourceKind::Volume.spec();
        let desired = ParamSet::new()
            .with("name", "data")
            .with("size", 10)
            .with("disk_type", "HDD");
        assert_eq!(classify(spec, &volume(10, "HDD"), &desired), PlannedAction::Noop);
    }

    #[test]
    fn empty_or_null_desired_state_is_noop() {
        let spec = ResourceKind::Volume.spec();
        assert_eq!(classify(spec, &volume(10, "HDD"), &ParamSet::new()), PlannedAction::Noop);
        let nulls = ParamSet::new().with("size", Value::Null).with("disk_type", Value::Null);
        assert_eq!(classify(spec, &volume(10, "HDD"), &nulls), PlannedAction::Noop);
    }

    #[test]
    fn growing_a_volume_is_an_update() {
        let spec = ResourceKind::Volume.spec();
        let desired = ParamSet::new().with("size", 20);
        assert_eq!(
            classify(spec, &volume(10, "HDD"), &desired),
            PlannedAction::Update { fields: vec!["size"] }
        );
    }

    #[test]
    fn shrinking_a_volume_is_a_replace() {
        let spec = ResourceKind::Volume.spec();
        let desired = ParamSet::new().with("size", 5);
        assert_eq!(
            classify(spec, &volume(10, "HDD"), &desired),
            PlannedAction::Replace { fields: vec!["size"] }
        );
    }

    #[test]
    fn replace_wins_over_update() {
        let spec = ResourceKind::Volume.spec();
        let desired = ParamSet::new().with("name", "renamed").with("disk_type", "SSD");
        assert_eq!(
            classify(spec, &volume(10, "HDD"), &desired),
            PlannedAction::Replace { fields: vec!["disk_type"] }
        );
    }

    #[test]
    fn numbers_compare_by_value() {
        let spec = ResourceKind::Server.spec();
        let existing = Resource::new("s-1", json!({"name": "web-01", "cores": 2, "ram": 2048}));
        let desired = ParamSet::new().with("cores", 2.0).with("ram", 2048);
        assert_eq!(classify(spec, &existing, &desired), PlannedAction::Noop);
    }

    #[test]
    fn missing_existing_property_counts_as_difference() {
        let spec = ResourceKind::Server.spec();
        let existing = Resource::new("s-1", json!({"name": "web-01"}));
        let desired = ParamSet::new().with("cpu_family", "INTEL_SKYLAKE");
        assert_eq!(
            classify(spec, &existing, &desired),
            PlannedAction::Update { fields: vec!["cpu_family"] }
        );
    }

    #[test]
    fn arrays_ignore_order_and_objects_compare_structurally() {
        let spec = ResourceKind::K8sNodepool.spec();
        let existing = Resource::new(
            "np-1",
            json!({"name": "pool", "labels": {"a": "1", "b": "2"}, "nodeCount": 3}),
        );
        let same = ParamSet::new().with("labels", json!({"b": "2", "a": "1"}));
        assert_eq!(classify(spec, &existing, &same), PlannedAction::Noop);

        assert!(values_equal(&json!(["x", "y"]), &json!(["y", "x"])));
        assert!(!values_equal(&json!(["x", "y"]), &json!(["x", "x"])));
    }

    fn record(properties: Value) -> Resource {
        Resource::new("r-1", properties)
    }

    #[test]
    fn record_type_change_is_an_update() {
        let spec = ResourceKind::DnsRecord.spec();
        let existing = record(json!({"name": "www", "type": "A", "content": "192.0.2.1"}));
        let desired = ParamSet::new().with("type", "AAAA").with("content", "2001:db8::1");
        assert_eq!(
            classify(spec, &existing, &desired),
            PlannedAction::Update { fields: vec!["type", "content"] }
        );
    }

    #[test]
    fn record_rename_is_a_replace() {
        let spec = ResourceKind::DnsRecord.spec();
        let existing = record(json!({"name": "www", "type": "A"}));
        let desired = ParamSet::new().with("name", "web").with("type", "AAAA");
        assert_eq!(
            classify(spec, &existing, &desired),
            PlannedAction::Replace { fields: vec!["name"] }
        );
    }

    #[test]
    fn priority_only_counts_for_mx_srv_and_uri() {
        let spec = ResourceKind::DnsRecord.spec();
        let a = record(json!({"name": "www", "type": "A", "content": "192.0.2.1", "priority": null}));
        let desired = ParamSet::new().with("content", "192.0.2.1").with("priority", 10);
        assert_eq!(classify(spec, &a, &desired), PlannedAction::Noop);

        let mx = record(json!({"name": "@", "type": "MX", "content": "mail", "priority": 20}));
        assert_eq!(
            classify(spec, &mx, &ParamSet::new().with("priority", 10)),
            PlannedAction::Update { fields: vec!["priority"] }
        );

        // The desired type wins over the existing one.
        let to_srv = ParamSet::new().with("type", "SRV").with("priority", 5);
        assert_eq!(
            classify(spec, &a, &to_srv),
            PlannedAction::Update { fields: vec!["type", "priority"] }
        );
    }

    #[test]
    fn version_strings_stay_equal_to_themselves() {
        let spec = ResourceKind::K8sCluster.spec();
        let existing = Resource::new("k-1", json!({"name": "prod", "k8sVersion": "1.30"}));
        let coerced = spec.coerce("k8s_version", "1.30").unwrap();
        let desired = ParamSet::new().with("k8s_version", coerced);
        assert_eq!(classify(spec, &existing, &desired), PlannedAction::Noop);
    }

    #[test]
    fn permit_gates_only_replace() {
        let replace = PlannedAction::Replace { fields: vec!["disk_type"] };
        let err = replace.clone().permit(ResourceKind::Volume, false).unwrap_err();
        assert_eq!(err.fields, vec!["disk_type"]);
        assert!(err.to_string().contains("allow_replace"));
        assert_eq!(replace.clone().permit(ResourceKind::Volume, true), Ok(replace));

        let update = PlannedAction::Update { fields: vec!["name"] };
        assert_eq!(update.clone().permit(ResourceKind::Volume, false), Ok(update));
    }
}
