//! IONOS resource model.
//!
//! Unique responsibility: describe every supported resource kind as a static,
//! immutable [`KindSpec`] (where it lives, how it is identified, which fields
//! may change in place and which force a replace) and hold the two data shapes
//! the reconciler works on:
//! - [`Resource`]: a resource as reported by the API,
//! - [`ParamSet`]: the desired state supplied by the caller.
//!
//! Field access is explicit: identity values are read through [`IdentityField`]
//! and desired values through [`FieldSpec`], never by walking arbitrary paths.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// API family a resource kind belongs to (each has its own base URL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFamily {
    /// Cloud API (compute, network, storage, managed Kubernetes).
    Compute,
    /// Cloud DNS API.
    Dns,
    /// Container Registry API.
    ContainerRegistry,
}

/// All resource kinds the reconciler knows how to manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual data center.
    Datacenter,
    /// Server inside a data center.
    Server,
    /// Block storage volume inside a data center.
    Volume,
    /// LAN inside a data center.
    Lan,
    /// Managed Kubernetes cluster.
    K8sCluster,
    /// Node pool of a managed Kubernetes cluster.
    K8sNodepool,
    /// DNS zone.
    DnsZone,
    /// Record inside a DNS zone.
    DnsRecord,
    /// Container registry.
    Registry,
}

impl ResourceKind {
    /// Every supported kind, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Datacenter,
        Self::Server,
        Self::Volume,
        Self::Lan,
        Self::K8sCluster,
        Self::K8sNodepool,
        Self::DnsZone,
        Self::DnsRecord,
        Self::Registry,
    ];

    /// Stable snake_case name used on the command line and in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Datacenter => "datacenter",
            Self::Server => "server",
            Self::Volume => "volume",
            Self::Lan => "lan",
            Self::K8sCluster => "k8s_cluster",
            Self::K8sNodepool => "k8s_nodepool",
            Self::DnsZone => "dns_zone",
            Self::DnsRecord => "dns_record",
            Self::Registry => "registry",
        }
    }

    /// Static description of this kind.
    #[must_use]
    pub const fn spec(self) -> &'static KindSpec {
        match self {
            Self::Datacenter => &DATACENTER,
            Self::Server => &SERVER,
            Self::Volume => &VOLUME,
            Self::Lan => &LAN,
            Self::K8sCluster => &K8S_CLUSTER,
            Self::K8sNodepool => &K8S_NODEPOOL,
            Self::DnsZone => &DNS_ZONE,
            Self::DnsRecord => &DNS_RECORD,
            Self::Registry => &REGISTRY,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Field whose value contributes to a resource's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    /// The API-assigned id.
    Id,
    /// `properties.name`.
    Name,
    /// `properties.zoneName` (DNS zones).
    ZoneName,
}

impl IdentityField {
    /// Read this identity value from a resource.
    #[must_use]
    pub fn value<'a>(self, resource: &'a Resource) -> Option<&'a str> {
        match self {
            Self::Id => Some(resource.id.as_str()),
            Self::Name => resource.property_str("name"),
            Self::ZoneName => resource.property_str("zoneName"),
        }
    }
}

/// How a change to a field can be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Mutable in place.
    Update,
    /// Immutable: any difference requires delete + recreate.
    Replace,
    /// Numeric field that may only grow in place; shrinking requires a replace.
    GrowOnly,
}

/// JSON type a parameter value takes in the API payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Kept verbatim, even when it looks like a number (`1.30`, `007`).
    Text,
    /// Whole number.
    Integer,
    /// `true` / `false`.
    Bool,
    /// Arbitrary JSON (objects, arrays).
    Json,
    /// Id or name of another resource, sent as that resource's id.
    Reference(ResourceKind),
}

/// Textual value that does not fit a field's [`ValueType`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {raw:?} for '{param}': expected {expected}")]
pub struct InvalidValue {
    /// Parameter name.
    pub param: &'static str,
    /// Value as supplied.
    pub raw: String,
    /// What was expected.
    pub expected: &'static str,
}

/// Condition under which a field takes part in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCondition {
    /// Always compared.
    Always,
    /// Only compared when the effective `type` (desired, else existing) is one of these.
    TypeIn(&'static [&'static str]),
}

/// A desired-state parameter and the API property it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Parameter name as supplied by the caller (snake_case).
    pub param: &'static str,
    /// Property name in the API payload (camelCase).
    pub property: &'static str,
    /// Change policy.
    pub policy: FieldPolicy,
    /// Payload type.
    pub value: ValueType,
    /// When the field is compared.
    pub condition: FieldCondition,
}

const fn field(
    param: &'static str,
    property: &'static str,
    policy: FieldPolicy,
    value: ValueType,
) -> FieldSpec {
    FieldSpec {
        param,
        property,
        policy,
        value,
        condition: FieldCondition::Always,
    }
}

impl FieldSpec {
    const fn when_type_in(mut self, types: &'static [&'static str]) -> Self {
        self.condition = FieldCondition::TypeIn(types);
        self
    }

    /// Convert a textual value (e.g. from the command line) to this field's payload type.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] if the text cannot represent the field's type.
    pub fn coerce(&self, raw: &str) -> Result<Value, InvalidValue> {
        let invalid = |expected| InvalidValue {
            param: self.param,
            raw: raw.to_string(),
            expected,
        };
        match self.value {
            ValueType::Text | ValueType::Reference(_) => Ok(Value::String(raw.to_string())),
            ValueType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("an integer")),
            ValueType::Bool => match raw.trim().to_lowercase().as_str() {
                "true" | "yes" => Ok(Value::Bool(true)),
                "false" | "no" => Ok(Value::Bool(false)),
                _ => Err(invalid("true or false")),
            },
            ValueType::Json => serde_json::from_str(raw).map_err(|_| invalid("a JSON value")),
        }
    }

    /// Whether this field is compared for the given existing and desired state.
    #[must_use]
    pub fn applies(&self, existing: &Resource, desired: &ParamSet) -> bool {
        match self.condition {
            FieldCondition::Always => true,
            FieldCondition::TypeIn(types) => desired
                .get("type")
                .and_then(Value::as_str)
                .or_else(|| existing.property_str("type"))
                .is_some_and(|t| types.iter().any(|candidate| t.eq_ignore_ascii_case(candidate))),
        }
    }
}

/// A parent resource that scopes a collection (e.g. the data center of a volume).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentScope {
    /// Parameter carrying the parent's identifier; also the path placeholder.
    pub param: &'static str,
    /// Kind of the parent resource.
    pub kind: ResourceKind,
}

/// How completion of a mutation is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Poll the request handle from the `Location` header.
    RequestStatus,
    /// Poll the resource until `metadata.state` equals the given value.
    State(&'static str),
}

/// HTTP verb used for in-place updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    /// Partial update with only the changed properties.
    Patch,
    /// Full update with existing properties overlaid by the desired ones.
    Put,
}

/// Static, immutable description of one resource kind.
#[derive(Debug)]
pub struct KindSpec {
    /// The kind described.
    pub kind: ResourceKind,
    /// API family serving this kind.
    pub api: ApiFamily,
    /// Collection path template, `{param}` placeholders are parent ids.
    pub collection: &'static str,
    /// Parents that must be resolved before the collection can be listed.
    pub parents: &'static [ParentScope],
    /// Ordered identity fields checked by the resolver.
    pub identity: &'static [IdentityField],
    /// Managed fields.
    pub fields: &'static [FieldSpec],
    /// Completion check for mutations.
    pub wait: WaitMode,
    /// Update verb.
    pub update: UpdateMethod,
    /// Key under which a single resource is returned.
    pub returned_key: &'static str,
    /// Key under which a resource list is returned.
    pub plural_key: &'static str,
}

use FieldPolicy::{GrowOnly, Replace, Update};
use ValueType::{Bool, Integer, Json, Reference, Text};

const ID_AND_NAME: &[IdentityField] = &[IdentityField::Id, IdentityField::Name];

const DATACENTER_PARENT: &[ParentScope] = &[ParentScope {
    param: "datacenter",
    kind: ResourceKind::Datacenter,
}];

static DATACENTER: KindSpec = KindSpec {
    kind: ResourceKind::Datacenter,
    api: ApiFamily::Compute,
    collection: "/datacenters",
    parents: &[],
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Update, Text),
        field("description", "description", Update, Text),
        field("location", "location", Replace, Text),
    ],
    wait: WaitMode::RequestStatus,
    update: UpdateMethod::Patch,
    returned_key: "datacenter",
    plural_key: "datacenters",
};

static SERVER: KindSpec = KindSpec {
    kind: ResourceKind::Server,
    api: ApiFamily::Compute,
    collection: "/datacenters/{datacenter}/servers",
    parents: DATACENTER_PARENT,
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Update, Text),
        field("cores", "cores", Update, Integer),
        field("ram", "ram", Update, Integer),
        field("cpu_family", "cpuFamily", Update, Text),
        field("availability_zone", "availabilityZone", Replace, Text),
    ],
    wait: WaitMode::RequestStatus,
    update: UpdateMethod::Patch,
    returned_key: "server",
    plural_key: "servers",
};

static VOLUME: KindSpec = KindSpec {
    kind: ResourceKind::Volume,
    api: ApiFamily::Compute,
    collection: "/datacenters/{datacenter}/volumes",
    parents: DATACENTER_PARENT,
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Update, Text),
        field("size", "size", GrowOnly, Integer),
        field("bus", "bus", Update, Text),
        field("disk_type", "type", Replace, Text),
        field("availability_zone", "availabilityZone", Replace, Text),
        field("image", "image", Replace, Text),
        field("image_alias", "imageAlias", Replace, Text),
    ],
    wait: WaitMode::RequestStatus,
    update: UpdateMethod::Patch,
    returned_key: "volume",
    plural_key: "volumes",
};

static LAN: KindSpec = KindSpec {
    kind: ResourceKind::Lan,
    api: ApiFamily::Compute,
    collection: "/datacenters/{datacenter}/lans",
    parents: DATACENTER_PARENT,
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Update, Text),
        field("public", "public", Update, Bool),
        field("ipv6_cidr", "ipv6CidrBlock", Update, Text),
    ],
    wait: WaitMode::RequestStatus,
    update: UpdateMethod::Patch,
    returned_key: "lan",
    plural_key: "lans",
};

static K8S_CLUSTER: KindSpec = KindSpec {
    kind: ResourceKind::K8sCluster,
    api: ApiFamily::Compute,
    collection: "/k8s",
    parents: &[],
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Update, Text),
        field("k8s_version", "k8sVersion", Update, Text),
    ],
    wait: WaitMode::State("ACTIVE"),
    update: UpdateMethod::Put,
    returned_key: "cluster",
    plural_key: "clusters",
};

static K8S_NODEPOOL: KindSpec = KindSpec {
    kind: ResourceKind::K8sNodepool,
    api: ApiFamily::Compute,
    collection: "/k8s/{k8s_cluster}/nodepools",
    parents: &[ParentScope {
        param: "k8s_cluster",
        kind: ResourceKind::K8sCluster,
    }],
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Replace, Text),
        field(
            "datacenter",
            "datacenterId",
            Replace,
            Reference(ResourceKind::Datacenter),
        ),
        field("cpu_family", "cpuFamily", Replace, Text),
        field("cores_count", "coresCount", Replace, Integer),
        field("ram_size", "ramSize", Replace, Integer),
        field("availability_zone", "availabilityZone", Replace, Text),
        field("storage_type", "storageType", Replace, Text),
        field("storage_size", "storageSize", Replace, Integer),
        field("node_count", "nodeCount", Update, Integer),
        field("k8s_version", "k8sVersion", Update, Text),
        field("labels", "labels", Update, Json),
        field("annotations", "annotations", Update, Json),
    ],
    wait: WaitMode::State("ACTIVE"),
    update: UpdateMethod::Put,
    returned_key: "nodepool",
    plural_key: "nodepools",
};

static DNS_ZONE: KindSpec = KindSpec {
    kind: ResourceKind::DnsZone,
    api: ApiFamily::Dns,
    collection: "/zones",
    parents: &[],
    identity: &[IdentityField::Id, IdentityField::ZoneName],
    fields: &[
        field("name", "zoneName", Update, Text),
        field("description", "description", Update, Text),
        field("enabled", "enabled", Update, Bool),
    ],
    wait: WaitMode::State("AVAILABLE"),
    update: UpdateMethod::Put,
    returned_key: "zone",
    plural_key: "zones",
};

static DNS_RECORD: KindSpec = KindSpec {
    kind: ResourceKind::DnsRecord,
    api: ApiFamily::Dns,
    collection: "/zones/{dns_zone}/records",
    parents: &[ParentScope {
        param: "dns_zone",
        kind: ResourceKind::DnsZone,
    }],
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Replace, Text),
        field("type", "type", Update, Text),
        field("content", "content", Update, Text),
        field("ttl", "ttl", Update, Integer),
        field("priority", "priority", Update, Integer).when_type_in(&["MX", "SRV", "URI"]),
        field("enabled", "enabled", Update, Bool),
    ],
    wait: WaitMode::State("AVAILABLE"),
    update: UpdateMethod::Put,
    returned_key: "dns_record",
    plural_key: "dns_records",
};

static REGISTRY: KindSpec = KindSpec {
    kind: ResourceKind::Registry,
    api: ApiFamily::ContainerRegistry,
    collection: "/registries",
    parents: &[],
    identity: ID_AND_NAME,
    fields: &[
        field("name", "name", Replace, Text),
        field("location", "location", Replace, Text),
        field(
            "garbage_collection_schedule",
            "garbageCollectionSchedule",
            Update,
            Json,
        ),
        field("features", "features", Update, Json),
    ],
    wait: WaitMode::State("RUNNING"),
    update: UpdateMethod::Patch,
    returned_key: "registry",
    plural_key: "registries",
};

impl KindSpec {
    /// Look up a managed field by parameter name.
    #[must_use]
    pub fn field(&self, param: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.param == param)
    }

    /// Convert a textual value for `param` to its payload type.
    ///
    /// Unknown parameters are kept as strings; the reconciler rejects them later.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValue`] if the text cannot represent the field's type.
    pub fn coerce(&self, param: &str, raw: &str) -> Result<Value, InvalidValue> {
        self.field(param)
            .map_or_else(|| Ok(Value::String(raw.to_string())), |f| f.coerce(raw))
    }

    /// Render the collection path for the given resolved parent ids.
    ///
    /// Returns the name of the first parent whose id is missing on failure.
    ///
    /// # Errors
    ///
    /// Returns the parent parameter name if its id was not supplied.
    pub fn collection_path(&self, parent_ids: &ParentIds) -> Result<String, &'static str> {
        let mut path = self.collection.to_string();
        for parent in self.parents {
            let id = parent_ids.get(parent.param).ok_or(parent.param)?;
            path = path.replace(&format!("{{{}}}", parent.param), id);
        }
        Ok(path)
    }

    /// Map desired parameters to API properties, skipping nulls.
    #[must_use]
    pub fn properties_from(&self, desired: &ParamSet) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| desired.get(f.param).map(|v| (f.property.to_string(), v.clone())))
            .collect()
    }

    /// Known properties of `existing`, overlaid with non-null desired values.
    #[must_use]
    pub fn merged_properties(&self, existing: &Resource, desired: &ParamSet) -> Map<String, Value> {
        let mut merged: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|f| {
                existing
                    .properties
                    .get(f.property)
                    .filter(|v| !v.is_null())
                    .map(|v| (f.property.to_string(), v.clone()))
            })
            .collect();
        merged.extend(self.properties_from(desired));
        merged
    }
}

/// Resolved parent ids keyed by parent parameter name.
pub type ParentIds = BTreeMap<String, String>;

/// Resource metadata (only the lifecycle state is interpreted).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Lifecycle state (e.g. `AVAILABLE`, `BUSY`, `ACTIVE`, `FAILED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Remaining metadata, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A resource as reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Immutable id assigned by the API.
    pub id: String,
    /// Lifecycle metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
    /// Resource properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Remaining top-level fields (`type`, `href`, `entities`, ...), preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    /// Build a resource from an id and a property list (mostly useful in tests).
    #[must_use]
    pub fn new(id: impl Into<String>, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            metadata: None,
            properties,
            extra: Map::new(),
        }
    }

    /// Read a property as a string.
    #[must_use]
    pub fn property_str(&self, property: &str) -> Option<&str> {
        self.properties.get(property).and_then(Value::as_str)
    }

    /// Lifecycle state, if reported.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.state.as_deref())
    }
}

/// Desired state: a flat set of parameter values.
///
/// A missing or `null` value means "leave unchanged" on update and
/// "use the API default" on create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet(BTreeMap<String, Value>);

impl ParamSet {
    /// Create an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(param, value);
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, param: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(param.into(), value.into());
    }

    /// Non-null value of a parameter.
    #[must_use]
    pub fn get(&self, param: &str) -> Option<&Value> {
        self.0.get(param).filter(|v| !v.is_null())
    }

    /// Parameter names (including null ones).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
