//! Resource reconciler.
//!
//! High-level orchestration that drives one resource to its desired state.
//!
//! This module provides:
//! - [`Reconciler::run`]: resolve, classify, mutate and wait for one request
//! - [`ReconcileOutcome`]: the structured result printed by the CLI
//! - [`ReconcileError`]: every way a reconciliation can fail
//!
//! Per state:
//! - `present`: find by name, create if missing, otherwise no-op / update / replace
//! - `update`: find by identifier, refuse a rename onto another resource's name
//! - `absent`: find by identifier, delete and wait until the API answers 404
//! - `info`: list the collection and apply filters
//!
//! Reference fields (a node pool's `datacenter`) take a name or id and are
//! sent as the id of the resource they resolve to.
//!
//! A replace is create-then-delete and is not atomic: when the old resource
//! cannot be removed, [`ReconcileError::PartialReplaceFailure`] names both ids
//! and nothing is rolled back.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::ionos_client::{ApiError, IonosClient, Mutation, RequestStatus};
use crate::ionos_diff::{PlannedAction, ReplaceForbidden, classify};
use crate::ionos_resolver::{AmbiguousIdentifier, Filter, apply_filters, resolve_in};
use crate::ionos_resource::{
    KindSpec, ParamSet, ParentIds, Resource, ResourceKind, UpdateMethod, ValueType, WaitMode,
};
use crate::ionos_waiter::{Check, Presence, WaitError, WaitPolicy, wait_for};

/// Target state of a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DesiredState {
    /// Exists with the desired properties.
    #[default]
    Present,
    /// Does not exist.
    Absent,
    /// Existing resource gets the desired properties.
    Update,
    /// Read-only listing.
    Info,
}

impl DesiredState {
    /// Lowercase name as used on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Update => "update",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DesiredState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "update" => Ok(Self::Update),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "unknown state '{other}', expected present, absent, update or info"
            )),
        }
    }
}

/// Options shared by every reconciliation of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Target state.
    pub state: DesiredState,
    /// Wait for asynchronous operations to finish.
    pub wait: bool,
    /// Polling schedule and time budget for each wait.
    pub wait_policy: WaitPolicy,
    /// Permit delete + recreate when a change cannot be applied in place.
    pub allow_replace: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            state: DesiredState::Present,
            wait: true,
            wait_policy: WaitPolicy::default(),
            allow_replace: false,
        }
    }
}

/// One resource to reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileRequest {
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Name of the resource (lookup key for `present`, new name for `update`).
    pub name: Option<String>,
    /// Id or name of an existing resource (`update` / `absent`).
    pub identifier: Option<String>,
    /// Parent identifiers keyed by parent parameter (e.g. `datacenter`).
    pub parents: BTreeMap<String, String>,
    /// Desired properties.
    pub desired: ParamSet,
    /// Raw `key=value` filters for `info`.
    pub filters: Vec<String>,
}

impl ReconcileRequest {
    /// Empty request for a kind.
    #[must_use]
    pub const fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            name: None,
            identifier: None,
            parents: BTreeMap::new(),
            desired: ParamSet::new(),
            filters: Vec::new(),
        }
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the identifier.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Add a parent identifier.
    #[must_use]
    pub fn with_parent(mut self, param: impl Into<String>, identifier: impl Into<String>) -> Self {
        self.parents.insert(param.into(), identifier.into());
        self
    }

    /// Add a desired property.
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.desired.insert(param, value);
        self
    }

    /// Add a listing filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

/// Action reported in the result object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultAction {
    /// Created, replaced or already present.
    Create,
    /// Updated in place.
    Update,
    /// Deleted.
    Delete,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The resource exists in its desired state.
    Applied {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Whether anything was mutated.
        changed: bool,
        /// Reported action.
        action: ResultAction,
        /// Resource as last reported by the API.
        resource: Resource,
    },
    /// The resource was deleted.
    Deleted {
        /// Id of the deleted resource.
        id: String,
    },
    /// Nothing to do because the target does not exist.
    Unchanged,
    /// Listing result.
    Listed {
        /// Kind listed.
        kind: ResourceKind,
        /// Resources matching every filter.
        resources: Vec<Resource>,
    },
}

impl ReconcileOutcome {
    /// Whether the reconciliation mutated anything.
    #[must_use]
    pub const fn changed(&self) -> bool {
        match self {
            Self::Applied { changed, .. } => *changed,
            Self::Deleted { .. } => true,
            Self::Unchanged | Self::Listed { .. } => false,
        }
    }

    /// Render the result object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Applied {
                kind,
                changed,
                action,
                resource,
            } => {
                let mut out = Map::new();
                out.insert("changed".into(), Value::Bool(*changed));
                out.insert("failed".into(), Value::Bool(false));
                out.insert("action".into(), json!(action));
                out.insert(kind.spec().returned_key.into(), json!(resource));
                Value::Object(out)
            }
            Self::Deleted { id } => json!({
                "changed": true,
                "failed": false,
                "action": ResultAction::Delete,
                "id": id,
            }),
            Self::Unchanged => json!({"changed": false, "failed": false}),
            Self::Listed { kind, resources } => {
                let mut out = Map::new();
                out.insert("changed".into(), Value::Bool(false));
                out.insert("failed".into(), Value::Bool(false));
                out.insert(kind.spec().plural_key.into(), json!(resources));
                Value::Object(out)
            }
        }
    }
}

/// Drives resources to their desired state through an [`IonosClient`].
pub struct Reconciler {
    client: IonosClient,
    options: ReconcileOptions,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub const fn new(client: IonosClient, options: ReconcileOptions) -> Self {
        Self { client, options }
    }

    /// Options in use.
    #[must_use]
    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile one resource according to the configured state.
    ///
    /// # Errors
    ///
    /// Returns a [`ReconcileError`] naming the first failure; nothing after it
    /// is attempted.
    pub async fn run(&self, req: &ReconcileRequest) -> Result<ReconcileOutcome, ReconcileError> {
        let spec = req.kind.spec();
        validate(spec, req)?;

        let parent_ids = self.resolve_parents(spec, &req.parents).await?;
        let collection =
            spec.collection_path(&parent_ids)
                .map_err(|param| ReconcileError::MissingParameter {
                    kind: spec.kind,
                    param,
                })?;

        match self.options.state {
            DesiredState::Present => self.present(spec, &collection, req).await,
            DesiredState::Update => self.update(spec, &collection, req).await,
            DesiredState::Absent => self.absent(spec, &collection, req).await,
            DesiredState::Info => self.info(spec, &collection, req).await,
        }
    }

    async fn present(
        &self,
        spec: &KindSpec,
        collection: &str,
        req: &ReconcileRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let name = req.name.as_deref().ok_or(ReconcileError::MissingParameter {
            kind: spec.kind,
            param: "name",
        })?;
        let mut desired = req.desired.clone();
        if desired.get("name").is_none() {
            desired.insert("name", name);
        }
        let desired = self.resolve_references(spec, desired).await?;

        let list = self.client.list(spec.api, collection).await?;
        match resolve_in(spec, &list, name)? {
            Some(existing) => self.converge(spec, collection, existing, &desired).await,
            None => {
                let resource = self.create(spec, collection, &desired).await?;
                Ok(ReconcileOutcome::Applied {
                    kind: spec.kind,
                    changed: true,
                    action: ResultAction::Create,
                    resource,
                })
            }
        }
    }

    async fn update(
        &self,
        spec: &KindSpec,
        collection: &str,
        req: &ReconcileRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let identifier = target_identifier(spec, req)?;
        let list = self.client.list(spec.api, collection).await?;

        let Some(existing) = resolve_in(spec, &list, identifier)? else {
            info!(kind = %spec.kind, identifier, "nothing to update");
            return Ok(ReconcileOutcome::Unchanged);
        };

        let mut desired = req.desired.clone();
        if let Some(name) = req.name.as_deref() {
            if let Some(other) = resolve_in(spec, &list, name)?
                && other.id != existing.id
            {
                return Err(ReconcileError::NameConflict {
                    kind: spec.kind,
                    name: name.to_string(),
                    existing_id: other.id.clone(),
                });
            }
            if desired.get("name").is_none() {
                desired.insert("name", name);
            }
        }
        let desired = self.resolve_references(spec, desired).await?;

        self.converge(spec, collection, existing, &desired).await
    }

    async fn absent(
        &self,
        spec: &KindSpec,
        collection: &str,
        req: &ReconcileRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let identifier = target_identifier(spec, req)?;
        let list = self.client.list(spec.api, collection).await?;

        let Some(existing) = resolve_in(spec, &list, identifier)? else {
            info!(kind = %spec.kind, identifier, "already absent");
            return Ok(ReconcileOutcome::Unchanged);
        };

        self.remove(spec, collection, &existing.id).await?;
        Ok(ReconcileOutcome::Deleted {
            id: existing.id.clone(),
        })
    }

    async fn info(
        &self,
        spec: &KindSpec,
        collection: &str,
        req: &ReconcileRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let filters = req
            .filters
            .iter()
            .map(|raw| {
                Filter::parse(spec, raw).ok_or_else(|| ReconcileError::InvalidParameter {
                    kind: spec.kind,
                    param: raw.clone(),
                    reason: "filters must look like key=value",
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let list = self.client.list(spec.api, collection).await?;
        Ok(ReconcileOutcome::Listed {
            kind: spec.kind,
            resources: apply_filters(list, &filters),
        })
    }

    /// Bring an existing resource to the desired state.
    async fn converge(
        &self,
        spec: &KindSpec,
        collection: &str,
        existing: &Resource,
        desired: &ParamSet,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let plan = classify(spec, existing, desired).permit(spec.kind, self.options.allow_replace)?;

        let (action, resource) = match plan {
            PlannedAction::Noop => {
                info!(kind = %spec.kind, id = %existing.id, "already in desired state");
                return Ok(ReconcileOutcome::Applied {
                    kind: spec.kind,
                    changed: false,
                    action: ResultAction::Create,
                    resource: existing.clone(),
                });
            }
            PlannedAction::Update { fields } => {
                let resource = self
                    .update_in_place(spec, collection, existing, desired, &fields)
                    .await?;
                (ResultAction::Update, resource)
            }
            PlannedAction::Replace { fields } => {
                warn!(
                    kind = %spec.kind,
                    id = %existing.id,
                    fields = %fields.join(","),
                    "replacing resource"
                );
                let resource = self.replace(spec, collection, existing, desired).await?;
                (ResultAction::Create, resource)
            }
        };

        Ok(ReconcileOutcome::Applied {
            kind: spec.kind,
            changed: true,
            action,
            resource,
        })
    }

    async fn create(
        &self,
        spec: &KindSpec,
        collection: &str,
        desired: &ParamSet,
    ) -> Result<Resource, ReconcileError> {
        let body = json!({ "properties": spec.properties_from(desired) });
        info!(kind = %spec.kind, "creating");
        let Mutation {
            resource,
            request_id,
        } = self.client.create(spec.api, collection, &body).await?;

        let Some(created) = resource else {
            return Err(ReconcileError::AcceptedWithoutResource {
                kind: spec.kind,
                request_id,
            });
        };
        self.settle(spec, collection, created, request_id).await
    }

    async fn update_in_place(
        &self,
        spec: &KindSpec,
        collection: &str,
        existing: &Resource,
        desired: &ParamSet,
        fields: &[&'static str],
    ) -> Result<Resource, ReconcileError> {
        let path = format!("{collection}/{}", existing.id);
        let body = match spec.update {
            UpdateMethod::Patch => {
                let changed: Map<String, Value> = fields
                    .iter()
                    .filter_map(|param| {
                        let field = spec.field(param)?;
                        let value = desired.get(param)?;
                        Some((field.property.to_string(), value.clone()))
                    })
                    .collect();
                Value::Object(changed)
            }
            UpdateMethod::Put => json!({ "properties": spec.merged_properties(existing, desired) }),
        };

        info!(kind = %spec.kind, id = %existing.id, fields = %fields.join(","), "updating");
        let Mutation {
            resource,
            request_id,
        } = self
            .client
            .update(spec.api, spec.update, &path, &body)
            .await?;

        // Without a body, report the existing resource with the desired values applied.
        let mut updated = resource.unwrap_or_else(|| {
            let mut overlay = existing.clone();
            overlay.properties.extend(spec.properties_from(desired));
            overlay
        });
        if updated.id.is_empty() {
            updated.id.clone_from(&existing.id);
        }
        self.settle(spec, collection, updated, request_id).await
    }

    async fn replace(
        &self,
        spec: &KindSpec,
        collection: &str,
        existing: &Resource,
        desired: &ParamSet,
    ) -> Result<Resource, ReconcileError> {
        let merged = spec.merged_properties(existing, desired);
        let body = json!({ "properties": merged });

        info!(kind = %spec.kind, stale = %existing.id, "creating replacement");
        let Mutation {
            resource,
            request_id,
        } = self.client.create(spec.api, collection, &body).await?;
        let Some(created) = resource else {
            return Err(ReconcileError::AcceptedWithoutResource {
                kind: spec.kind,
                request_id,
            });
        };
        let created = self.settle(spec, collection, created, request_id).await?;

        if let Err(e) = self.remove(spec, collection, &existing.id).await {
            warn!(
                kind = %spec.kind,
                created = %created.id,
                stale = %existing.id,
                error = %e,
                "replacement created but old resource was not removed"
            );
            return Err(ReconcileError::PartialReplaceFailure {
                kind: spec.kind,
                created_id: created.id,
                stale_id: existing.id.clone(),
                source: Box::new(e),
            });
        }

        Ok(created)
    }

    async fn remove(
        &self,
        spec: &KindSpec,
        collection: &str,
        id: &str,
    ) -> Result<(), ReconcileError> {
        let path = format!("{collection}/{id}");
        info!(kind = %spec.kind, id, "deleting");

        match self.client.delete(spec.api, &path).await {
            Ok(_) => {}
            // Someone else already removed it.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if !self.options.wait {
            return Ok(());
        }

        let client = &self.client;
        let api = spec.api;
        let path = path.as_str();
        wait_for(
            &self.options.wait_policy,
            move || async move {
                Ok::<_, ApiError>(match client.get(api, path).await? {
                    Some(resource) => Presence::Present(resource),
                    None => Presence::Gone,
                })
            },
            |presence: &Presence<Resource>| match presence {
                Presence::Gone => Check::Done,
                Presence::Present(r) if is_failed_state(r) => {
                    Check::Failed(format!("resource {} reported state FAILED", r.id))
                }
                Presence::Present(_) => Check::Pending,
            },
        )
        .await
        .map_err(|e| wait_error(spec.kind, e))?;

        Ok(())
    }

    /// Wait for a create or update to finish and return the resulting resource.
    ///
    /// `reported` is what the mutation response described; it is returned as is
    /// when not waiting.
    async fn settle(
        &self,
        spec: &KindSpec,
        collection: &str,
        reported: Resource,
        request_id: Option<String>,
    ) -> Result<Resource, ReconcileError> {
        if !self.options.wait {
            return Ok(reported);
        }

        let client = &self.client;
        let api = spec.api;
        let path = format!("{collection}/{}", reported.id);
        let path = path.as_str();

        match spec.wait {
            WaitMode::RequestStatus => {
                let request_id = request_id.ok_or(ApiError::MissingRequestId)?;
                let request_id = request_id.as_str();
                wait_for(
                    &self.options.wait_policy,
                    move || client.request_status(request_id),
                    |status: &RequestStatus| {
                        if status.is_done() {
                            Check::Done
                        } else if status.is_failed() {
                            Check::Failed(
                                status
                                    .metadata
                                    .message
                                    .clone()
                                    .unwrap_or_else(|| "request failed".into()),
                            )
                        } else {
                            Check::Pending
                        }
                    },
                )
                .await
                .map_err(|e| wait_error(spec.kind, e))?;

                Ok(client.get(api, path).await?.unwrap_or(reported))
            }
            WaitMode::State(target) => {
                let found = wait_for(
                    &self.options.wait_policy,
                    move || client.get(api, path),
                    move |found: &Option<Resource>| match found {
                        Some(r) if r.state().is_some_and(|s| s.eq_ignore_ascii_case(target)) => {
                            Check::Done
                        }
                        Some(r) if is_failed_state(r) => {
                            Check::Failed(format!("resource {} reported state FAILED", r.id))
                        }
                        _ => Check::Pending,
                    },
                )
                .await
                .map_err(|e| wait_error(spec.kind, e))?;

                found.ok_or_else(|| ReconcileError::NotFound {
                    kind: spec.kind,
                    identifier: reported.id.clone(),
                })
            }
        }
    }

    /// Resolve parent identifiers (names or ids) to ids.
    async fn resolve_parents(
        &self,
        spec: &KindSpec,
        parents: &BTreeMap<String, String>,
    ) -> Result<ParentIds, ReconcileError> {
        let mut ids = ParentIds::new();
        for parent in spec.parents {
            let identifier = parents
                .get(parent.param)
                .ok_or(ReconcileError::MissingParameter {
                    kind: spec.kind,
                    param: parent.param,
                })?;
            let id = self.lookup_id(parent.kind, &ids, identifier).await?;
            ids.insert(parent.param.to_string(), id);
        }
        Ok(ids)
    }

    /// Replace the names in reference fields with the ids they resolve to.
    async fn resolve_references(
        &self,
        spec: &KindSpec,
        mut desired: ParamSet,
    ) -> Result<ParamSet, ReconcileError> {
        for field in spec.fields {
            let ValueType::Reference(kind) = field.value else {
                continue;
            };
            let Some(identifier) = desired
                .get(field.param)
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let id = self.lookup_id(kind, &ParentIds::new(), &identifier).await?;
            desired.insert(field.param, id);
        }
        Ok(desired)
    }

    /// Id of the single `kind` resource matching `identifier` within `scope`.
    async fn lookup_id(
        &self,
        kind: ResourceKind,
        scope: &ParentIds,
        identifier: &str,
    ) -> Result<String, ReconcileError> {
        let spec = kind.spec();
        let collection = spec
            .collection_path(scope)
            .map_err(|param| ReconcileError::MissingParameter { kind, param })?;
        let list = self.client.list(spec.api, &collection).await?;
        resolve_in(spec, &list, identifier)?
            .map(|found| found.id.clone())
            .ok_or_else(|| ReconcileError::NotFound {
                kind,
                identifier: identifier.to_string(),
            })
    }
}

// ============================================================================
// Error type
// ============================================================================

/// Error type for reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A required resource does not exist.
    #[error("{kind} '{identifier}' not found")]
    NotFound {
        /// Kind searched.
        kind: ResourceKind,
        /// Identifier searched.
        identifier: String,
    },
    /// An identifier matched more than one resource.
    #[error(transparent)]
    Ambiguous(#[from] AmbiguousIdentifier),
    /// A replace was required but not allowed; nothing was mutated.
    #[error(transparent)]
    ReplaceNotAllowed(#[from] ReplaceForbidden),
    /// The operation was not confirmed in time; it may still complete.
    #[error("{kind} operation not confirmed within {timeout:?}, it may still complete server-side")]
    OperationTimeout {
        /// Kind being mutated.
        kind: ResourceKind,
        /// Time budget that ran out.
        timeout: Duration,
    },
    /// The API reported the operation as failed.
    #[error("{kind} operation failed: {reason}")]
    OperationFailed {
        /// Kind being mutated.
        kind: ResourceKind,
        /// Reason reported.
        reason: String,
    },
    /// An API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The API accepted a create but did not describe the new resource.
    #[error(
        "{kind} create was accepted (request {}) but the response did not describe the new resource",
        .request_id.as_deref().unwrap_or("unknown")
    )]
    AcceptedWithoutResource {
        /// Kind being created.
        kind: ResourceKind,
        /// Request handle from the `Location` header, if any.
        request_id: Option<String>,
    },
    /// The replacement exists but the old resource could not be removed.
    #[error(
        "{kind} replace incomplete: created {created_id} but failed to delete {stale_id}: {source}"
    )]
    PartialReplaceFailure {
        /// Kind being replaced.
        kind: ResourceKind,
        /// Id of the replacement.
        created_id: String,
        /// Id of the resource that is still present.
        stale_id: String,
        /// Why the delete failed.
        source: Box<ReconcileError>,
    },
    /// A rename would collide with another resource.
    #[error("another {kind} with the desired name '{name}' exists ({existing_id})")]
    NameConflict {
        /// Kind being updated.
        kind: ResourceKind,
        /// Desired name.
        name: String,
        /// Id of the resource already using it.
        existing_id: String,
    },
    /// A required parameter was not supplied.
    #[error("missing required parameter '{param}' for {kind}")]
    MissingParameter {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Parameter name.
        param: &'static str,
    },
    /// A parameter is not valid for this kind.
    #[error("invalid parameter '{param}' for {kind}: {reason}")]
    InvalidParameter {
        /// Kind being reconciled.
        kind: ResourceKind,
        /// Offending parameter.
        param: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl ReconcileError {
    /// Returns true for a missing resource (including an API 404).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if waiting ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::OperationTimeout { .. })
    }

    /// Returns true if running again later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            Self::OperationTimeout { .. } => true,
            _ => false,
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn validate(spec: &KindSpec, req: &ReconcileRequest) -> Result<(), ReconcileError> {
    if let Some(param) = req.desired.names().find(|p| spec.field(p).is_none()) {
        return Err(ReconcileError::InvalidParameter {
            kind: spec.kind,
            param: param.to_string(),
            reason: "not a property of this kind",
        });
    }
    if let Some(param) = req
        .parents
        .keys()
        .find(|p| !spec.parents.iter().any(|s| s.param == p.as_str()))
    {
        return Err(ReconcileError::InvalidParameter {
            kind: spec.kind,
            param: param.clone(),
            reason: "not a parent of this kind",
        });
    }
    Ok(())
}

fn target_identifier<'a>(
    spec: &KindSpec,
    req: &'a ReconcileRequest,
) -> Result<&'a str, ReconcileError> {
    req.identifier
        .as_deref()
        .or(req.name.as_deref())
        .ok_or(ReconcileError::MissingParameter {
            kind: spec.kind,
            param: "identifier",
        })
}

fn is_failed_state(resource: &Resource) -> bool {
    resource
        .state()
        .is_some_and(|s| s.eq_ignore_ascii_case("FAILED"))
}

fn wait_error(kind: ResourceKind, err: WaitError<ApiError>) -> ReconcileError {
    match err {
        WaitError::TimedOut(timeout) => ReconcileError::OperationTimeout { kind, timeout },
        WaitError::Failed(reason) => ReconcileError::OperationFailed { kind, reason },
        WaitError::Poll(e) => ReconcileError::Api(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("Present".parse::<DesiredState>(), Ok(DesiredState::Present));
        assert_eq!("absent".parse::<DesiredState>(), Ok(DesiredState::Absent));
        assert_eq!(" info ".parse::<DesiredState>(), Ok(DesiredState::Info));
        assert!("running".parse::<DesiredState>().is_err());
    }

    #[test]
    fn default_options_wait_and_forbid_replace() {
        let options = ReconcileOptions::default();
        assert!(options.wait);
        assert!(!options.allow_replace);
        assert_eq!(options.state, DesiredState::Present);
        assert_eq!(options.wait_policy.timeout, Duration::from_secs(600));
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let req = ReconcileRequest::new(ResourceKind::Server)
            .with_name("web-01")
            .with_param("disk_type", "SSD");
        let err = validate(ResourceKind::Server.spec(), &req).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidParameter { ref param, .. } if param == "disk_type"));

        let req = ReconcileRequest::new(ResourceKind::Datacenter).with_parent("datacenter", "dc");
        assert!(validate(ResourceKind::Datacenter.spec(), &req).is_err());

        let req = ReconcileRequest::new(ResourceKind::Volume)
            .with_parent("datacenter", "dc")
            .with_param("size", 10);
        assert!(validate(ResourceKind::Volume.spec(), &req).is_ok());
    }

    #[test]
    fn identifier_falls_back_to_name() {
        let spec = ResourceKind::Lan.spec();
        let req = ReconcileRequest::new(ResourceKind::Lan).with_name("backend");
        assert_eq!(target_identifier(spec, &req).unwrap(), "backend");

        let req = req.with_identifier("lan-7");
        assert_eq!(target_identifier(spec, &req).unwrap(), "lan-7");

        let req = ReconcileRequest::new(ResourceKind::Lan);
        assert!(matches!(
            target_identifier(spec, &req),
            Err(ReconcileError::MissingParameter { param: "identifier", .. })
        ));
    }

    #[test]
    fn outcome_json_uses_the_kind_keys() {
        let resource = Resource::new("s-1", serde_json::json!({"name": "web-01"}));
        let applied = ReconcileOutcome::Applied {
            kind: ResourceKind::Server,
            changed: true,
            action: ResultAction::Update,
            resource,
        };
        let out = applied.to_json();
        assert_eq!(out["changed"], true);
        assert_eq!(out["failed"], false);
        assert_eq!(out["action"], "update");
        assert_eq!(out["server"]["properties"]["name"], "web-01");

        let deleted = ReconcileOutcome::Deleted { id: "v-1".into() }.to_json();
        assert_eq!(deleted["action"], "delete");
        assert_eq!(deleted["id"], "v-1");

        let listed = ReconcileOutcome::Listed {
            kind: ResourceKind::DnsRecord,
            resources: vec![],
        };
        assert_eq!(listed.to_json()["dns_records"], serde_json::json!([]));
        assert!(!ReconcileOutcome::Unchanged.changed());
    }

    #[test]
    fn wait_errors_map_to_the_taxonomy() {
        let err = wait_error(ResourceKind::Volume, WaitError::TimedOut(Duration::from_secs(5)));
        assert!(err.is_timeout());
        assert!(err.is_retryable());

        let err = wait_error(ResourceKind::Volume, WaitError::Failed("boom".into()));
        assert!(matches!(err, ReconcileError::OperationFailed { .. }));
        assert!(!err.is_timeout());
    }

    #[test]
    fn accepted_creates_name_their_request() {
        let err = ReconcileError::AcceptedWithoutResource {
            kind: ResourceKind::Registry,
            request_id: Some("req-9".into()),
        };
        assert!(err.to_string().contains("request req-9"));
        assert!(!err.is_retryable());

        let err = ReconcileError::AcceptedWithoutResource {
            kind: ResourceKind::Datacenter,
            request_id: None,
        };
        assert!(err.to_string().contains("request unknown"));
    }
}
