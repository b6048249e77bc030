//! IONOS Reconcile - declarative resource management for IONOS Cloud.
//!
//! A library that drives IONOS Cloud resources to a desired state:
//! - **Resolution**: find a resource by id or name, refusing ambiguous matches
//! - **Classification**: decide between no-op, in-place update and replace
//! - **Waiting**: poll asynchronous operations until done, failed or timed out
//! - **Client**: Cloud, DNS and Container Registry APIs over REST with retries and pagination
//! - **Reconciliation**: present / update / absent / info for every supported kind
//!
//! ## Quick Start
//!
//! Credentials are loaded from environment variables. Create a `.env` file:
//!
//! ```text
//! IONOS_TOKEN=your_token_here
//! # or
//! IONOS_USERNAME=you@example.com
//! IONOS_PASSWORD=secret
//! ```
//!
//! Then reconcile a resource:
//!
//! ```ignore
//! use ionos_reconcile::{
//!     IonosClient, IonosClientConfig, ReconcileOptions, ReconcileRequest, Reconciler,
//!     ResourceKind,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IonosClient::new(IonosClientConfig::from_env()?)?;
//!     let reconciler = Reconciler::new(client, ReconcileOptions::default());
//!
//!     let request = ReconcileRequest::new(ResourceKind::Server)
//!         .with_parent("datacenter", "production")
//!         .with_name("web-01")
//!         .with_param("cores", 2);
//!
//!     let outcome = reconciler.run(&request).await?;
//!     println!("{}", outcome.to_json());
//!     Ok(())
//! }
//! ```

// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy for strict discipline
#![deny(clippy::all)]                 // All standard Clippy lints
#![deny(clippy::pedantic)]            // Very strict Clippy lints
#![deny(clippy::nursery)]             // Experimental lints
#![deny(clippy::unwrap_used)]         // unwrap() is forbidden
#![deny(clippy::expect_used)]         // expect() is forbidden
#![deny(clippy::panic)]               // panic!() is forbidden
#![deny(clippy::print_stdout)]        // println!() is forbidden in production
#![deny(clippy::todo)]                // TODO is forbidden
#![deny(clippy::unimplemented)]       // unimplemented!() is forbidden
#![deny(clippy::missing_const_for_fn)] // Force const when possible
#![deny(clippy::unwrap_in_result)]    // unwrap() in Result is forbidden
#![deny(clippy::module_inception)]    // Module with same name as crate is forbidden
#![deny(clippy::redundant_clone)]     // Useless clones are forbidden
#![deny(clippy::shadow_unrelated)]    // Shadowing unrelated variables is forbidden
#![deny(clippy::too_many_arguments)]  // Limit function arguments
#![deny(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Test modules unwrap freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Modules
// ============================================================================

/// Resource kinds, identity fields and desired-state parameters.
///
/// Use this module to describe what is being reconciled.
pub mod ionos_resource;

/// Identifier resolution and listing filters.
pub mod ionos_resolver;

/// No-op / update / replace classification.
pub mod ionos_diff;

/// Polling of asynchronous operations.
///
/// Use this module to wait for request handles or resource states.
pub mod ionos_waiter;

/// HTTP client for the IONOS Cloud, DNS and Container Registry REST APIs.
pub mod ionos_client;

/// High-level reconciliation.
///
/// Use this module to drive one resource to its desired state.
pub mod ionos_reconciler;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use ionos_client::{ApiError, Credentials, IonosClient, IonosClientConfig};
pub use ionos_diff::{PlannedAction, classify};
pub use ionos_reconciler::{
    DesiredState, ReconcileError, ReconcileOptions, ReconcileOutcome, ReconcileRequest,
    Reconciler, ResultAction,
};
pub use ionos_resolver::{AmbiguousIdentifier, Filter, resolve};
pub use ionos_resource::{InvalidValue, ParamSet, Resource, ResourceKind, ValueType};
pub use ionos_waiter::{Check, WaitError, WaitPolicy, wait_for};
