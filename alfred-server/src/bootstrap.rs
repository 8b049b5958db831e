//! Startup check of the durable structures the dispatcher publishes to.
//!
//! Each required structure is introspected. A structure exists only when its
//! reported type matches the expected category. Missing structures are
//! created with a sentinel write that is safe to repeat. Structures holding
//! the wrong type are never repaired: they are reported and startup fails.
//! Every store call has its own deadline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use alfred_core::{StructureKind, StructureSpec, SENTINEL};
use thiserror::Error;
use tracing::{error, info};

use crate::stream::{StreamError, StreamStore, MISSING_TYPE};

/// Deadline for a single inspect or create call.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// A structure whose key holds a different type than required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub name: &'static str,
    pub expected: StructureKind,
    pub found: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (expected {}, found {})",
            self.name, self.expected, self.found
        )
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to inspect '{name}': {source}")]
    Inspect {
        name: &'static str,
        #[source]
        source: StreamError,
    },
    #[error("failed to create '{name}': {source}")]
    Create {
        name: &'static str,
        #[source]
        source: StreamError,
    },
    #[error("timed out after {limit:?} trying to {step} '{name}'")]
    Timeout {
        name: &'static str,
        step: &'static str,
        limit: Duration,
    },
    #[error("structures with the wrong type: {}", format_mismatches(.0))]
    TypeMismatch(Vec<Mismatch>),
}

fn format_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Already present with the right type.
    pub present: Vec<&'static str>,
    /// Created during this run.
    pub created: Vec<&'static str>,
}

/// Verify every structure in `specs`, creating the missing ones.
///
/// Missing structures are created even when another structure has the wrong
/// type, so a rerun after fixing the mismatch only has that one left to do.
pub async fn bootstrap(
    store: &dyn StreamStore,
    specs: &[StructureSpec],
) -> Result<BootstrapReport, BootstrapError> {
    bootstrap_with_step_timeout(store, specs, STEP_TIMEOUT).await
}

/// [`bootstrap`] with an explicit per-call deadline.
pub async fn bootstrap_with_step_timeout(
    store: &dyn StreamStore,
    specs: &[StructureSpec],
    step_timeout: Duration,
) -> Result<BootstrapReport, BootstrapError> {
    let mut report = BootstrapReport::default();
    let mut mismatches = Vec::new();

    for spec in specs {
        let found = inspect(store, spec, step_timeout).await?;

        if found == spec.kind.type_name() {
            info!("{} {}: OK", spec.kind, spec.name);
            report.present.push(spec.name);
            continue;
        }

        if found != MISSING_TYPE {
            error!(
                "{} {}: type mismatch, found {}",
                spec.kind, spec.name, found
            );
            mismatches.push(Mismatch {
                name: spec.name,
                expected: spec.kind,
                found,
            });
            continue;
        }

        bounded(spec, "create", step_timeout, create(store, spec))
            .await?
            .map_err(|source| BootstrapError::Create {
                name: spec.name,
                source,
            })?;

        // A concurrent writer could have claimed the key with another type.
        let after = inspect(store, spec, step_timeout).await?;
        if after != spec.kind.type_name() {
            error!(
                "{} {}: type mismatch after creation, found {}",
                spec.kind, spec.name, after
            );
            mismatches.push(Mismatch {
                name: spec.name,
                expected: spec.kind,
                found: after,
            });
            continue;
        }

        info!("{} {}: created", spec.kind, spec.name);
        report.created.push(spec.name);
    }

    if !mismatches.is_empty() {
        return Err(BootstrapError::TypeMismatch(mismatches));
    }

    Ok(report)
}

async fn bounded<T>(
    spec: &StructureSpec,
    step: &'static str,
    limit: Duration,
    future: impl Future<Output = T>,
) -> Result<T, BootstrapError> {
    tokio::time::timeout(limit, future).await.map_err(|_| {
        error!("{} {}: {} timed out after {:?}", spec.kind, spec.name, step, limit);
        BootstrapError::Timeout {
            name: spec.name,
            step,
            limit,
        }
    })
}

async fn inspect(
    store: &dyn StreamStore,
    spec: &StructureSpec,
    limit: Duration,
) -> Result<String, BootstrapError> {
    bounded(spec, "inspect", limit, store.key_type(spec.name))
        .await?
        .map_err(|source| BootstrapError::Inspect {
            name: spec.name,
            source,
        })
}

async fn create(store: &dyn StreamStore, spec: &StructureSpec) -> Result<(), StreamError> {
    match spec.kind {
        StructureKind::Stream => {
            store.append(spec.name, &[(SENTINEL, "1")]).await?;
        }
        StructureKind::Hash => {
            store.hash_set_if_absent(spec.name, SENTINEL, "1").await?;
        }
        StructureKind::SortedSet => {
            store.sorted_set_add(spec.name, SENTINEL, 0.0).await?;
        }
    }
    Ok(())
}
