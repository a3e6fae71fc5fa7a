//! Schema migrations for operation documents.
//!
//! Migrations operate on the raw JSON value, one version step at a time, so a
//! document is never decoded into a shape it does not have yet.
//!
//! v1 → v2: the field-based `after: [name]` blocker list moves into the issue
//! tracker as `blocked_by` edges between the operations' external refs.
//! Registration is best effort; failures are logged and the step completes.

use lander_kernel::{CURRENT_SCHEMA_VERSION, Tracker};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::StoreError;

/// Schema version of a raw document; documents without one predate versioning.
pub fn document_version(doc: &Value) -> u32 {
    doc.get("schema_version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
}

pub struct MigrationContext<'a> {
    pub tracker: Option<&'a dyn Tracker>,
    /// Looks up another operation's `external_ref` by name.
    pub external_ref_of: &'a dyn Fn(&str) -> Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub registered_blockers: Vec<String>,
    pub skipped: Vec<String>,
}

/// Bring `doc` up to [`CURRENT_SCHEMA_VERSION`]. Returns `None` when it is
/// already current.
pub fn migrate_document(
    name: &str,
    doc: &mut Value,
    ctx: &MigrationContext<'_>,
) -> Result<Option<MigrationReport>, StoreError> {
    let from = document_version(doc);
    if from >= CURRENT_SCHEMA_VERSION {
        return Ok(None);
    }
    let object = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::Corrupt(format!("operation {name}: document is not an object")))?;

    let mut report = MigrationReport {
        from,
        to: CURRENT_SCHEMA_VERSION,
        ..MigrationReport::default()
    };
    let mut version = from;
    while version < CURRENT_SCHEMA_VERSION {
        match version {
            1 => v1_to_v2(name, object, ctx, &mut report),
            other => {
                return Err(StoreError::Corrupt(format!(
                    "operation {name}: no migration from schema version {other}"
                )));
            }
        }
        version += 1;
        object.insert("schema_version".to_string(), Value::from(version));
    }

    info!(
        operation = name,
        from,
        to = CURRENT_SCHEMA_VERSION,
        registered = report.registered_blockers.len(),
        skipped = report.skipped.len(),
        "migrated operation document"
    );
    Ok(Some(report))
}

fn v1_to_v2(
    name: &str,
    object: &mut Map<String, Value>,
    ctx: &MigrationContext<'_>,
    report: &mut MigrationReport,
) {
    let after: Vec<String> = match object.remove("after") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    if after.is_empty() {
        return;
    }

    let Some(own_ref) = object
        .get("external_ref")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        warn!(
            operation = name,
            blockers = ?after,
            "operation has no external_ref; dropping field-based blockers"
        );
        report.skipped.extend(after);
        return;
    };

    let mut refs = Vec::new();
    for other in after {
        match (ctx.external_ref_of)(&other) {
            Some(other_ref) => refs.push(other_ref),
            None => {
                warn!(
                    operation = name,
                    blocker = %other,
                    "blocker has no external_ref; skipping"
                );
                report.skipped.push(other);
            }
        }
    }
    if refs.is_empty() {
        return;
    }

    match ctx.tracker {
        Some(tracker) => match tracker.add_blocked_by(&own_ref, &refs) {
            Ok(()) => report.registered_blockers.extend(refs),
            Err(err) => {
                warn!(
                    operation = name,
                    issue = %own_ref,
                    error = %err,
                    "failed to register blockers with tracker; continuing"
                );
                report.skipped.extend(refs);
            }
        },
        None => {
            warn!(
                operation = name,
                "no tracker configured; field-based blockers not registered"
            );
            report.skipped.extend(refs);
        }
    }
}
