//! Assertions for engine results.

use crate::errors::{ConflictKind, DeployError, ErrorKind};
use crate::release::Release;

/// Asserts that `err` is a conflict of `kind`.
///
/// # Panics
///
/// Panics if the error is anything else.
pub fn assert_conflict(err: &DeployError, kind: ConflictKind) {
    match err {
        DeployError::Conflict(conflict) => assert_eq!(
            conflict.kind, kind,
            "Expected {kind:?} conflict, got {:?}",
            conflict.kind
        ),
        other => panic!("Expected {kind:?} conflict, got {other:?}"),
    }
}

/// Asserts the error classification.
///
/// # Panics
///
/// Panics if `err` is of another kind.
pub fn assert_error_kind(err: &DeployError, kind: ErrorKind) {
    assert_eq!(err.kind(), kind, "Unexpected error: {err}");
}

/// Asserts release versions in the given order.
///
/// # Panics
///
/// Panics if the versions differ.
pub fn assert_versions(history: &[Release], expected: &[u32]) {
    let versions: Vec<u32> = history.iter().map(|r| r.version).collect();
    assert_eq!(versions, expected, "Unexpected release history");
}
