//! Turns a declared reference expression into a scope-qualified path.
//!
//! Unqualified references always mean the declaring scope. Reaching into
//! another scope requires an explicit qualifier naming an imported scope.

use crate::path::{ProjectPath, Reference, Root, PathSyntaxError};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Syntax(#[from] PathSyntaxError),
    #[error("Scope '{scope}' is not imported by scope '{declaring}'")]
    UnknownScope { scope: String, declaring: String },
    #[error("Reference '{reference}' is qualified by both '{inline}' and '{declared}'")]
    AmbiguousReference { reference: String, inline: String, declared: String },
    #[error("Malformed reference '{reference}': {reason}")]
    MalformedReference { reference: String, reason: String },
}

/// Resolves `expr` as written in `declaring_scope`.
///
/// `qualifier` is a foreign scope declared next to the expression rather than
/// inside it. `imports` is the effective import set of the declaration.
pub fn resolve_reference(
    expr: &str,
    qualifier: Option<&str>,
    declaring_scope: &str,
    imports: &BTreeSet<String>,
) -> Result<ProjectPath, ResolveError> {
    let reference = Reference::parse(expr)?;

    let scope = match (reference.scope.as_deref(), qualifier) {
        (Some(inline), Some(declared)) if inline != declared => {
            return Err(ResolveError::AmbiguousReference {
                reference: expr.to_string(),
                inline: inline.to_string(),
                declared: declared.to_string(),
            });
        }
        (Some(inline), _) => inline,
        (None, Some(declared)) => declared,
        (None, None) => declaring_scope,
    };

    if matches!(reference.path.root(), Root::Verification(_)) {
        return Err(ResolveError::MalformedReference {
            reference: expr.to_string(),
            reason: "verification outcomes cannot be consumed".into(),
        });
    }

    if scope != declaring_scope && !imports.contains(scope) {
        return Err(ResolveError::UnknownScope { scope: scope.to_string(), declaring: declaring_scope.to_string() });
    }

    Ok(ProjectPath::new(scope, reference.path)?)
}

/// Resolves a link to a whole verification, `?name` or `Scope::?name`, as
/// written in `declaring_scope`. Links are metadata, so no import is needed.
pub fn resolve_verification(expr: &str, declaring_scope: &str) -> Result<ProjectPath, ResolveError> {
    let reference = Reference::parse(expr)?;
    if !matches!(reference.path.root(), Root::Verification(_)) || !reference.path.segments().is_empty() {
        return Err(ResolveError::MalformedReference {
            reference: expr.to_string(),
            reason: "expected a verification, '?name' or 'Scope::?name'".into(),
        });
    }
    Ok(reference.qualify(declaring_scope)?)
}
