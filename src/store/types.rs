use crate::path::{Path, ProjectPath, Root};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Variant order is the tie-break rank used by the topological sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Model,
    Calculation,
    Verification,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Model => "model",
            NodeKind::Calculation => "calculation",
            NodeKind::Verification => "verification",
        })
    }
}

/// Identity of a graph node: its scope, kind and (for calculations and
/// verifications) name. Model nodes have an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub scope: String,
    pub kind: NodeKind,
    pub name: String,
}

impl NodeKey {
    pub fn model(scope: impl Into<String>) -> Self {
        Self { scope: scope.into(), kind: NodeKind::Model, name: String::new() }
    }

    pub fn calculation(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self { scope: scope.into(), kind: NodeKind::Calculation, name: name.into() }
    }

    pub fn verification(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self { scope: scope.into(), kind: NodeKind::Verification, name: name.into() }
    }

    /// The key of the node producing the value at `path`.
    pub fn producing(path: &ProjectPath) -> Self {
        match path.root() {
            Root::Model => Self::model(path.scope()),
            Root::Calc(name) => Self::calculation(path.scope(), name.clone()),
            Root::Verification(name) => Self::verification(path.scope(), name.clone()),
        }
    }

    pub fn path(&self) -> ProjectPath {
        let root = match self.kind {
            NodeKind::Model => Root::Model,
            NodeKind::Calculation => Root::Calc(self.name.clone()),
            NodeKind::Verification => Root::Verification(self.name.clone()),
        };
        ProjectPath::in_scope(self.scope.clone(), Path::new(root))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub key: NodeKey,
    /// Position of the owning scope in the project.
    pub scope_index: u32,
    /// Declaration order among nodes of the same kind in the scope.
    pub order: u32,
}
