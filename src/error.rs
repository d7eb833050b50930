use crate::dag::NodeId;
use crate::params::Role;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("node {0} does not exist")]
    NodeNotFound(NodeId),

    #[error("structural error at node {node}: {reason}")]
    Structural { node: NodeId, reason: String },

    #[error("node {node} has no parameter bound to node {parent}")]
    ParameterNotFound { node: NodeId, parent: NodeId },

    #[error("node {node} has no parameter bound to role {role:?}")]
    RoleNotBound { node: NodeId, role: Role },

    #[error("type mismatch at node {node}: expected {expected}, found {found}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("cycle detected involving node {0}")]
    Cycle(NodeId),

    #[error("failed to print value")]
    Format(#[from] std::fmt::Error),
}

impl DagError {
    pub(crate) fn structural(node: NodeId, reason: impl Into<String>) -> Self {
        DagError::Structural {
            node,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DagError>;
