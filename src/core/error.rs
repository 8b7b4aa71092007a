//! Error types for the council engines.

use thiserror::Error;

/// Result type alias for council operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in council operations.
///
/// Only structural misuse is an error. Timeouts, rejected petitions and
/// failed convergence are reported through `CouncilResult` instead.
#[derive(Error, Debug)]
pub enum Error {
    // Lifecycle errors
    #[error("Consensus engine on node {0} is not initialized")]
    NotInitialized(String),

    // Authority errors
    #[error("Only leader can propose (node {node_id}, leader: {leader:?})")]
    NotLeader {
        node_id: String,
        leader: Option<String>,
    },

    #[error("Only primary can propose (node {node_id}, view {view})")]
    NotPrimary { node_id: String, view: u64 },

    // Petition errors
    #[error("Petition {0} not found")]
    PetitionNotFound(String),

    #[error("Petition {0} was withdrawn before it resolved")]
    PetitionWithdrawn(String),

    #[error("Petition table full: {0} petitions pending")]
    CapacityExceeded(usize),

    // Selection errors
    #[error("Unknown council protocol: {0}")]
    UnknownProtocol(String),

    #[error("Unknown element: {0}")]
    UnknownElement(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Transport errors
    #[error("Peer {peer} unreachable: {reason}")]
    Transport { peer: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::PetitionNotFound("gq_1".to_string());
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_authority_messages() {
        let err = Error::NotLeader {
            node_id: "n1".to_string(),
            leader: None,
        };
        assert!(err.to_string().starts_with("Only leader can propose"));

        let err = Error::NotPrimary {
            node_id: "n1".to_string(),
            view: 2,
        };
        assert!(err.to_string().starts_with("Only primary can propose"));
    }

    #[test]
    fn test_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
