//! Common types used across CLI modules

use uuid::Uuid;

/// How a user refers to a cluster on the command line
#[derive(Debug, Clone, PartialEq)]
pub enum KubeRef {
    /// Full UUID
    Id(Uuid),
    /// Cluster name or an unambiguous id prefix
    Partial(String),
}

impl KubeRef {
    /// Parses a full UUID first, anything else is matched later
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(id) => KubeRef::Id(id),
            Err(_) => KubeRef::Partial(input.to_string()),
        }
    }
}

impl std::fmt::Display for KubeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KubeRef::Id(id) => write!(f, "{}", id),
            KubeRef::Partial(partial) => f.write_str(partial),
        }
    }
}
