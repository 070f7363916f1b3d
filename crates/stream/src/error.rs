use cosmos_common::{ConfigError, ContentKind, ContentSubkind};

/// Errors raised while building or driving the streaming core.
///
/// Only startup failures surface from constructors; once the loop runs,
/// anomalies are logged and counted instead of returned.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no generator available for worker {kind}/{subkind}")]
    MissingGenerator {
        kind: ContentKind,
        subkind: ContentSubkind,
    },

    #[error("failed to spawn background unit {kind}/{subkind}: {source}")]
    WorkerSpawn {
        kind: ContentKind,
        subkind: ContentSubkind,
        #[source]
        source: std::io::Error,
    },

    #[error("background unit {unit} is no longer accepting requests")]
    UnitDisconnected { unit: usize },
}
