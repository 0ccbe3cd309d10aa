use std::fmt;

/// Substrate error kinds. Fatal variants abort the current operation without
/// partial mutation; semantic rejections inside rule modules are never errors
/// and surface as forensic outcome events instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    InvalidArgument(String),
    InvalidCommand(String),
    InvalidEvent(String),
    DuplicateModule(String),
    ConflictingTaskRegistration {
        task_name: String,
        registered_interval: u64,
        requested_interval: u64,
    },
    RunawayEventFanout {
        tick: u64,
        limit: u64,
    },
    UnknownEntity(String),
    UnknownSpace(String),
    InvalidCell {
        space_id: String,
        cell_key: String,
    },
    Encoding(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidCommand(message) => write!(f, "invalid command: {message}"),
            Self::InvalidEvent(message) => write!(f, "invalid event: {message}"),
            Self::DuplicateModule(name) => write!(f, "duplicate rule module name: {name}"),
            Self::ConflictingTaskRegistration {
                task_name,
                registered_interval,
                requested_interval,
            } => write!(
                f,
                "periodic task '{task_name}' already registered with interval {registered_interval}; got {requested_interval}"
            ),
            Self::RunawayEventFanout { tick, limit } => write!(
                f,
                "event execution guard tripped at tick {tick}; exceeded MAX_EVENTS_PER_TICK={limit}"
            ),
            Self::UnknownEntity(entity_id) => write!(f, "unknown entity: {entity_id}"),
            Self::UnknownSpace(space_id) => write!(f, "unknown space: {space_id}"),
            Self::InvalidCell { space_id, cell_key } => {
                write!(f, "invalid cell {cell_key} in space {space_id}")
            }
            Self::Encoding(message) => write!(f, "encoding error: {message}"),
        }
    }
}

impl std::error::Error for SimError {}

impl From<serde_json::Error> for SimError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encoding(value.to_string())
    }
}
