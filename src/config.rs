use std::path::PathBuf;

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct MemoryParams {
    /// Location of the persisted image and link-content index.
    pub repo_path: PathBuf,
    /// Segment cap; the memory ceiling of the store.
    pub max_loaded_segments: u16,
    /// Advisory sizing for callers running worker pools against the store.
    pub max_threads: usize,
    /// Sizing for the event-dispatch side.
    pub max_events_and_agents_threads: usize,
    /// Start empty instead of loading the persisted image.
    pub clear: bool,
    /// Background save tick in seconds; 0 disables the saver thread.
    pub save_period: u64,
    /// Background maintenance tick in seconds; 0 disables.
    pub update_period: u64,
}

impl Default for MemoryParams {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("repo"),
            max_loaded_segments: 64,
            max_threads: 8,
            max_events_and_agents_threads: 1,
            clear: false,
            save_period: 0,
            update_period: 0,
        }
    }
}

impl MemoryParams {
    /// Fresh store in a throwaway location; what the test suite uses.
    pub fn test(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            clear: true,
            max_loaded_segments: 16,
            ..Self::default()
        }
    }
}
