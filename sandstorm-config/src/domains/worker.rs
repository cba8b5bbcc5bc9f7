//! Assignment stamped into a child process's config snapshot

use serde::{Deserialize, Serialize};

/// Identifies a worker process within a fanned-out batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub worker_id: usize,
    /// Real number of processes in the batch
    pub process_count: usize,
}

impl WorkerAssignment {
    /// Only a lone process prints the final report itself
    pub fn is_sole_process(&self) -> bool {
        self.process_count <= 1
    }
}
