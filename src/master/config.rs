//! Construction-time parameters of a [`Master`](crate::master::Master).

use serde::{Deserialize, Serialize};

/// Budget and scheduling knobs; not changeable after construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Most blocks resident in memory at the end of a round; `None` = unbounded.
    pub limit: Option<usize>,
    /// Worker threads used by `execute`.
    pub threads: usize,
    /// Queues larger than this many bytes are spilled when their block is out of core.
    pub queue_threshold: usize,
    /// Run `foreach` callbacks as soon as they are registered.
    pub immediate: bool,
    /// Warn once if a flush makes no progress for this many milliseconds.
    pub stall_warning_ms: Option<u64>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            limit: None,
            threads: 1,
            queue_threshold: 4096,
            immediate: true,
            stall_warning_ms: None,
        }
    }
}

impl MasterConfig {
    /// Threads actually used for `nblocks` blocks: never more than the
    /// in-memory budget allows each thread to hold one block.
    pub(crate) fn effective_threads(&self, nblocks: usize) -> usize {
        let mut n = self.threads.max(1);
        if let Some(limit) = self.limit {
            n = n.min(limit.max(1));
        }
        n.min(nblocks.max(1))
    }

    /// Resident blocks each worker may keep; `None` = unbounded.
    pub(crate) fn blocks_per_thread(&self, threads: usize) -> Option<usize> {
        self.limit.map(|l| (l / threads.max(1)).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = MasterConfig::default();
        assert_eq!(c.threads, 1);
        assert_eq!(c.queue_threshold, 4096);
        assert!(c.immediate);
        assert!(c.limit.is_none());
    }

    #[test]
    fn thread_count_respects_the_budget() {
        let c = MasterConfig {
            threads: 8,
            limit: Some(3),
            ..Default::default()
        };
        assert_eq!(c.effective_threads(100), 3);
        assert_eq!(c.blocks_per_thread(3), Some(1));
        assert_eq!(c.effective_threads(2), 2);
        let unbounded = MasterConfig {
            threads: 4,
            ..Default::default()
        };
        assert_eq!(unbounded.blocks_per_thread(4), None);
    }
}
