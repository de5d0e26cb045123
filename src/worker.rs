use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

use crate::error::KiraError;

#[derive(Debug, Clone)]
pub struct ChunkOutcome<R> {
    pub succeeded: Vec<R>,
    pub failed: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl<R> Default for ChunkOutcome<R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            diagnostics: Vec::new(),
        }
    }
}

impl<R> ChunkOutcome<R> {
    fn merge(&mut self, other: ChunkOutcome<R>) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.diagnostics.extend(other.diagnostics);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    num_proc: usize,
    max_chunk_size: usize,
}

impl WorkerPool {
    pub fn new(num_proc: usize, max_chunk_size: usize) -> Self {
        Self {
            num_proc: num_proc.max(1),
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    pub fn num_proc(&self) -> usize {
        self.num_proc
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn run<T, R, F>(&self, items: &[T], work: F) -> Result<ChunkOutcome<R>, KiraError>
    where
        T: Sync,
        R: Send,
        F: Fn(&[T]) -> ChunkOutcome<R> + Sync,
    {
        if items.is_empty() {
            return Ok(ChunkOutcome::default());
        }
        let chunks: Vec<&[T]> = items.chunks(self.max_chunk_size).collect();
        debug!(
            items = items.len(),
            chunks = chunks.len(),
            workers = self.num_proc,
            "dispatching work"
        );
        if self.num_proc == 1 {
            let mut merged = ChunkOutcome::default();
            for chunk in chunks {
                merged.merge(work(chunk));
            }
            return Ok(merged);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.num_proc)
            .thread_name(|index| format!("kira-refsync-worker-{index}"))
            .build()
            .map_err(|err| KiraError::WorkerPool(err.to_string()))?;
        let outcomes: Vec<ChunkOutcome<R>> =
            pool.install(|| chunks.par_iter().map(|chunk| work(*chunk)).collect());

        let mut merged = ChunkOutcome::default();
        for outcome in outcomes {
            merged.merge(outcome);
        }
        Ok(merged)
    }
}
