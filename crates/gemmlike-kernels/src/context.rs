//! Execution context: the workspace arena and run configuration shared by
//! every kernel launched on one worker.
//!
//! The workspace is a single contiguous scratch buffer that only ever grows.
//! Kernels ask for capacity with `extend_workspace` before they run and
//! then borrow it as a typed slice; nothing is freed between launches, so a
//! steady-state workload allocates nothing.

use rayon::prelude::*;

use gemmlike_core::{GemmlikeError, Result};

use crate::element::Element;

/// Workspace words are 8 bytes; capacity grows in 16-byte steps.
const WORKSPACE_ALIGN: usize = 16;
const WORD: usize = std::mem::size_of::<u64>();

/// CPU power/affinity policy requested by the caller.
///
/// Recorded and reported, never changed by the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    /// Bind to big cores.
    #[default]
    High,
    /// Bind to little cores.
    Low,
    /// Use every core.
    Full,
    /// Let the OS schedule.
    NoBind,
}

/// Per-worker execution context.
pub struct ExecContext {
    workspace: Vec<u64>,
    mode: PowerMode,
    threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecContext {
    /// Single-threaded context with an empty workspace.
    pub fn new() -> Self {
        Self {
            workspace: Vec::new(),
            mode: PowerMode::default(),
            threads: 1,
            pool: None,
        }
    }

    /// Context that runs kernels on a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let mut ctx = Self::new();
        ctx.set_run_mode(PowerMode::default(), threads)?;
        Ok(ctx)
    }

    /// Set the power mode and thread count. More than one thread builds a
    /// private rayon pool for this context.
    pub fn set_run_mode(&mut self, mode: PowerMode, threads: usize) -> Result<()> {
        let threads = threads.max(1);
        self.pool = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| GemmlikeError::InvalidParam(format!("thread pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        self.mode = mode;
        self.threads = threads;
        tracing::debug!(?mode, threads, "execution context configured");
        Ok(())
    }

    pub fn run_mode(&self) -> PowerMode {
        self.mode
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Grow the workspace to at least `bytes`. Never shrinks.
    ///
    /// Returns whether the buffer actually grew.
    pub fn extend_workspace(&mut self, bytes: usize) -> bool {
        let bytes = align_up(bytes, WORKSPACE_ALIGN);
        if bytes <= self.workspace_bytes() {
            return false;
        }
        tracing::debug!(from = self.workspace_bytes(), to = bytes, "growing conv workspace");
        self.workspace.resize(bytes / WORD, 0);
        true
    }

    /// Current workspace capacity in bytes.
    pub fn workspace_bytes(&self) -> usize {
        self.workspace.len() * WORD
    }

    /// The first `n` workspace elements as `T`, plus the parallelism handle.
    ///
    /// Borrowed together so a kernel can unroll into the workspace and run
    /// a parallel GEMM on it.
    pub fn split<T: Element>(&mut self, n: usize) -> Result<(&mut [T], Parallelism<'_>)> {
        let needed = n * std::mem::size_of::<T>();
        let have = self.workspace.len() * WORD;
        if needed > have {
            return Err(GemmlikeError::StorageError(format!(
                "workspace too small: need {needed} bytes, have {have}"
            )));
        }
        let all: &mut [T] = bytemuck::cast_slice_mut(&mut self.workspace[..]);
        let par = Parallelism { pool: self.pool.as_ref() };
        Ok((&mut all[..n], par))
    }

    pub fn parallelism(&self) -> Parallelism<'_> {
        Parallelism { pool: self.pool.as_ref() }
    }
}

/// Handle to the context's worker pool, if it has one.
#[derive(Clone, Copy)]
pub struct Parallelism<'a> {
    pool: Option<&'a rayon::ThreadPool>,
}

impl<'a> Parallelism<'a> {
    /// Always sequential.
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Run `f(index, chunk)` over `chunk_len`-sized chunks of `data`, on the
    /// pool when there is one.
    pub fn for_each_chunk<T, F>(&self, data: &mut [T], chunk_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Send + Sync,
    {
        match self.pool {
            Some(pool) => pool.install(|| {
                data.par_chunks_mut(chunk_len)
                    .enumerate()
                    .for_each(|(i, chunk)| f(i, chunk));
            }),
            None => {
                for (i, chunk) in data.chunks_mut(chunk_len).enumerate() {
                    f(i, chunk);
                }
            }
        }
    }
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
