//! # Threading Configuration
//!
//! ## Role
//! Configure the rayon pool used for seed hashing and candidate decoding.
//! Workers never share a lane workspace: each synchronous decode allocates
//! its own.

use crate::error::{AsmcError, Result};

/// Build a dedicated pool with `n_threads` workers
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("asmc-worker-{}", i))
        .build()
        .map_err(|e| AsmcError::config(format!("failed to create thread pool: {}", e)))
}

/// Configure the global pool. A pool that already exists is kept.
pub fn init_global_pool(n_threads: Option<usize>) -> Result<usize> {
    if let Some(n) = n_threads {
        if n == 0 {
            return Err(AsmcError::config("--threads must be at least 1"));
        }
        if rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("asmc-worker-{}", i))
            .build_global()
            .is_err()
        {
            tracing::debug!("Global thread pool already initialized");
        }
    }
    Ok(rayon::current_num_threads())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedicated_pool() {
        let pool = build_thread_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        let sum: u64 = pool.install(|| {
            use rayon::prelude::*;
            (1..=100u64).into_par_iter().sum()
        });
        assert_eq!(sum, 5050);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(init_global_pool(Some(0)).is_err());
    }
}
