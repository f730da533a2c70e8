use thiserror::Error;

/// Errors that can occur while setting up parallel execution.
#[derive(Error, Debug, PartialEq)]
pub enum ParallelError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),
}

/// Controls where loops marked parallel are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parallelism {
    /// Use the global Rayon thread pool.
    #[default]
    Global,

    /// Run on a local thread pool with `n` threads.
    ///
    /// # Warning
    /// Creates a new thread pool on every realize call, which has significant overhead.
    /// Use this primarily for benchmarking or specific isolation needs.
    Fixed(usize),

    /// Run every loop sequentially on the current thread, ignoring parallel marks.
    ///
    /// Useful for debugging; results are identical to the parallel strategies.
    Serial,
}

impl Parallelism {
    /// Run `op` under this strategy.
    ///
    /// `op` receives whether parallel loops may fan out to the pool.
    ///
    /// # Errors
    ///
    /// Fails if a fixed pool has zero threads or cannot be built.
    pub fn install<R, F>(self, op: F) -> Result<R, ParallelError>
    where
        R: Send,
        F: FnOnce(bool) -> R + Send,
    {
        match self {
            Parallelism::Serial => Ok(op(false)),
            Parallelism::Global => Ok(op(true)),
            Parallelism::Fixed(n) => {
                if n == 0 {
                    return Err(ParallelError::InvalidThreadCount(n));
                }
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ParallelError::BuildError(e.to_string()))?;

                Ok(pool.install(|| op(true)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn doubled(parallel: bool) -> Vec<i32> {
        let src = [1, 2, 3, 4];
        if parallel {
            src.par_iter().map(|s| s * 2).collect()
        } else {
            src.iter().map(|s| s * 2).collect()
        }
    }

    #[test]
    fn test_install_serial() -> Result<(), ParallelError> {
        assert!(!Parallelism::Serial.install(|parallel| parallel)?);
        assert_eq!(Parallelism::Serial.install(doubled)?, vec![2, 4, 6, 8]);
        Ok(())
    }

    #[test]
    fn test_install_global() -> Result<(), ParallelError> {
        assert_eq!(Parallelism::Global.install(doubled)?, vec![2, 4, 6, 8]);
        Ok(())
    }

    #[test]
    fn test_install_fixed_success() -> Result<(), ParallelError> {
        let threads = Parallelism::Fixed(2).install(|_| rayon::current_num_threads())?;
        assert_eq!(threads, 2);
        assert_eq!(Parallelism::Fixed(2).install(doubled)?, vec![2, 4, 6, 8]);
        Ok(())
    }

    #[test]
    fn test_install_fixed_error() {
        let res = Parallelism::Fixed(0).install(|_| ());
        assert!(matches!(res, Err(ParallelError::InvalidThreadCount(0))));
    }
}
