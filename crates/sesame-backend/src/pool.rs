//! Parallel worker pool for cryptographic kernels.
//!
//! The pool owns a fixed set of OS threads, each bound to an independent
//! [`Backend`] instance. Large multi-scalar multiplications are partitioned
//! into contiguous chunks dispatched one per worker and reduced by group
//! addition; FFTs are split into independent sub-transforms whose combine
//! stages run on the coordinator. Callers suspend on a oneshot reply while
//! a worker computes; there is no polling anywhere.
//!
//! Failure semantics: any worker error aborts the whole operation with
//! [`BackendError::ComputeError`]. The pool never retries internally;
//! retry policy belongs to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendFactory};
use crate::error::{BackendError, BackendResult};

/// Worker pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of parallel workers (and backend instances).
    pub worker_count: usize,
    /// Maximum MSM chunk length dispatched to one worker.
    pub chunk_size: usize,
    /// Domains smaller than this run on a single worker; splitting would
    /// cost more in dispatch than it saves in compute.
    pub fft_parallel_threshold: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            chunk_size: 1 << 14,
            fft_parallel_threshold: 1 << 10,
        }
    }
}

enum Job<B: Backend> {
    Msm {
        points: Vec<B::Point>,
        scalars: Vec<B::Scalar>,
        reply: oneshot::Sender<BackendResult<B::Point>>,
    },
    Fft {
        values: Vec<B::Field>,
        inverse: bool,
        reply: oneshot::Sender<BackendResult<Vec<B::Field>>>,
    },
}

struct Worker<B: Backend> {
    sender: Option<mpsc::UnboundedSender<Job<B>>>,
    handle: Option<JoinHandle<()>>,
}

/// A fixed-size pool of parallel execution units.
pub struct WorkerPool<F: BackendFactory> {
    workers: Vec<Worker<F::B>>,
    /// Coordinator-side instance used for partial-result reduction and
    /// combine stages; never shared with the workers.
    reducer: F::B,
    config: PoolConfig,
    destroyed: AtomicBool,
}

impl<F: BackendFactory> WorkerPool<F> {
    /// Allocate `worker_count` independent backend instances and start one
    /// worker thread per instance.
    pub fn init(factory: &F, config: PoolConfig) -> BackendResult<Self> {
        if config.worker_count == 0 || config.chunk_size == 0 {
            return Err(BackendError::InitializationError(
                "worker_count and chunk_size must be non-zero".into(),
            ));
        }
        let reducer = factory.create().map_err(|e| {
            BackendError::InitializationError(format!("reducer backend: {e}"))
        })?;
        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let backend = factory.create().map_err(|e| {
                BackendError::InitializationError(format!("worker {worker_id}: {e}"))
            })?;
            let (sender, receiver) = mpsc::unbounded_channel();
            let handle = std::thread::Builder::new()
                .name(format!("sesame-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, backend, receiver))
                .map_err(|e| {
                    BackendError::InitializationError(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    ))
                })?;
            workers.push(Worker {
                sender: Some(sender),
                handle: Some(handle),
            });
        }
        info!(
            workers = config.worker_count,
            chunk_size = config.chunk_size,
            "worker pool initialized"
        );
        Ok(Self {
            workers,
            reducer,
            config,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    fn dispatch(&self, worker: usize, job: Job<F::B>) -> BackendResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BackendError::PoolDestroyed);
        }
        let sender = self.workers[worker]
            .sender
            .as_ref()
            .ok_or(BackendError::PoolDestroyed)?;
        sender
            .send(job)
            .map_err(|_| BackendError::ComputeError(format!("worker {worker} terminated")))
    }

    /// Multi-scalar multiplication across the pool.
    ///
    /// Partitions the input into contiguous chunks of
    /// `min(chunk_size, ceil(n / worker_count))` (last chunk may be short),
    /// dispatches one chunk per worker round-robin and sums the partial
    /// results. The group operation is commutative and associative, so the
    /// result is independent of the chunking.
    pub async fn multi_scalar_multiply(
        &self,
        points: &[<F::B as Backend>::Point],
        scalars: &[<F::B as Backend>::Scalar],
    ) -> BackendResult<<F::B as Backend>::Point> {
        if points.len() != scalars.len() {
            return Err(BackendError::InvalidInput(format!(
                "msm length mismatch: {} points vs {} scalars",
                points.len(),
                scalars.len()
            )));
        }
        if points.is_empty() {
            return Err(BackendError::InvalidInput("msm over empty input".into()));
        }

        let n = points.len();
        let per_worker = n.div_ceil(self.config.worker_count);
        let chunk_len = self.config.chunk_size.min(per_worker).max(1);

        let mut replies = Vec::new();
        for (i, (point_chunk, scalar_chunk)) in points
            .chunks(chunk_len)
            .zip(scalars.chunks(chunk_len))
            .enumerate()
        {
            let (reply, rx) = oneshot::channel();
            self.dispatch(
                i % self.config.worker_count,
                Job::Msm {
                    points: point_chunk.to_vec(),
                    scalars: scalar_chunk.to_vec(),
                    reply,
                },
            )?;
            replies.push(rx);
        }
        debug!(n, chunks = replies.len(), chunk_len, "dispatched msm");

        let mut acc = self.reducer.identity();
        for rx in replies {
            let partial = rx
                .await
                .map_err(|_| BackendError::ComputeError("worker dropped msm reply".into()))??;
            acc = self.reducer.add_points(&acc, &partial);
        }
        Ok(acc)
    }

    /// Transform over a power-of-two domain.
    ///
    /// Splits the domain into up to `worker_count` interleaved
    /// sub-transforms (the only stage-independent decomposition of the
    /// radix-2 butterfly network) and merges them with coordinator-side
    /// combine stages. Domains below the configured threshold run on a
    /// single worker.
    pub async fn fft(
        &self,
        values: Vec<<F::B as Backend>::Field>,
        inverse: bool,
    ) -> BackendResult<Vec<<F::B as Backend>::Field>> {
        let n = values.len();
        if n == 0 || !n.is_power_of_two() {
            return Err(BackendError::InvalidInput(format!(
                "FFT domain size {n} is not a positive power of two"
            )));
        }

        let mut splits = 1usize;
        if n >= self.config.fft_parallel_threshold {
            while splits * 2 <= self.config.worker_count && n / (splits * 2) >= 2 {
                splits *= 2;
            }
        }
        debug!(n, splits, inverse, "dispatched fft");
        self.fft_split(values, inverse, splits, 0).await
    }

    fn fft_split<'a>(
        &'a self,
        values: Vec<<F::B as Backend>::Field>,
        inverse: bool,
        splits: usize,
        worker: usize,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = BackendResult<Vec<<F::B as Backend>::Field>>>
                + Send
                + 'a,
        >,
    > {
        Box::pin(async move {
            if splits <= 1 {
                let (reply, rx) = oneshot::channel();
                self.dispatch(
                    worker % self.config.worker_count,
                    Job::Fft {
                        values,
                        inverse,
                        reply,
                    },
                )?;
                return rx
                    .await
                    .map_err(|_| BackendError::ComputeError("worker dropped fft reply".into()))?;
            }

            let mut even = Vec::with_capacity(values.len() / 2);
            let mut odd = Vec::with_capacity(values.len() / 2);
            for (i, value) in values.into_iter().enumerate() {
                if i % 2 == 0 {
                    even.push(value);
                } else {
                    odd.push(value);
                }
            }
            // The two sub-transforms are data-independent; later butterfly
            // stages are not, so they run as a coordinator-side combine.
            let (even, odd) = tokio::join!(
                self.fft_split(even, inverse, splits / 2, worker * 2),
                self.fft_split(odd, inverse, splits / 2, worker * 2 + 1),
            );
            self.reducer.combine_fft_halves(even?, odd?, inverse)
        })
    }

    /// Release all worker backend instances. Idempotent; in-flight jobs
    /// finish before their worker exits.
    pub fn destroy(&mut self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for (worker_id, worker) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!(worker_id, "worker thread panicked during shutdown");
                }
            }
        }
        info!("worker pool destroyed");
    }
}

impl<F: BackendFactory> Drop for WorkerPool<F> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn worker_loop<B: Backend>(worker_id: usize, backend: B, mut jobs: mpsc::UnboundedReceiver<Job<B>>) {
    debug!(worker_id, "worker started");
    while let Some(job) = jobs.blocking_recv() {
        match job {
            Job::Msm {
                points,
                scalars,
                reply,
            } => {
                let _ = reply.send(backend.msm(&points, &scalars));
            }
            Job::Fft {
                values,
                inverse,
                reply,
            } => {
                let _ = reply.send(backend.fft(values, inverse));
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ReferenceBackend, ReferenceBackendFactory};
    use crate::field::Fp;

    fn inputs(n: usize) -> (Vec<Fp>, Vec<Fp>) {
        let points = (0..n as u64).map(|i| Fp::new(i * 7 + 1)).collect();
        let scalars = (0..n as u64).map(|i| Fp::new(i * i + 5)).collect();
        (points, scalars)
    }

    fn pool(worker_count: usize, chunk_size: usize) -> WorkerPool<ReferenceBackendFactory> {
        WorkerPool::init(
            &ReferenceBackendFactory::new(),
            PoolConfig {
                worker_count,
                chunk_size,
                fft_parallel_threshold: 8,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_msm_independent_of_chunking() {
        let (points, scalars) = inputs(203);
        let expected = ReferenceBackend::new().msm(&points, &scalars).unwrap();
        for (workers, chunk) in [(1, 1000), (2, 7), (4, 16), (8, 1), (3, 64)] {
            let pool = pool(workers, chunk);
            let result = pool.multi_scalar_multiply(&points, &scalars).await.unwrap();
            assert_eq!(result, expected, "workers={workers} chunk={chunk}");
        }
    }

    #[tokio::test]
    async fn test_msm_single_element() {
        let pool = pool(4, 16);
        let result = pool
            .multi_scalar_multiply(&[Fp::new(6)], &[Fp::new(7)])
            .await
            .unwrap();
        assert_eq!(result, Fp::new(42));
    }

    #[tokio::test]
    async fn test_msm_rejects_bad_input() {
        let pool = pool(2, 8);
        assert!(matches!(
            pool.multi_scalar_multiply(&[], &[]).await,
            Err(BackendError::InvalidInput(_))
        ));
        assert!(matches!(
            pool.multi_scalar_multiply(&[Fp::ONE], &[]).await,
            Err(BackendError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_fft_matches_single_backend() {
        let backend = ReferenceBackend::new();
        for n in [4usize, 8, 64, 256] {
            let values: Vec<Fp> = (0..n as u64).map(|i| Fp::new(i * 3 + 2)).collect();
            let expected = backend.fft(values.clone(), false).unwrap();
            for workers in [1usize, 2, 4, 6] {
                let pool = pool(workers, 16);
                let result = pool.fft(values.clone(), false).await.unwrap();
                assert_eq!(result, expected, "n={n} workers={workers}");
            }
        }
    }

    #[tokio::test]
    async fn test_fft_inverse_roundtrip_through_pool() {
        let pool = pool(4, 16);
        let values: Vec<Fp> = (0..128u64).map(|i| Fp::new(i + 11)).collect();
        let transformed = pool.fft(values.clone(), false).await.unwrap();
        let restored = pool.fft(transformed, true).await.unwrap();
        assert_eq!(restored, values);
    }

    #[tokio::test]
    async fn test_small_domain_single_worker_fallback() {
        // Below the threshold of 8 the pool must not split; correctness is
        // the same either way, so just check the result.
        let pool = pool(4, 16);
        let values = vec![Fp::new(1), Fp::new(2), Fp::new(3), Fp::new(4)];
        let expected = ReferenceBackend::new().fft(values.clone(), false).unwrap();
        assert_eq!(pool.fft(values, false).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_rejects_work() {
        let mut pool = pool(2, 8);
        pool.destroy();
        pool.destroy();
        let (points, scalars) = inputs(4);
        assert!(matches!(
            pool.multi_scalar_multiply(&points, &scalars).await,
            Err(BackendError::PoolDestroyed)
        ));
    }

    #[test]
    fn test_init_rejects_zero_workers() {
        let result = WorkerPool::init(
            &ReferenceBackendFactory::new(),
            PoolConfig {
                worker_count: 0,
                chunk_size: 8,
                fft_parallel_threshold: 8,
            },
        );
        assert!(matches!(result, Err(BackendError::InitializationError(_))));
    }

    struct FailingFactory;
    impl BackendFactory for FailingFactory {
        type B = ReferenceBackend;
        fn create(&self) -> BackendResult<ReferenceBackend> {
            Err(BackendError::InitializationError("no SRS available".into()))
        }
    }

    #[test]
    fn test_init_propagates_factory_failure() {
        let result = WorkerPool::init(&FailingFactory, PoolConfig::default());
        assert!(matches!(result, Err(BackendError::InitializationError(_))));
    }
}
