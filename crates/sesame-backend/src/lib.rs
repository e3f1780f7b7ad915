//! # sesame-backend
//!
//! Crypto backend boundary and parallel worker pool for the Sesame rollup
//! sequencer.
//!
//! The expensive kernels of proof aggregation (multi-scalar multiplication
//! and polynomial FFTs) are consumed through the opaque
//! [`backend::Backend`] trait and parallelized by [`pool::WorkerPool`],
//! which binds one independent backend instance to each of its workers.
//! A [`backend::ReferenceBackend`] over the Goldilocks field
//! ([`field::Fp`]) provides deterministic, dependency-free semantics for
//! tests and development.

pub mod backend;
pub mod error;
pub mod field;
pub mod pool;

pub use backend::{Backend, BackendFactory, ReferenceBackend, ReferenceBackendFactory};
pub use error::{BackendError, BackendResult};
pub use field::Fp;
pub use pool::{PoolConfig, WorkerPool};
