//! Validation and bulk loading (the loader).
//!
//! Split in three: the control plane (live schema, truncate, widening),
//! the validator (reconcile a frame against the live table), and the
//! stream loader (chunked HTTP ingestion). The runner composes them.

pub mod control;
pub mod stream;
pub mod validate;

pub use control::{ControlPlane, LiveColumn, MySqlControlPlane};
pub use stream::{
    ChunkRequest, ChunkTransport, FrameLoadStats, HttpChunkTransport, LoadResult, LoadStatus,
    StreamLoadResponse, StreamLoader, TransportFailure,
};
pub use validate::{reconcile, Reconciled};
