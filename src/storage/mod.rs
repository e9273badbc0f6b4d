//! Persistent state for the coordinator.
//!
//! All coordinator state lives in a key-value store with ordered key
//! iteration (etcd in production, an in-memory map in tests and
//! single-process runs). The hierarchical keyspace:
//!
//! - `/centro/nodes/<nodeID>`: node registry
//! - `/centro/jobs/queue/<jobID>`: submitted jobs awaiting dispatch
//! - `/centro/jobs/fail-queue/<jobID>`: jobs parked for retry
//! - `/centro/jobs/active/<jobID>`: assignment records
//! - `/centro/jobs/history/<jobID>`: terminal records
//! - `/centro/jobs/events/<jobID>/<nanoTimestamp>`: append-only event log
//! - `/centro/jobs/instance_data/<jobID>`: latest instance telemetry

pub mod etcd;
pub mod jobs;
pub mod kv;
pub mod registry;

pub use jobs::JobStore;
pub use kv::{GetOptions, KvStore, MemoryKv, SortOrder};
pub use registry::NodeRegistry;

pub const NODES_PREFIX: &str = "/centro/nodes/";
pub const JOB_QUEUE_PREFIX: &str = "/centro/jobs/queue/";
pub const FAIL_QUEUE_PREFIX: &str = "/centro/jobs/fail-queue/";
pub const JOB_ACTIVE_PREFIX: &str = "/centro/jobs/active/";
pub const JOB_HISTORY_PREFIX: &str = "/centro/jobs/history/";
pub const JOB_EVENTS_PREFIX: &str = "/centro/jobs/events/";
pub const INSTANCE_DATA_PREFIX: &str = "/centro/jobs/instance_data/";
