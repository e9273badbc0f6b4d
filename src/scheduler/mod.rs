pub mod dispatcher;
pub mod job;
pub mod matcher;
pub mod reconciler;

pub use dispatcher::{Dispatcher, GetJobOutcome};
pub use job::{InstanceTelemetry, Job, JobRecord, JobState, JobType};
pub use matcher::Rejection;
pub use reconciler::Reconciler;
