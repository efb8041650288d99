pub mod events;
pub mod ids;
pub mod message;
pub mod options;
pub mod record;
pub mod state;

pub use events::{EventKind, JobEvent};
pub use ids::{JobId, LockToken, REPEAT_ID_PREFIX};
pub use message::NewJob;
pub use options::{Backoff, JobOptions, DEFAULT_JOB_NAME, MAX_PRIORITY};
pub use record::{JobCounts, JobRecord, LeasedJob};
pub use state::JobState;
