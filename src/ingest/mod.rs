pub mod backfill;
pub mod dispatcher;
pub mod queue;

pub use backfill::{BackfillReport, Backfiller};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use queue::{ChannelJobQueue, Delivery, JobEnvelope, JobQueue, LoadReceipt, LoadRequest};
