pub mod job;
pub mod lease;
pub mod selector;

pub use job::{enqueue, Job, Lease, NewJob, ProcessingStatus};
pub use lease::LeaseStore;
pub use selector::{JobSelector, Selection};
