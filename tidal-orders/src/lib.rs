//! Order management: the shared order store and the lifecycle pipeline.

mod pipeline;
mod store;

pub use pipeline::{OrderError, OrderPipeline, OrderSubmission};
pub use store::{OrderQuery, OrderStore, OrderUpdates, StoreError};
