//! Task scheduling: dependency order and bounded dispatch.
//!
//! [`DispatchPlan`] orders stale entities so callees come before callers,
//! collapsing reference cycles into single units. [`Dispatcher`] drains the
//! plan through a bounded worker pool.

mod dispatch;
mod plan;

pub use dispatch::{DispatchReport, DispatchSettings, Dispatcher, FailedEntity};
pub use plan::{DispatchPlan, DispatchUnit};
