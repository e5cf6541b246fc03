pub mod collect;
pub mod plan;

pub use collect::{Inputs, collect};
pub use plan::{Plan, Quotas, Target, WorkClass, WorkItem, plan};
