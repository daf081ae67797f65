// src/pipeline/mod.rs

pub mod async_compose;
pub mod async_filter;
pub mod compose;
pub mod filter;
pub mod filters;
pub mod parallel;
mod stage_core;

pub use async_compose::{AsyncCompose, AsyncStage};
pub use async_filter::{AsyncFilter, AsyncFilterAdapter, AsyncFilterStage};
pub use compose::{Compose, Stage, StageSummary};
pub use filter::{DocStream, Filter, FilterClone, FilterStage, FilterStream};
pub use parallel::{Parallel, ParallelIter, WorkerReport};
