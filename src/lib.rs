#![allow(non_snake_case)]

// Declare the modules that form the library's public API
pub mod config;
pub mod data_model;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod statistics;
pub mod utils;

pub use data_model::{DocInfo, Document, Token};
pub use error::{PipelineError, Result};
pub use executor::{build_compose_from_config, PipelineExecutor};
pub use pipeline::{
    AsyncCompose, AsyncFilter, AsyncFilterAdapter, AsyncFilterStage, AsyncStage, Compose, Filter,
    FilterStage, Parallel, Stage,
};
pub use statistics::Statistics;
