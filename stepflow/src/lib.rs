//! # Stepflow
//!
//! Compiles ML step pipelines into deployments and registers them with a
//! metadata store.
//!
//! Stepflow provides:
//!
//! - **Pipeline preparation**: run an entrypoint to record a graph of step invocations
//! - **Layered configuration**: step defaults, pipeline, run-level and call-time layers
//! - **Identity**: version hashes for registration and per-step cache keys
//! - **Coordination**: idempotent registration, build reuse and dispatch to a stack
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepflow::prelude::*;
//!
//! let loader = step("loader").output("dataset", "dict").build()?;
//! let trainer = step("trainer").input("dataset", "dict").output("model", "dict").build()?;
//!
//! let mut pipeline = Pipeline::new("training", move |ctx, _args| {
//!     let dataset = ctx.call(&loader).invoke()?.get("dataset")?;
//!     ctx.call(&trainer).input("dataset", dataset).invoke()?;
//!     Ok(serde_json::Value::Null)
//! });
//!
//! let coordinator = Coordinator::for_active_stack(store, None).await?;
//! coordinator.run(&mut pipeline).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod identity;
pub mod observability;
pub mod pipeline;
pub mod stack;
pub mod steps;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::compiler::{Compiler, PipelineDeployment, PipelineSpec};
    pub use crate::config::{
        EnvironmentConfig, PipelineConfigurationUpdate, PipelineRunConfiguration, Schedule,
        Source, StepConfigurationUpdate,
    };
    pub use crate::coordinator::{Coordinator, RunOutcome};
    pub use crate::errors::{
        ConfigurationError, ContractErrorInfo, GraphError, StackError, StepflowError, StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{EntrypointArgs, Pipeline, PipelineContext, RunOptions};
    pub use crate::stack::{LocalStack, Stack};
    pub use crate::steps::{step, ExternalArtifact, StepArtifact, StepDefinition};
    pub use crate::store::{InMemoryStore, MetadataStore};
}
