//! Pipeline definitions and step invocation graphs.
//!
//! A pipeline is prepared by running its entrypoint inside an activation
//! scope. Every step the entrypoint invokes is appended to the step
//! invocation graph of that preparation pass.

pub mod activation;
mod context;
mod definition;
mod graph;
mod options;
mod template;

pub use context::{PipelineContext, StepCall};
pub use definition::{Entrypoint, EntrypointArgs, Pipeline, PipelineCall, PipelineDefinition};
pub use graph::{StepInvocationGraph, MAX_ID_SUFFIX};
pub use options::RunOptions;
