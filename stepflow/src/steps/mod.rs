//! Step definitions and the values that flow between step invocations.

mod artifact;
mod definition;
mod invocation;
mod materializer;

pub use artifact::{ExternalArtifact, StepArtifact, StepOutputs};
pub use definition::{step, FnStep, StepBuilder, StepDefinition, StepSignature};
pub use invocation::{NewInvocation, StepInvocation};
pub use materializer::{MaterializerRegistry, BUILTIN_MATERIALIZER_MODULE};
