//! The active-pipeline slot.
//!
//! At most one pipeline is under construction per thread. Entering a pipeline
//! returns a guard; dropping the guard clears the slot, including when the
//! entrypoint fails or panics.

use crate::errors::GraphError;
use std::cell::RefCell;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ActivePipeline {
    name: String,
    pass_id: Uuid,
}

thread_local! {
    static ACTIVE_PIPELINE: RefCell<Option<ActivePipeline>> = const { RefCell::new(None) };
}

/// Clears the active-pipeline slot when dropped.
#[derive(Debug)]
#[must_use = "the pipeline is deactivated as soon as the guard is dropped"]
pub struct ActivationGuard {
    pass_id: Uuid,
}

impl ActivationGuard {
    /// Returns the preparation pass this guard belongs to.
    #[must_use]
    pub const fn pass_id(&self) -> Uuid {
        self.pass_id
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        ACTIVE_PIPELINE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.as_ref().is_some_and(|active| active.pass_id == self.pass_id) {
                *slot = None;
            }
        });
    }
}

/// Activates a pipeline preparation pass on the current thread.
///
/// # Errors
///
/// Returns `ConcurrentActivation` if another pipeline is already active.
pub fn enter(name: &str, pass_id: Uuid) -> Result<ActivationGuard, GraphError> {
    ACTIVE_PIPELINE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(active) = slot.as_ref() {
            return Err(GraphError::ConcurrentActivation {
                active: active.name.clone(),
                requested: name.to_string(),
            });
        }
        *slot = Some(ActivePipeline {
            name: name.to_string(),
            pass_id,
        });
        Ok(ActivationGuard { pass_id })
    })
}

/// Returns the name of the pipeline active on the current thread.
#[must_use]
pub fn active_pipeline() -> Option<String> {
    ACTIVE_PIPELINE.with(|slot| slot.borrow().as_ref().map(|active| active.name.clone()))
}

/// Returns true if the given preparation pass is the active one.
#[must_use]
pub fn is_active(pass_id: Uuid) -> bool {
    ACTIVE_PIPELINE.with(|slot| {
        slot.borrow()
            .as_ref()
            .is_some_and(|active| active.pass_id == pass_id)
    })
}
