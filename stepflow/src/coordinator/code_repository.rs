//! Source control context of the running process.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::store::CodeReference;

/// Local checkout of a registered code repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRepositoryContext {
    /// Id of the registered code repository.
    pub code_repository_id: Uuid,
    /// Root directory of the checkout.
    pub root: PathBuf,
    /// Commit the checkout is at.
    pub current_commit: String,
    /// Whether the checkout has uncommitted changes.
    pub is_dirty: bool,
}

impl LocalRepositoryContext {
    /// Returns a code reference for `source_root`, or `None` for a dirty
    /// checkout.
    ///
    /// Source roots outside the checkout are referenced as the repository
    /// root.
    #[must_use]
    pub fn code_reference(&self, source_root: &Path) -> Option<CodeReference> {
        if self.is_dirty {
            return None;
        }

        let subdirectory = source_root
            .strip_prefix(&self.root)
            .ok()
            .map(|relative| {
                relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .filter(|relative| !relative.is_empty())
            .unwrap_or_else(|| ".".to_string());

        Some(CodeReference {
            commit: self.current_commit.clone(),
            subdirectory,
            code_repository_id: self.code_repository_id,
        })
    }
}

/// Finds the code repository the process runs from.
#[cfg_attr(test, mockall::automock)]
pub trait CodeRepository: Send + Sync {
    /// Returns the active local checkout, if any.
    fn find_active_repository(&self) -> Option<LocalRepositoryContext>;
}

/// Used when no code repository is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCodeRepository;

impl CodeRepository for NoCodeRepository {
    fn find_active_repository(&self) -> Option<LocalRepositoryContext> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(is_dirty: bool) -> LocalRepositoryContext {
        LocalRepositoryContext {
            code_repository_id: Uuid::nil(),
            root: PathBuf::from("/work/repo"),
            current_commit: "3f2a9c1".to_string(),
            is_dirty,
        }
    }

    #[test]
    fn test_code_reference_subdirectory() {
        let reference = context(false)
            .code_reference(Path::new("/work/repo/pipelines/training"))
            .unwrap();
        assert_eq!(reference.subdirectory, "pipelines/training");
        assert_eq!(reference.commit, "3f2a9c1");
    }

    #[test]
    fn test_code_reference_at_root() {
        let reference = context(false).code_reference(Path::new("/work/repo")).unwrap();
        assert_eq!(reference.subdirectory, ".");
    }

    #[test]
    fn test_dirty_checkout_has_no_reference() {
        assert!(context(true).code_reference(Path::new("/work/repo")).is_none());
        assert!(NoCodeRepository.find_active_repository().is_none());
    }
}
