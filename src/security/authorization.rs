use crate::database::models::Workspace;
use crate::database::Repository;
use crate::utils::error::ApiError;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Resolves the caller's workspace from their account and enforces tenant
/// isolation (spec §5: "always filtering on workspace_id ... never relying
/// on joins alone"). Every workspace-scoped handler calls `resolve_for_owner`
/// once, then passes the resulting `workspace.id` into every repository call.
pub struct WorkspaceAuthorization {
    repository: Arc<Repository>,
}

impl WorkspaceAuthorization {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    pub async fn resolve_for_owner(&self, owner_id: Uuid) -> Result<Workspace, ApiError> {
        let workspace = self
            .repository
            .get_workspace_by_owner(owner_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("no workspace exists for this account yet".to_string()))?;

        debug!(owner_id = %owner_id, workspace_id = %workspace.id, "resolved workspace for account");
        Ok(workspace)
    }

    /// Enforce that `workspace_id` belongs to `owner_id`, for routes that
    /// take the workspace in the URL rather than deriving it implicitly.
    pub async fn require_ownership(&self, owner_id: Uuid, workspace_id: Uuid) -> Result<(), ApiError> {
        let workspace = self.resolve_for_owner(owner_id).await?;
        if workspace.id != workspace_id {
            return Err(ApiError::Forbidden("workspace does not belong to this account".to_string()));
        }
        Ok(())
    }
}
