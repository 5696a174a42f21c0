//! Worktree management over the shared connection

use serde_json::Value;

use portside_protocol::methods::{
    self, WorktreeCreateParams, WorktreeCreateResult, WorktreeDeleteParams, WorktreeListResult,
};
use portside_protocol::types::WorktreeInfo;

use crate::client::Client;
use crate::error::ClientError;

impl Client {
    pub async fn worktree_list(&self) -> Result<Vec<WorktreeInfo>, ClientError> {
        let result: WorktreeListResult =
            self.call(methods::WORKTREE_LIST, &serde_json::json!({})).await?;
        Ok(result.worktrees)
    }

    pub async fn worktree_create(
        &self,
        name: impl Into<String>,
        branch: impl Into<String>,
    ) -> Result<WorktreeInfo, ClientError> {
        let result: WorktreeCreateResult = self
            .call(
                methods::WORKTREE_CREATE,
                &WorktreeCreateParams {
                    name: name.into(),
                    branch: branch.into(),
                },
            )
            .await?;
        Ok(result.worktree)
    }

    pub async fn worktree_delete(
        &self,
        name: impl Into<String>,
        force: bool,
    ) -> Result<(), ClientError> {
        let _: Value = self
            .call(
                methods::WORKTREE_DELETE,
                &WorktreeDeleteParams {
                    name: name.into(),
                    force: force.then_some(true),
                },
            )
            .await?;
        Ok(())
    }
}
