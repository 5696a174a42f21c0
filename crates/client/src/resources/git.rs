//! Git state over the shared connection

use portside_protocol::methods::{self, GitDiffParams};
use portside_protocol::types::{GitDiff, GitStatus};

use crate::client::Client;
use crate::error::ClientError;

impl Client {
    pub async fn git_status(&self) -> Result<GitStatus, ClientError> {
        self.call(methods::GIT_STATUS, &serde_json::json!({})).await
    }

    pub async fn git_diff(
        &self,
        path: impl Into<String>,
        staged: bool,
    ) -> Result<GitDiff, ClientError> {
        self.call(
            methods::GIT_DIFF,
            &GitDiffParams {
                path: path.into(),
                staged,
            },
        )
        .await
    }
}
