//! File access over the shared connection

use serde_json::Value;

use portside_protocol::methods::{self, FileGetParams, FileGetResult, FileWriteParams};

use crate::client::Client;
use crate::error::ClientError;

impl Client {
    /// Fetch a directory listing or a file's content. An empty path is
    /// the workspace root.
    pub async fn file_get(&self, path: impl Into<String>) -> Result<FileGetResult, ClientError> {
        self.call(methods::FILE_GET, &FileGetParams { path: path.into() })
            .await
    }

    /// Write a file's content.
    pub async fn file_write(
        &self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        let _: Value = self
            .call(
                methods::FILE_WRITE,
                &FileWriteParams {
                    path: path.into(),
                    content: content.into(),
                },
            )
            .await?;
        Ok(())
    }
}
