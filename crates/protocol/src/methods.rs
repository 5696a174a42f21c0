//! Request method names with their parameter and result payloads
//!
//! Subscription methods return a server-assigned token in `id`; the
//! matching `*.unsubscribe` takes that token back. Everything else is
//! plain request/response.

use serde::{Deserialize, Serialize};

use crate::types::{
    Entry, FileContent, GitDiff, GitStatus, SessionMeta, Settings, WorktreeInfo,
};
use crate::SubscriptionId;

// Unary methods
pub const FILE_GET: &str = "file.get";
pub const FILE_WRITE: &str = "file.write";
pub const GIT_STATUS: &str = "git.status";
pub const GIT_DIFF: &str = "git.diff";
pub const WORKTREE_LIST: &str = "worktree.list";
pub const WORKTREE_CREATE: &str = "worktree.create";
pub const WORKTREE_DELETE: &str = "worktree.delete";
pub const SETTINGS_UPDATE: &str = "settings.update";
pub const SESSION_CREATE: &str = "session.create";
pub const SESSION_DELETE: &str = "session.delete";
pub const SESSION_RENAME: &str = "session.rename";

// Subscriptions
pub const WATCH_SUBSCRIBE: &str = "watch.subscribe";
pub const WATCH_UNSUBSCRIBE: &str = "watch.unsubscribe";
pub const SESSION_SUBSCRIBE: &str = "session.subscribe";
pub const SESSION_UNSUBSCRIBE: &str = "session.unsubscribe";
pub const SETTINGS_SUBSCRIBE: &str = "settings.subscribe";
pub const SETTINGS_UNSUBSCRIBE: &str = "settings.unsubscribe";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileGetParams {
    pub path: String,
}

/// Result of `file.get` — a directory listing or a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileGetResult {
    #[serde(rename = "type")]
    pub kind: FileGetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<Entry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileContent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileGetKind {
    Directory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWriteParams {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitDiffParams {
    pub path: String,
    pub staged: bool,
}

pub type GitStatusResult = GitStatus;
pub type GitDiffResult = GitDiff;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeListResult {
    pub worktrees: Vec<WorktreeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeCreateParams {
    pub name: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeCreateResult {
    pub worktree: WorktreeInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeDeleteParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsUpdateParams {
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDeleteParams {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRenameParams {
    pub session_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSubscribeParams {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSubscribeResult {
    pub id: SubscriptionId,
}

/// Token handed back on any `*.unsubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub id: SubscriptionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSubscribeResult {
    pub id: SubscriptionId,
    pub sessions: Vec<SessionMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSubscribeResult {
    pub id: SubscriptionId,
    pub settings: Settings,
}
