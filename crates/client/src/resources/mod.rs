//! Resource adapters
//!
//! Thin bindings from the generic subscription machinery to concrete
//! resource kinds, plus the plain request/response wrappers. Adapters
//! describe *what* to subscribe to and *how* to fold a notification
//! into state; none of them contain protocol logic.

pub mod files;
pub mod git;
pub mod sessions;
pub mod settings;
pub mod watch;
pub mod worktrees;

pub use sessions::{SessionList, SessionListState};
pub use settings::{SettingsHandle, SettingsState};
pub use watch::FsWatch;
