pub mod config;
pub mod downloader;
pub mod integrity;
pub mod manager;
pub mod manifest;
pub mod models;
pub mod planner;
pub mod post_install;
pub mod state_manager;

/// Types a front-end needs to run a patch session.
pub mod prelude {
    pub use crate::config::{LauncherConfig, ServerAddress, ServerSettings};
    pub use crate::downloader::{DownloadError, DownloadOptions, Downloader};
    pub use crate::manager::{PatchError, Patcher, SessionConfig, SessionHandle};
    pub use crate::models::{
        ByteProgress, PatchEvent, SessionPhase, SessionReport, SessionStatus, TransferOutcome,
        VerifiedState,
    };
    pub use crate::post_install::PostInstall;
    pub use crate::state_manager::StateManager;
}
