pub mod dispatcher;
pub mod types;

pub use dispatcher::DownloadDispatcher;
pub use types::{
    DownloadCallbacks, DownloadError, DownloadOptions, DownloadParams, DownloadType, Downloader,
    MessageEvent, MessageFn, ProgressEvent, ProgressFn, ProgressKind, TaskInfo, TaskStatus,
};
