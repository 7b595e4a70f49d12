use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("a download with {remaining} outstanding chunks is already running")]
    DownloadInProgress { remaining: usize },
    #[error("download request lists no chunks")]
    EmptyRequest,
}
