pub mod cancel;
pub mod config;
pub mod error;
pub mod integrity;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod sink;
pub mod transfer;

pub use error::{Error, Result};

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::cancel::StopToken;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::metadata::MetadataClient;
    pub use crate::models::{
        BatchOutcome, BatchReport, BatchState, Collection, Item, ItemStatus, MediaFormat,
        TransferRequest,
    };
    pub use crate::orchestrator::BatchOrchestrator;
    pub use crate::progress::{ChannelProgress, Fanout, LogProgress, ProgressEvent, ProgressTracker};
    pub use crate::sink::{ArtifactSink, DirectorySink};
    pub use crate::transfer::{HttpTransferClient, TransferClient};
}
