mod error;
mod pipeline;
mod session;

pub use error::{IngestError, IngestResult};
pub use pipeline::{
    upload_hls_package, IngestOptions, IngestOutcome, IngestReport, IngestRequest, IngestState,
    Ingestor,
};
pub use session::{
    drain_queue, ClipDraft, InMemorySessionStore, PendingItem, PendingQueue, Selection,
    SessionStore,
};
