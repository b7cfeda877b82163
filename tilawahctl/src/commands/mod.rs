mod clips;
mod index;
mod ingest;
mod repair;

pub use clips::{clips, ClipCommands};
pub use index::{index, IndexCommands};
pub use ingest::{ingest, IngestArgs};
pub use repair::{repair, RepairCommands};
