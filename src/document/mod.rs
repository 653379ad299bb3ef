// Document module - THE SHARED VALUE
// Data model, id generation, clock and last-writer-wins merge

mod merge;
mod model;

pub use merge::{merge, merge_with_result, MergeOutcome};
pub use model::{
    generate_id, Clock, Document, DocumentError, Item, ID_LENGTH, MAX_CLOCK_SKEW_MS,
};
