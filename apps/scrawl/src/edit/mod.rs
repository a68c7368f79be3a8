pub mod caret;
pub mod input;
pub mod pipeline;

pub use caret::Caret;
pub use input::{EditIntent, InputQueue};
pub use pipeline::{EditPipeline, EditReceipt, PatchOutcome};
