pub mod day_plan;
pub mod note;
pub mod timestamp;

pub use day_plan::DayPlan;
pub use note::{sort_notes, sorted_notes, Block, ChecklistItem, Note, NotePatch};
