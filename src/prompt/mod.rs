//! Prompt System - built-in Handlebars templates per prompt variant
//!
//! The engine only asks for a template by variant and name; the wording lives
//! here and can be overridden from a templates directory.

mod loader;
mod render;

pub use loader::{
    CRITIC_RUBRIC, CRITIC_SYSTEM, EMPTY_CALLS, FINISH_REJECTED, NO_ACTION, PASSING_SUGGESTION, PROGRESS_REVIEW,
    PromptLibrary, PromptVariant, SYSTEM, TASK, TEMPLATE_NAMES,
};
pub use render::PromptRenderer;
