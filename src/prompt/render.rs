//! Prompt Renderer - Render templates with context variables using Handlebars

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{CritloopError, Result};

/// Renders prompt templates using Handlebars templating
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    /// Create a new PromptRenderer with default settings
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Render an ad-hoc template string with any serializable context
    pub fn render_with<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| CritloopError::Prompt(format!("Failed to render template: {}", e)))
    }

    /// Register (or replace) a named template
    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| CritloopError::Prompt(format!("Failed to register template '{}': {}", name, e)))
    }

    /// Render a previously registered template
    pub fn render_named<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        if !self.has_template(name) {
            return Err(CritloopError::Prompt(format!("Unknown template '{}'", name)));
        }
        self.handlebars
            .render(name, context)
            .map_err(|e| CritloopError::Prompt(format!("Failed to render '{}': {}", name, e)))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_template(name).is_some()
    }
}
