//! Template rendering of deployment sources
//!
//! Every source file is rendered with Tera before it is parsed, with the
//! deployment arguments available as variables.

use crate::error::{EvalError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// Template processor
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// Add deployment arguments. Values that read as JSON scalars (numbers,
    /// booleans) are inserted with that type, everything else as a string.
    pub fn add_args(&mut self, args: &BTreeMap<String, String>) {
        for (key, raw) in args {
            let value = match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => v,
                _ => serde_json::Value::String(raw.clone()),
            };
            debug!(key = %key, "Adding deployment argument");
            self.context.insert(key.as_str(), &value);
        }
        info!(arg_count = args.len(), "Added deployment arguments");
    }

    /// Add environment variables carrying the `FLEETOPS_VAR_` prefix,
    /// with the prefix stripped
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        const PREFIX: &str = "FLEETOPS_VAR_";
        let mut count = 0;
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(PREFIX) {
                self.context
                    .insert(name.to_string(), &serde_json::Value::String(value));
                count += 1;
            }
        }
        debug!(env_var_count = count, "Added environment variables");
    }

    pub fn render_str(&mut self, template: &str) -> std::result::Result<String, String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| extract_tera_error_detail(&e))
    }

    /// Read `path` and render it
    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content)
            .map_err(|message| EvalError::Template {
                file: path.to_path_buf(),
                message,
            })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten a Tera error chain, calling out undefined variables
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    if let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "undefined variable `{var_name}` (set it with `fleetops set-args --arg {var_name} <value>`)"
        );
    }

    full_error
}
