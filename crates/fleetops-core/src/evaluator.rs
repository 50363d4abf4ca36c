//! Configuration evaluators

use crate::definition::Evaluation;
use crate::error::{EvalError, Result};
use crate::parser::parse_source;
use crate::template::TemplateProcessor;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Turns a deployment's sources and arguments into resource definitions
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, sources: &[PathBuf], args: &BTreeMap<String, String>)
    -> Result<Evaluation>;
}

/// Renders every source with Tera and parses the result as KDL
#[derive(Debug, Clone, Default)]
pub struct KdlEvaluator {
    /// Expose `FLEETOPS_VAR_*` environment variables to templates
    pub env_variables: bool,
}

impl KdlEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env_variables(mut self) -> Self {
        self.env_variables = true;
        self
    }
}

impl Evaluator for KdlEvaluator {
    #[tracing::instrument(skip(self, args), fields(sources = sources.len()))]
    fn evaluate(
        &self,
        sources: &[PathBuf],
        args: &BTreeMap<String, String>,
    ) -> Result<Evaluation> {
        if sources.is_empty() {
            return Err(EvalError::NoSources);
        }

        let mut processor = TemplateProcessor::new();
        if self.env_variables {
            processor.add_env_variables();
        }
        processor.add_args(args);

        let mut evaluation = Evaluation::default();
        for source in sources {
            let rendered = processor.render_file(source)?;
            parse_source(&rendered, source, &mut evaluation)?;
        }

        tracing::debug!(
            definitions = evaluation.definitions.len(),
            "Evaluated deployment sources"
        );
        Ok(evaluation)
    }
}
