//! Fleetops core
//!
//! Resource definitions and the evaluator that produces them from KDL
//! sources rendered through Tera templates.

pub mod definition;
pub mod error;
pub mod evaluator;
pub mod parser;
pub mod template;

pub use definition::{DEPENDS_ON, Definition, Evaluation, NetworkInfo};
pub use error::{EvalError, Result};
pub use evaluator::{Evaluator, KdlEvaluator};
pub use parser::{DEFAULT_MACHINE_BACKEND, KEYPAIR_TYPE};
pub use template::TemplateProcessor;
