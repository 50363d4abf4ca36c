pub mod deploy;
pub mod deployments;
pub mod machines;
pub mod resources;
