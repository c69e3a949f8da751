//! Domain errors

mod model_error;

pub use model_error::ModelError;
