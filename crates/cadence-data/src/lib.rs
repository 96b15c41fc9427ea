pub mod linear;
pub mod loader;
pub mod schema;

pub use linear::LinearEvaluator;
pub use loader::{DataLoadError, LoadedModel, load_model};
