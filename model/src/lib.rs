pub mod data;
pub mod error;
pub mod evaluate;
pub mod metrics;
pub mod model;
pub mod package;
pub mod predictor;

pub use error::PackageError;
