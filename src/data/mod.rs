pub mod dataset;
pub mod indicators;
pub mod preprocess;

pub use dataset::{Dataset, Value};
pub use indicators::add_technical_indicators;
pub use preprocess::{DataPreprocessor, FeatureSpec, NormalizationParams, PreparedData};
