pub mod math;
pub mod activation;
pub mod network;
pub mod loss;
pub mod optim;
pub mod data;
pub mod train;
pub mod checkpoint;
pub mod surface;
pub mod predict;
pub mod pipeline;
pub mod error;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::Activation;
pub use network::network::NetworkModel;
pub use network::params::{ModelParameters, WeightCoord};
pub use loss::mse::MseLoss;
pub use optim::adam::{Adam, AdamSettings};
pub use data::dataset::Dataset;
pub use data::preprocess::{DataPreprocessor, FeatureSpec, NormalizationParams, PreparedData};
pub use train::{
    CancelHandle, ChannelSink, EventSink, LineProtocolSink, NullSink, ProgressEvent, SessionState, TrainConfig,
    TrainingOutcome, TrainingSession,
};
pub use checkpoint::{CheckpointBundle, CheckpointStore, ValidationResult};
pub use surface::{Animation, LossSurface, SurfaceReconstructor, SurfaceRequest, VisualizationConfig};
pub use predict::{Predictor, RegressionMetrics};
pub use pipeline::RunConfig;
pub use error::{Error, Result};
