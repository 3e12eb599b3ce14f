pub mod bundle;
pub mod lock;
pub mod npz;
pub mod store;

pub use bundle::{Artifact, CheckpointBundle, FeatureInfo, FinalArtifacts, SnapshotRef, TrainingMetadata};
pub use store::{CheckpointStore, ValidationResult};
