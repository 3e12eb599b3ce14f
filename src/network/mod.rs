pub mod network;
pub mod params;

pub use network::{evaluate_with, forward_with, ForwardPass, NetworkModel};
pub use params::{Gradients, ModelParameters, ParamTensor, WeightCoord};
