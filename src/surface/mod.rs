pub mod config;
pub mod reconstruct;
pub mod render;
pub mod trajectory;

pub use config::{Colormap, VisualizationConfig};
pub use reconstruct::{linspace, LossSurface, SurfaceReconstructor, SurfaceRequest, TrajectoryPoint};
pub use render::{encode_png, render_frame, save_frame_png, RenderOptions};
pub use trajectory::{Animation, Frame, Frames};
