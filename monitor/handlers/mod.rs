pub mod events;
pub mod surface;
pub mod train;
