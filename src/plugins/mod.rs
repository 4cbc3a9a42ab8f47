pub mod cluster;
pub mod draw;
pub mod heatmap;
