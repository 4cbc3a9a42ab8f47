pub mod layer;
pub mod overlay;
