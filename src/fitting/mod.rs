pub mod circle;
pub mod common;
