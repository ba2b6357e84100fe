pub mod error;
pub mod least_squares;
pub mod line_fit;
