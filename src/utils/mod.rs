pub mod constants;
pub mod sweep_file;
pub mod synthetic;
pub mod units;
