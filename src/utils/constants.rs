/// Reduced Planck constant in J s
pub const HBAR: f64 = 1.054_571_817e-34;

pub const GHZ_TO_HZ: f64 = 1e9;
pub const MHZ_TO_HZ: f64 = 1e6;
