//! Circle fit of a single microwave resonator, from raw sweep to quality factors.
pub mod batch;
pub mod calibration;
pub mod delay;
pub mod fitstruct;
pub mod geometry;
pub mod lorentzian;
pub mod phase;
pub mod port;
pub mod resonator;
pub mod transmission;

pub use batch::{autofit_all, par_autofit};
pub use calibration::{do_calibration, do_normalization};
pub use delay::{fit_delay, guess_delay, optimize_delay, remove_cable_delay};
pub use fitstruct::*;
pub use geometry::{center, fit_circle, periodic_angle_distance, periodic_boundary};
pub use lorentzian::fit_skewed_lorentzian;
pub use phase::{phase_fit, phase_fit_wslope};
pub use port::{
    circlefit, circlefit_port, circlefit_reflection, fano_range, s11_reflection, s21_notch,
};
pub use resonator::{autofit, fit_entire_model, photons_in_resonator, single_photon_limit};
pub use transmission::fit_transmission;
