use circlefit::error::CirclefitError;
use circlefit::fitting::circle::batch::{autofit_all, par_autofit};
use circlefit::fitting::circle::fitstruct::{
    Autofit, DelayMode, FitConfig, PortFit, PortType, Sweep,
};
use circlefit::fitting::circle::resonator::{
    fit_entire_model, photons_in_resonator, single_photon_limit,
};
use circlefit::fitting::circle::transmission::fit_transmission;
use circlefit::fitting::common::least_squares::SolverConfig;
use circlefit::utils::constants::{GHZ_TO_HZ, MHZ_TO_HZ};
use circlefit::utils::sweep_file::{cut_sweep, load_sweep, SweepFileOptions, SweepFormat};
use circlefit::utils::units::PowerUnit;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub type BinResult<T, E = Box<dyn std::error::Error + Send + Sync>> = Result<T, E>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = bin_main() {
        eprintln!("error: {e}");
        if let Some(e) = e.source() {
            eprintln!("error: {e}");
        }
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sweep file(s) to fit, one resonance per file
    #[arg(num_args = 1..)]
    infiles: Vec<PathBuf>,

    /// The resonance is a peak in |S| instead of a dip
    #[arg(long)]
    peak: bool,

    /// Fit a directly coupled resonator measured in reflection
    #[arg(long)]
    reflection: bool,

    /// Fit the power transmission through the resonator with a Lorentzian
    #[arg(long, conflicts_with_all = ["reflection", "full_model"])]
    transmission: bool,

    /// Refine the algebraic circle fit geometrically
    #[arg(long)]
    refine: bool,

    /// Fixed cable delay in seconds
    #[arg(long, conflicts_with = "fit_delay")]
    delay: Option<f64>,

    /// Fit the cable delay instead of assuming none
    #[arg(long)]
    fit_delay: bool,

    /// Keep the background amplitude slope of the pre-fit
    #[arg(long)]
    with_slope: bool,

    /// Encoding of the response columns
    #[arg(long, default_value = "realimag")]
    format: SweepFormat,

    /// Factor taking the frequency column to Hz
    #[arg(long, default_value = "1.0")]
    fdata_unit: f64,

    /// Lines to skip at the top of each file
    #[arg(long, default_value = "0")]
    header_rows: usize,

    /// Only fit frequencies within F1..F2, in Hz
    #[arg(long, num_args = 2, value_names = ["F1", "F2"])]
    cut: Option<Vec<f64>>,

    /// Follow the circle fit with a joint fit of the full notch model
    #[arg(long)]
    full_model: bool,

    /// Suppression of a parasitic background path in dB, sets the Fano ranges of Qi and Qc
    #[arg(long, default_value = "15.0")]
    isolation: f64,

    /// Input power at the resonator in dBm, to report the photon number
    #[arg(long, allow_hyphen_values = true)]
    power: Option<f64>,

    /// Fit the files in parallel
    #[arg(long)]
    parallel: bool,
}

impl Args {
    fn fit_config(&self) -> FitConfig {
        let delay = match (self.delay, self.fit_delay) {
            (Some(delay), _) => DelayMode::Fixed(delay),
            (None, true) => DelayMode::Fit { guess: true },
            (None, false) => DelayMode::default(),
        };
        FitConfig {
            port: if self.reflection {
                PortType::Reflection
            } else {
                PortType::Notch
            },
            is_peak: self.peak,
            ignore_slope: !self.with_slope,
            delay,
            refine_results: self.refine,
            isolation_db: self.isolation,
            ..Default::default()
        }
    }

    fn file_options(&self) -> SweepFileOptions {
        SweepFileOptions {
            format: self.format,
            fdata_unit: self.fdata_unit,
            header_rows: self.header_rows,
            ..Default::default()
        }
    }
}

fn read_sweep(path: &Path, args: &Args) -> Result<Sweep, CirclefitError> {
    let sweep = load_sweep(path, &args.file_options())?;
    match args.cut.as_deref() {
        Some(&[f1, f2]) => Ok(cut_sweep(&sweep, f1, f2)?),
        _ => Ok(sweep),
    }
}

fn print_fit(path: &Path, fit: &Autofit, power: Option<f64>) {
    let result = &fit.result;
    let (phi0, fano) = match result {
        PortFit::Notch(r) => (r.phi0, r.fano),
        PortFit::Reflection(r) => (0.0, r.fano),
    };
    print!(
        "{}: fr = {:.9} GHz, linewidth = {:.6} MHz, Ql = {:.1}, Qc = {:.1}, Qi = {:.1}, \
         phi0 = {:.4}, chi2 = {:.3e}, Fano Qi = [{:.1}, {:.1}], Fano Qc = [{:.1}, {:.1}]",
        path.display(),
        result.fr() / GHZ_TO_HZ,
        result.fr() / result.qr() / MHZ_TO_HZ,
        result.qr(),
        result.qc(),
        result.qi(),
        phi0,
        result.chi_square(),
        fano.qi_min,
        fano.qi_max,
        fano.qc_min,
        fano.qc_max,
    );
    match power {
        Some(dbm) => println!(
            ", photons = {:.3e}",
            photons_in_resonator(result, dbm, PowerUnit::Dbm)
        ),
        None => println!(
            ", single photon limit = {:.2} dBm",
            single_photon_limit(result, PowerUnit::Dbm)
        ),
    }
}

fn bin_main() -> BinResult<()> {
    let args = Args::parse();
    let config = args.fit_config();

    let mut sweeps = vec![];
    for path in &args.infiles {
        sweeps.push(read_sweep(path, &args)?);
    }
    info!(files = sweeps.len(), "sweeps loaded");

    if args.transmission {
        for (path, sweep) in args.infiles.iter().zip(&sweeps) {
            let fit = fit_transmission(sweep.frequencies(), sweep.response(), SolverConfig::default())?;
            println!(
                "{}: fr = {:.9} +- {:.2e} GHz, Ql = {:.1} +- {:.1}, A^2 = {:.4e} +- {:.2e}, chi2 = {:.3e}",
                path.display(),
                fit.fr / GHZ_TO_HZ,
                fit.fr_err / GHZ_TO_HZ,
                fit.qr,
                fit.qr_err,
                fit.amp_sqr,
                fit.amp_sqr_err,
                fit.chi_square,
            );
        }
        return Ok(());
    }

    // Fit the sweeps!
    let fits = if args.parallel {
        par_autofit(&sweeps, &config)?
    } else {
        autofit_all(&sweeps, &config)?
    };

    for ((path, sweep), fit) in args.infiles.iter().zip(&sweeps).zip(&fits) {
        print_fit(path, fit, args.power);
        if args.full_model {
            if args.reflection {
                warn!("the full model fit is only available for notch ports");
                continue;
            }
            let full = fit_entire_model(sweep, fit, SolverConfig::default())?;
            let (p, e) = (full.params, full.errors);
            println!(
                "    full model: fr = {:.9} +- {:.2e} GHz, Ql = {:.1} +- {:.1}, |Qc| = {:.1} +- {:.1}, \
                 phi0 = {:.4} +- {:.4}, delay = {:.4} +- {:.4} ns, chi2 = {:.3e}",
                p.fr / GHZ_TO_HZ,
                e.fr / GHZ_TO_HZ,
                p.qr,
                e.qr,
                p.abs_qc,
                e.abs_qc,
                p.phi0,
                e.phi0,
                p.delay * 1e9,
                e.delay * 1e9,
                full.chi_square,
            );
        }
    }
    Ok(())
}
