use circlefit::fitting::circle::batch::{autofit_all, par_autofit};
use circlefit::fitting::circle::fitstruct::{DelayMode, EntireModelParams, FitConfig, Sweep};
use circlefit::fitting::circle::geometry::fit_circle;
use circlefit::fitting::circle::resonator::autofit;
use circlefit::utils::synthetic::notch_sweep;
use criterion::{criterion_group, criterion_main, Criterion};

fn resonator(fr: f64) -> Sweep {
    let params = EntireModelParams {
        fr,
        abs_qc: 1.5e4,
        qr: 8.5e3,
        phi0: 0.1,
        delay: 25e-9,
        amp_norm: 0.3,
        alpha: 1.2,
    };
    notch_sweep(&params, 10.0, 401).expect("Could not build sweep")
}

fn criterion_benchmark(c: &mut Criterion) {
    let sweep = resonator(5e9);
    let sweeps: Vec<Sweep> = (0..32).map(|i| resonator(4e9 + 5e7 * i as f64)).collect();
    let config = FitConfig {
        delay: DelayMode::Fit { guess: true },
        ..Default::default()
    };

    c.bench_function("Algebraic circle fit", |b| {
        b.iter(|| fit_circle(sweep.response(), false).expect("Could not fit circle"))
    });
    c.bench_function("Refined circle fit", |b| {
        b.iter(|| fit_circle(sweep.response(), true).expect("Could not fit circle"))
    });
    c.bench_function("Autofit", |b| {
        b.iter(|| autofit(&sweep, &config).expect("Could not fit sweep"))
    });
    c.bench_function("Autofit 32 sweeps", |b| {
        b.iter(|| autofit_all(&sweeps, &config).expect("Could not fit sweeps"))
    });
    c.bench_function("Parallel autofit 32 sweeps", |b| {
        b.iter(|| par_autofit(&sweeps, &config).expect("Could not fit sweeps"))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
