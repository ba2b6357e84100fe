//! Loading sweeps from column text files, as written by most network analyzers.
//!
//! Every data line holds a frequency and two response columns. Blank lines and lines starting
//! with `#` or `!` are skipped, which also covers the option and comment lines of Touchstone
//! files. Columns may be separated by whitespace, commas or semicolons.
use crate::fitting::circle::fitstruct::Sweep;
use crate::fitting::common::error::FittingError;
use num_complex::Complex64;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepFileError {
    /// The file could not be read
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A data line could not be interpreted
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },

    /// The file was read but does not describe a usable sweep
    #[error("{0}")]
    Format(String),
}

type Result<T> = std::result::Result<T, SweepFileError>;

/// How the two response columns encode the complex response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepFormat {
    #[default]
    RealImag,
    LinMagPhaseRad,
    LinMagPhaseDeg,
    /// Magnitude in dB, `20 log10 |z|`
    DbMagPhaseRad,
    DbMagPhaseDeg,
}

impl SweepFormat {
    /// Converts one pair of response columns into a complex sample
    pub fn to_complex(self, c1: f64, c2: f64) -> Complex64 {
        match self {
            SweepFormat::RealImag => Complex64::new(c1, c2),
            SweepFormat::LinMagPhaseRad => Complex64::from_polar(c1, c2),
            SweepFormat::LinMagPhaseDeg => Complex64::from_polar(c1, c2.to_radians()),
            SweepFormat::DbMagPhaseRad => Complex64::from_polar(db_to_lin(c1), c2),
            SweepFormat::DbMagPhaseDeg => Complex64::from_polar(db_to_lin(c1), c2.to_radians()),
        }
    }
}

impl FromStr for SweepFormat {
    type Err = SweepFileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "realimag" => Ok(SweepFormat::RealImag),
            "linmagphaserad" => Ok(SweepFormat::LinMagPhaseRad),
            "linmagphasedeg" => Ok(SweepFormat::LinMagPhaseDeg),
            "dbmagphaserad" => Ok(SweepFormat::DbMagPhaseRad),
            "dbmagphasedeg" => Ok(SweepFormat::DbMagPhaseDeg),
            _ => Err(SweepFileError::Format(format!(
                "unknown sweep format '{s}', expected one of realimag, linmagphaserad, \
                 linmagphasedeg, dbmagphaserad, dbmagphasedeg"
            ))),
        }
    }
}

fn db_to_lin(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Layout of a sweep file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepFileOptions {
    pub format: SweepFormat,
    /// Factor taking the frequency column to Hz, e.g. `1e9` for a file in GHz
    pub fdata_unit: f64,
    /// Zero-based columns of the two response values; the frequency is always column 0
    pub columns: (usize, usize),
    /// Lines skipped at the top of the file before comment handling starts
    pub header_rows: usize,
}

impl Default for SweepFileOptions {
    fn default() -> Self {
        SweepFileOptions {
            format: SweepFormat::RealImag,
            fdata_unit: 1.0,
            columns: (1, 2),
            header_rows: 0,
        }
    }
}

/// Reads a sweep from a text file.
///
/// # Errors
/// Will return `Err` if the file cannot be read, a data line is malformed, or the result is not
/// a valid [`Sweep`].
pub fn load_sweep(path: impl AsRef<Path>, options: &SweepFileOptions) -> Result<Sweep> {
    let contents = fs::read_to_string(path)?;
    parse_sweep(&contents, options)
}

/// Parses the contents of a sweep file, see [`load_sweep`].
///
/// # Errors
/// Will return `Err` if a data line is malformed or the result is not a valid [`Sweep`].
pub fn parse_sweep(contents: &str, options: &SweepFileOptions) -> Result<Sweep> {
    let (c1, c2) = options.columns;
    if c1 == 0 || c2 == 0 {
        Err(SweepFileError::Format(
            "column 0 holds the frequency and cannot be a response column".to_string(),
        ))?
    }
    let mut frequencies = vec![];
    let mut response = vec![];
    for (idx, raw_line) in contents.lines().enumerate().skip(options.header_rows) {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|s| !s.is_empty())
            .collect();
        let value = |col: usize| -> Result<f64> {
            let field = fields.get(col).ok_or_else(|| SweepFileError::Parse {
                line: idx + 1,
                msg: format!("expected at least {} columns, found {}", col + 1, fields.len()),
            })?;
            field.parse::<f64>().map_err(|e| SweepFileError::Parse {
                line: idx + 1,
                msg: format!("'{field}': {e}"),
            })
        };
        frequencies.push(value(0)? * options.fdata_unit);
        response.push(options.format.to_complex(value(c1)?, value(c2)?));
    }
    Sweep::new(frequencies, response).map_err(|e| SweepFileError::Format(e.to_string()))
}

/// Keeps the samples with `f1 <= f <= f2`.
///
/// # Errors
/// Will return `Err` if fewer than four samples remain.
pub fn cut_sweep(sweep: &Sweep, f1: f64, f2: f64) -> std::result::Result<Sweep, FittingError> {
    let (frequencies, response): (Vec<f64>, Vec<Complex64>) = sweep
        .frequencies()
        .iter()
        .zip(sweep.response())
        .filter(|&(&f, _)| f1 <= f && f <= f2)
        .map(|(&f, &z)| (f, z))
        .unzip();
    Sweep::new(frequencies, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const TOUCHSTONE_LIKE: &str = "\
! written by a network analyzer
# GHZ S RI R 50
4.99 0.5 0.5

4.995,0.0,-1.0
5.00\t1.0 0.0
5.005 ; 0.25 ; 0.0
";

    #[test]
    fn parses_comments_and_mixed_separators() {
        let options = SweepFileOptions {
            fdata_unit: 1e9,
            ..Default::default()
        };
        let sweep = parse_sweep(TOUCHSTONE_LIKE, &options).unwrap();
        assert_eq!(sweep.len(), 4);
        assert_relative_eq!(sweep.frequencies()[1], 4.995e9, max_relative = 1e-12);
        assert_eq!(sweep.response()[1], Complex64::new(0.0, -1.0));
        assert_eq!(sweep.response()[3], Complex64::new(0.25, 0.0));
    }

    #[test]
    fn converts_magnitude_and_phase_formats() {
        let z = SweepFormat::DbMagPhaseDeg.to_complex(-20.0, 90.0);
        assert_relative_eq!(z.norm(), 0.1, max_relative = 1e-12);
        assert_relative_eq!(z.arg(), FRAC_PI_2, max_relative = 1e-12);
        let z = SweepFormat::LinMagPhaseRad.to_complex(2.0, FRAC_PI_2);
        assert_relative_eq!(z.im, 2.0, max_relative = 1e-12);
        assert_eq!(
            "DbMagPhaseRad".parse::<SweepFormat>().unwrap(),
            SweepFormat::DbMagPhaseRad
        );
        assert!("polar".parse::<SweepFormat>().is_err());
    }

    #[test]
    fn reports_bad_line_number() {
        let text = "1 0 0\n2 0 0\n3 x 0\n4 0 0\n";
        match parse_sweep(text, &SweepFileOptions::default()) {
            Err(SweepFileError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn selects_columns_and_skips_header() {
        let text = "freq a b c d\n1 9 9 1 2\n2 9 9 3 4\n3 9 9 5 6\n4 9 9 7 8\n";
        let options = SweepFileOptions {
            columns: (3, 4),
            header_rows: 1,
            ..Default::default()
        };
        let sweep = parse_sweep(text, &options).unwrap();
        assert_eq!(sweep.response()[2], Complex64::new(5.0, 6.0));
    }

    #[test]
    fn short_file_is_a_format_error() {
        let err = parse_sweep("1 0 0\n2 0 0\n", &SweepFileOptions::default()).unwrap_err();
        assert!(matches!(err, SweepFileError::Format(_)));
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!("circlefit_sweep_{}.txt", std::process::id()));
        fs::write(&path, "1 1 0\n2 0 1\n3 -1 0\n4 0 -1\n").unwrap();
        let sweep = load_sweep(&path, &SweepFileOptions::default()).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(sweep.frequencies(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            load_sweep(&path, &SweepFileOptions::default()),
            Err(SweepFileError::Io(_))
        ));
    }

    #[test]
    fn cut_keeps_inclusive_window() {
        let f: Vec<f64> = (0..10).map(f64::from).collect();
        let z = vec![Complex64::new(1.0, 0.0); 10];
        let sweep = Sweep::new(f, z).unwrap();
        let cut = cut_sweep(&sweep, 2.0, 7.0).unwrap();
        assert_eq!(cut.frequencies(), &[2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(cut_sweep(&sweep, 2.0, 4.0).is_err());
    }
}
