//! Power unit conversions.

/// Unit a power is given or returned in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerUnit {
    #[default]
    Dbm,
    Watt,
}

/// `10 log10(P / 1 mW)`
pub fn watt_to_dbm(watt: f64) -> f64 {
    10.0 * (watt * 1000.0).log10()
}

pub fn dbm_to_watt(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0) / 1000.0
}

impl PowerUnit {
    /// Converts a power in this unit to watts
    pub fn to_watt(self, power: f64) -> f64 {
        match self {
            PowerUnit::Dbm => dbm_to_watt(power),
            PowerUnit::Watt => power,
        }
    }

    /// Converts a power in watts to this unit
    pub fn watt_into(self, watt: f64) -> f64 {
        match self {
            PowerUnit::Dbm => watt_to_dbm(watt),
            PowerUnit::Watt => watt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn one_milliwatt_is_zero_dbm() {
        assert_relative_eq!(watt_to_dbm(1e-3), 0.0, epsilon = 1e-12);
        assert_relative_eq!(dbm_to_watt(0.0), 1e-3, max_relative = 1e-12);
    }

    #[test]
    fn conversions_invert_each_other() {
        for dbm in [-140.0, -73.5, 0.0, 10.0] {
            assert_relative_eq!(watt_to_dbm(dbm_to_watt(dbm)), dbm, epsilon = 1e-9);
        }
        assert_relative_eq!(PowerUnit::Dbm.to_watt(30.0), 1.0, max_relative = 1e-12);
        assert_eq!(PowerUnit::Watt.watt_into(2.5), 2.5);
    }
}
