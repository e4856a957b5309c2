use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COEFFICIENT: f64 = 0.0056;
pub const DEFAULT_EFFICIENCY: f64 = 1.0;

/// Pump calibration: volume per stroke and the derating applied to it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpParameters {
    pub coefficient: f64,
    pub efficiency: f64,
}

impl Default for PumpParameters {
    fn default() -> Self {
        Self {
            coefficient: DEFAULT_COEFFICIENT,
            efficiency: DEFAULT_EFFICIENCY,
        }
    }
}

impl PumpParameters {
    /// Volume per minute for the given stroke rate
    pub fn pump_rate(&self, spm: f64) -> f64 {
        spm * self.coefficient * self.efficiency
    }
}

/// Names of the two tunable parameters, doubling as their storage keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum Parameter {
    Coefficient,
    Efficiency,
}

impl Parameter {
    pub fn key(self) -> &'static str {
        self.into()
    }

    pub fn default_value(self) -> f64 {
        match self {
            Parameter::Coefficient => DEFAULT_COEFFICIENT,
            Parameter::Efficiency => DEFAULT_EFFICIENCY,
        }
    }
}

pub fn validate(parameter: Parameter, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::invalid_input(parameter.key(), value.to_string()))
    }
}

/// Parses coefficient text such as `0.0056`
pub fn parse_coefficient(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let value = trimmed
        .parse::<f64>()
        .map_err(|_| Error::invalid_input(Parameter::Coefficient.key(), text))?;
    validate(Parameter::Coefficient, value)
        .map_err(|_| Error::invalid_input(Parameter::Coefficient.key(), text))
}

/// Parses efficiency text given in percent (`95`, `150%`) into a fraction
pub fn parse_efficiency(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
    let percent = number
        .parse::<f64>()
        .map_err(|_| Error::invalid_input(Parameter::Efficiency.key(), text))?;
    validate(Parameter::Efficiency, percent / 100.0)
        .map_err(|_| Error::invalid_input(Parameter::Efficiency.key(), text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_field_calibration() {
        let p = PumpParameters::default();
        assert_eq!(p.coefficient, 0.0056);
        assert_eq!(p.efficiency, 1.0);
    }

    #[test]
    fn pump_rate_is_product() {
        let p = PumpParameters {
            coefficient: 0.0056,
            efficiency: 1.0,
        };
        assert!((p.pump_rate(10.0) - 0.056).abs() < 1e-12);

        let derated = PumpParameters {
            coefficient: 0.02,
            efficiency: 0.5,
        };
        assert!((derated.pump_rate(12.0) - 0.12).abs() < 1e-12);
    }

    #[test]
    fn parameter_keys() {
        assert_eq!(Parameter::Coefficient.key(), "coefficient");
        assert_eq!(Parameter::Efficiency.key(), "efficiency");
    }

    #[test]
    fn coefficient_text() {
        assert_eq!(parse_coefficient("0.0056").unwrap(), 0.0056);
        assert_eq!(parse_coefficient(" 0.01 ").unwrap(), 0.01);
        assert_matches!(
            parse_coefficient("abc"),
            Err(Error::InvalidInput { field: "coefficient", .. })
        );
        assert_matches!(parse_coefficient(""), Err(Error::InvalidInput { .. }));
        assert_matches!(parse_coefficient("0"), Err(Error::InvalidInput { .. }));
        assert_matches!(parse_coefficient("-1"), Err(Error::InvalidInput { .. }));
        assert_matches!(parse_coefficient("NaN"), Err(Error::InvalidInput { .. }));
        assert_matches!(parse_coefficient("inf"), Err(Error::InvalidInput { .. }));
    }

    #[test]
    fn efficiency_text_is_percent() {
        assert_eq!(parse_efficiency("150%").unwrap(), 1.5);
        assert_eq!(parse_efficiency("100").unwrap(), 1.0);
        assert_eq!(parse_efficiency(" 85 % ").unwrap(), 0.85);
        assert_matches!(
            parse_efficiency("%"),
            Err(Error::InvalidInput { field: "efficiency", .. })
        );
        assert_matches!(parse_efficiency("fast"), Err(Error::InvalidInput { .. }));
        assert_matches!(parse_efficiency("0%"), Err(Error::InvalidInput { .. }));
    }

    #[test]
    fn efficiency_has_no_upper_bound() {
        assert_eq!(parse_efficiency("500%").unwrap(), 5.0);
        assert_eq!(parse_efficiency("900").unwrap(), 9.0);
    }
}
