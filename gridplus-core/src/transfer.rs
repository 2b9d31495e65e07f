//! Temperature-to-duty transfer functions
//!
//! A transfer function maps a temperature in degrees Celsius to a target fan
//! duty in percent. Variants are selected from configuration via a tagged
//! table (`type = "linear"`), leaving room for further curve shapes without
//! touching the control loop.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// Pluggable temperature-to-duty mapping.
///
/// The supervisor holds one by value and calls [`duty_for`](Self::duty_for)
/// once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransferFunction {
    /// Clamped linear map between two temperature endpoints.
    Linear {
        /// Temperature at or below which the minimum duty applies
        min_temp: f64,
        /// Temperature at or above which the maximum duty applies
        max_temp: f64,
        /// Duty floor in percent
        min_duty: u8,
        /// Duty ceiling in percent
        max_duty: u8,
    },
    /// Logistic (sigmoid) ramp centered on a midpoint temperature.
    Logistic {
        /// Temperature of the curve's inflection point
        midpoint: f64,
        /// Slope at the midpoint, in duty points per degree (must be > 0)
        steepness: f64,
        /// Duty floor in percent
        min_duty: u8,
        /// Duty ceiling in percent
        max_duty: u8,
    },
}

impl Default for TransferFunction {
    fn default() -> Self {
        TransferFunction::Linear {
            min_temp: 25.0,
            max_temp: 70.0,
            min_duty: 10,
            max_duty: 100,
        }
    }
}

impl TransferFunction {
    /// Compute the target duty percent for a temperature.
    ///
    /// Fractional duties are truncated toward zero before clamping.
    pub fn duty_for(&self, temp_c: f64) -> u8 {
        let (raw, min_duty, max_duty) = match *self {
            TransferFunction::Linear {
                min_temp,
                max_temp,
                min_duty,
                max_duty,
            } => {
                let raw = (temp_c - min_temp) * 100.0 / (max_temp - min_temp);
                (raw, min_duty, max_duty)
            }
            TransferFunction::Logistic {
                midpoint,
                steepness,
                min_duty,
                max_duty,
            } => {
                let span = f64::from(max_duty) - f64::from(min_duty);
                let sigmoid = 1.0 / (1.0 + (-steepness * (temp_c - midpoint)).exp());
                (f64::from(min_duty) + span * sigmoid, min_duty, max_duty)
            }
        };

        // `as` truncates toward zero and saturates on overflow
        (raw as i32).clamp(i32::from(min_duty), i32::from(max_duty)) as u8
    }

    /// Check the parameter invariants.
    pub fn validate(&self) -> Result<()> {
        let (min_duty, max_duty) = match *self {
            TransferFunction::Linear {
                min_temp,
                max_temp,
                min_duty,
                max_duty,
            } => {
                if !(min_temp < max_temp) {
                    return Err(GridError::Config(format!(
                        "transfer: min_temp {min_temp} must be below max_temp {max_temp}"
                    )));
                }
                (min_duty, max_duty)
            }
            TransferFunction::Logistic {
                steepness,
                min_duty,
                max_duty,
                ..
            } => {
                if !(steepness > 0.0) {
                    return Err(GridError::Config(format!(
                        "transfer: steepness {steepness} must be positive"
                    )));
                }
                (min_duty, max_duty)
            }
        };

        if min_duty > max_duty || max_duty > 100 {
            return Err(GridError::Config(format!(
                "transfer: duty range {min_duty}..{max_duty} must satisfy min <= max <= 100"
            )));
        }

        Ok(())
    }
}
