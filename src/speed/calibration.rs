use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Pixel speeds (px/s) used to generate synthetic training pairs
pub const SYNTHETIC_PIXEL_SPEEDS: [f64; 10] =
    [50.0, 100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0];

const MS_TO_KMH: f64 = 3.6;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration model not found at {0}")]
    Missing(PathBuf),
    #[error("can't access calibration model at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed calibration model: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid calibration model: {0}")]
    Invalid(String),
}

/// Linear map from pixel speed (px/s) to real speed (km/h), fitted offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub slope: f64,
    pub intercept: f64,
    /// Known distance-per-pixel constant the synthetic pairs were derived from
    #[serde(default)]
    pub pixels_per_meter: Option<f64>,
    /// Native frame width the constant was measured at
    #[serde(default)]
    pub reference_width: Option<u32>,
}

impl CalibrationModel {
    /// Ordinary least squares over `(pixel_speed, real_speed)` pairs
    pub fn fit(samples: &[(f64, f64)]) -> Result<Self, CalibrationError> {
        if samples.len() < 2 {
            return Err(CalibrationError::Invalid(format!(
                "need at least 2 samples, got {}",
                samples.len()
            )));
        }
        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|s| s.0).sum::<f64>() / n;
        let mean_y = samples.iter().map(|s| s.1).sum::<f64>() / n;
        let sxx: f64 = samples.iter().map(|s| (s.0 - mean_x).powi(2)).sum();
        let sxy: f64 = samples.iter().map(|s| (s.0 - mean_x) * (s.1 - mean_y)).sum();
        if sxx <= f64::EPSILON {
            return Err(CalibrationError::Invalid(
                "pixel speeds have no spread".to_string(),
            ));
        }
        let slope = sxy / sxx;
        let model = CalibrationModel {
            slope,
            intercept: mean_y - slope * mean_x,
            pixels_per_meter: None,
            reference_width: None,
        };
        model.validate()?;
        Ok(model)
    }
    /// Fits the model on synthetic pairs `km/h = px/s / pixels_per_meter * 3.6`
    ///
    /// Basic usage:
    ///
    /// ```
    /// use speedtrap_rs::speed::CalibrationModel;
    /// let model = CalibrationModel::from_pixels_per_meter(34.3).unwrap();
    /// assert!((model.apply(343.0) - 36.0).abs() < 1e-6);
    /// ```
    pub fn from_pixels_per_meter(pixels_per_meter: f64) -> Result<Self, CalibrationError> {
        if !(pixels_per_meter.is_finite() && pixels_per_meter > 0.0) {
            return Err(CalibrationError::Invalid(format!(
                "pixels_per_meter must be positive, got {}",
                pixels_per_meter
            )));
        }
        let samples: Vec<(f64, f64)> = SYNTHETIC_PIXEL_SPEEDS
            .iter()
            .map(|&px| (px, px / pixels_per_meter * MS_TO_KMH))
            .collect();
        let mut model = Self::fit(&samples)?;
        model.pixels_per_meter = Some(pixels_per_meter);
        info!(
            pixels_per_meter,
            slope = model.slope,
            intercept = model.intercept,
            "calibration fitted, 300 px/s -> {:.2} km/h",
            model.apply(300.0)
        );
        Ok(model)
    }
    pub fn with_reference_width(mut self, width: u32) -> Self {
        self.reference_width = Some(width);
        self
    }
    /// Non-decreasing in `pixel_speed` (slope is never negative)
    pub fn apply(&self, pixel_speed: f64) -> f64 {
        self.slope * pixel_speed + self.intercept
    }
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if !self.slope.is_finite() || !self.intercept.is_finite() {
            return Err(CalibrationError::Invalid("non-finite parameters".to_string()));
        }
        if self.slope < 0.0 {
            return Err(CalibrationError::Invalid(format!(
                "negative slope {}",
                self.slope
            )));
        }
        if let Some(width) = self.reference_width {
            if width <= 1 {
                return Err(CalibrationError::Invalid(format!(
                    "reference width {} is too small",
                    width
                )));
            }
        }
        Ok(())
    }
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                CalibrationError::Missing(path.to_path_buf())
            } else {
                CalibrationError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let model: CalibrationModel = serde_json::from_str(&contents)?;
        model.validate()?;
        info!(path = %path.display(), slope = model.slope, intercept = model.intercept, "loaded calibration model");
        Ok(model)
    }
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_recovers_line() {
        let samples: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        let model = CalibrationModel::fit(&samples).unwrap();
        assert!((model.slope - 2.0).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pixels_per_meter_model() {
        let model = CalibrationModel::from_pixels_per_meter(34.3).unwrap();
        assert!(model.intercept.abs() < 1e-9);
        // 396.7 px/s at 34.3 px/m
        assert!((model.apply(396.7) - 41.636).abs() < 1e-3);
        assert!(CalibrationModel::from_pixels_per_meter(0.0).is_err());
    }

    #[test]
    fn test_fit_rejects_degenerate_samples() {
        assert!(CalibrationModel::fit(&[(1.0, 1.0)]).is_err());
        assert!(CalibrationModel::fit(&[(5.0, 1.0), (5.0, 2.0)]).is_err());
        // Decreasing relation can't be a speed calibration
        assert!(CalibrationModel::fit(&[(1.0, 10.0), (2.0, 5.0)]).is_err());
    }

    #[test]
    fn test_save_load_and_missing() {
        let dir = std::env::temp_dir().join(format!("speedtrap-calib-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calibration.json");

        match CalibrationModel::load(&path) {
            Err(CalibrationError::Missing(p)) => assert_eq!(p, path),
            other => panic!("expected missing error, got {:?}", other),
        }

        let model = CalibrationModel::from_pixels_per_meter(20.0)
            .unwrap()
            .with_reference_width(1920);
        model.save(&path).unwrap();
        let loaded = CalibrationModel::load(&path).unwrap();
        assert_eq!(loaded.reference_width, Some(1920));
        assert!((loaded.apply(200.0) - model.apply(200.0)).abs() < 1e-9);

        std::fs::write(&path, "{\"slope\": -1.0, \"intercept\": 0.0}").unwrap();
        assert!(matches!(
            CalibrationModel::load(&path),
            Err(CalibrationError::Invalid(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
