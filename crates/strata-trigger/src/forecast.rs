//! Metric forecasters and sustained-threshold checks.

use strata_core::config::ForecasterKind;

/// Fires when the last `sustained_epochs` values all sit below `lo` or
/// all sit above `hi`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsThresholds {
    pub lo: f64,
    pub hi: f64,
    pub sustained_epochs: usize,
}

impl MetricsThresholds {
    pub fn new(lo: f64, hi: f64, sustained_epochs: usize) -> Self {
        Self {
            lo,
            hi,
            sustained_epochs,
        }
    }

    /// `values` is oldest first. Fewer than `sustained_epochs` values
    /// never fire.
    pub fn exceeds_thresholds(&self, values: &[f64]) -> bool {
        let Some(recent) = tail(values, self.sustained_epochs) else {
            return false;
        };
        recent.iter().all(|v| *v < self.lo) || recent.iter().all(|v| *v > self.hi)
    }
}

/// The last `n` values, if there are at least `n` and `n > 0`.
pub(crate) fn tail(values: &[f64], n: usize) -> Option<&[f64]> {
    (n > 0 && values.len() >= n).then(|| &values[values.len() - n..])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forecaster {
    /// Repeat the latest value.
    Constant,
    /// Least-squares line over the trailing `window` values.
    LinearRegression { window: usize },
}

impl Forecaster {
    pub fn from_kind(kind: ForecasterKind, window: usize) -> Self {
        match kind {
            ForecasterKind::Constant => Forecaster::Constant,
            ForecasterKind::LinearRegression => Forecaster::LinearRegression {
                window: window.max(2),
            },
        }
    }

    /// The next `steps` values after `history` (oldest first). Empty when
    /// there is no history.
    pub fn forecast(&self, history: &[f64], steps: usize) -> Vec<f64> {
        let Some(&last) = history.last() else {
            return Vec::new();
        };
        match *self {
            Forecaster::Constant => vec![last; steps],
            Forecaster::LinearRegression { window } => {
                let fit = &history[history.len().saturating_sub(window)..];
                if fit.len() < 2 {
                    return vec![last; steps];
                }
                let n = fit.len() as f64;
                let mean_x = (n - 1.0) / 2.0;
                let mean_y = fit.iter().sum::<f64>() / n;
                let (mut sxy, mut sxx) = (0.0, 0.0);
                for (i, y) in fit.iter().enumerate() {
                    let dx = i as f64 - mean_x;
                    sxy += dx * (y - mean_y);
                    sxx += dx * dx;
                }
                let slope = sxy / sxx;
                let intercept = mean_y - slope * mean_x;
                (0..steps)
                    .map(|k| intercept + slope * (n + k as f64))
                    .collect()
            }
        }
    }
}
