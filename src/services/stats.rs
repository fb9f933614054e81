//! Summary statistics over numeric readings

use crate::domain::types::Reading;

/// Which statistic a caller wants out of a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Average,
    Min,
    Max,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Average => "average",
            Statistic::Min => "min",
            Statistic::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingStats {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Value of the most recent reading (last in input order)
    pub latest: f64,
}

impl ReadingStats {
    /// Summarize readings; `None` when there are none
    pub fn from_readings(readings: &[Reading]) -> Option<Self> {
        let latest = readings.last()?.value;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for reading in readings {
            sum += reading.value;
            min = min.min(reading.value);
            max = max.max(reading.value);
        }
        Some(Self { count: readings.len(), average: sum / readings.len() as f64, min, max, latest })
    }

    pub fn get(&self, stat: Statistic) -> f64 {
        match stat {
            Statistic::Average => self.average,
            Statistic::Min => self.min,
            Statistic::Max => self.max,
        }
    }
}
