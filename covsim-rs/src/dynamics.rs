use serde::{Deserialize, Serialize};

/// A day-indexed curve sampled once per day, shifted by `offset`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscreteFunction {
    pub offset: i32,
    pub values: Vec<f64>,
}

impl DiscreteFunction {
    pub fn new(offset: i32, values: Vec<f64>) -> Self {
        Self { offset, values }
    }

    /// Samples the curve at `day`, holding the first and last values outside
    /// the sampled range.
    pub fn value_at(&self, day: i32) -> f64 {
        let Some(last) = self.values.len().checked_sub(1) else {
            return 0.0;
        };
        let shifted = (day as i64 + self.offset as i64).clamp(0, last as i64);
        self.values[shifted as usize]
    }

    pub fn scale_y(&self, factor: f64) -> Self {
        Self {
            offset: self.offset,
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }

    /// Centered moving average over `window` samples. The window shrinks at
    /// the edges instead of padding.
    pub fn mean_filter(&self, window: usize) -> Self {
        if window <= 1 || self.values.is_empty() {
            return self.clone();
        }
        let before = window / 2;
        let after = window - before - 1;
        let len = self.values.len();
        let values = (0..len)
            .map(|i| {
                let lo = i.saturating_sub(before);
                let hi = usize::min(len - 1, i + after);
                let slice = &self.values[lo..=hi];
                slice.iter().sum::<f64>() / slice.len() as f64
            })
            .collect();
        Self {
            offset: self.offset,
            values,
        }
    }
}

/// Epidemiological curves for one virus variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantProperties {
    /// Cumulative probability of symptom onset by day.
    pub incubation: Vec<f64>,
    pub infectivity: DiscreteFunction,
    pub vax_immunity: DiscreteFunction,
    pub natural_immunity: DiscreteFunction,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldProperties {
    pub alpha: VariantProperties,
    pub delta: VariantProperties,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_at_clamps() {
        let f = DiscreteFunction::new(2, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(f.value_at(-2), 0.0);
        assert_eq!(f.value_at(-1), 1.0);
        assert_eq!(f.value_at(1), 3.0);
        assert_eq!(f.value_at(-10), 0.0);
        assert_eq!(f.value_at(10), 3.0);
    }

    #[test]
    fn test_value_at_empty() {
        assert_eq!(DiscreteFunction::default().value_at(3), 0.0);
    }

    #[test]
    fn test_scale_y_keeps_offset() {
        let f = DiscreteFunction::new(-3, vec![0.5, 1.0]).scale_y(2.0);
        assert_eq!(f, DiscreteFunction::new(-3, vec![1.0, 2.0]));
    }

    #[test]
    fn test_mean_filter() {
        let f = DiscreteFunction::new(0, vec![3.0, 0.0, 3.0, 0.0, 3.0]).mean_filter(3);
        assert_eq!(f.values, vec![1.5, 2.0, 1.0, 2.0, 1.5]);
        assert_eq!(f.values.len(), 5);
    }

    #[test]
    fn test_mean_filter_flat_curve_unchanged() {
        let f = DiscreteFunction::new(0, vec![0.8; 20]);
        let filtered = f.mean_filter(10);
        for v in filtered.values {
            assert!((v - 0.8).abs() < 1e-12);
        }
    }
}
