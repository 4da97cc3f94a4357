use crate::model::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Scores a segment from its length, or from one of the content feature channels.
///
/// A transition or state signal without a penalty function contributes zero, so callers
/// branch on `Option` before calling in here.
pub trait PenaltyFunction: Send + Sync {
    fn lookup_penalty(&self, value: f64, svm_values: &[f64]) -> f64;

    fn penalty_add_derivative(&mut self, value: f64, svm_values: &[f64]);

    fn penalty_clear_derivative(&mut self);

    /// Largest argument for which the function is defined. Bounds the look-back window.
    fn get_max_value(&self) -> f64;

    fn uses_svm_values(&self) -> bool;

    /// Content feature channels read by this function.
    fn get_used_svms(&self) -> Vec<usize>;

    fn get_derivatives(&self) -> Vec<f64>;
}

const PLIF_CACHE_LIMIT: f64 = 1_000_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlifTransform {
    Linear,
    Log,
    LogPlus1,
    LogPlus3,
    LinearPlus3,
}

impl PlifTransform {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            PlifTransform::Linear => value,
            PlifTransform::Log => value.ln(),
            PlifTransform::LogPlus1 => (value + 1.0).ln(),
            PlifTransform::LogPlus3 => (value + 3.0).ln(),
            PlifTransform::LinearPlus3 => value + 3.0,
        }
    }

    /// Length whose transform is `value`.
    pub fn invert(self, value: f64) -> f64 {
        match self {
            PlifTransform::Linear => value,
            PlifTransform::Log => value.exp(),
            PlifTransform::LogPlus1 => value.exp() - 1.0,
            PlifTransform::LogPlus3 => value.exp() - 3.0,
            PlifTransform::LinearPlus3 => value - 3.0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PlifTransform::Linear => "linear",
            PlifTransform::Log => "log",
            PlifTransform::LogPlus1 => "log(+1)",
            PlifTransform::LogPlus3 => "log(+3)",
            PlifTransform::LinearPlus3 => "(+3)",
        }
    }
}

impl FromStr for PlifTransform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "linear" => Ok(PlifTransform::Linear),
            "log" => Ok(PlifTransform::Log),
            "log(+1)" => Ok(PlifTransform::LogPlus1),
            "log(+3)" => Ok(PlifTransform::LogPlus3),
            "(+3)" => Ok(PlifTransform::LinearPlus3),
            _ => Err(Error::InvalidValue(format!("Unknown transform type '{}'", s))),
        }
    }
}

impl fmt::Display for PlifTransform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Piecewise linear function over `limits`, interpolating `penalties`, clamped at both ends.
#[derive(Clone, Debug)]
pub struct Plif {
    id: usize,
    name: String,
    limits: Vec<f64>,
    penalties: Vec<f64>,
    cum_derivatives: Vec<f64>,
    transform: PlifTransform,
    min_value: f64,
    max_value: f64,
    explicit_range: bool,
    use_svm: Option<usize>,
    cache: Option<Vec<f64>>,
}

impl Plif {
    pub fn new(limits: Vec<f64>, penalties: Vec<f64>) -> Result<Plif> {
        if limits.is_empty() {
            return Err("Plif requires at least one knot".into());
        }
        if limits.len() != penalties.len() {
            return Err(Error::MismatchedDimensions("plif penalties", penalties.len(), limits.len()));
        }
        if limits.iter().any(|l| l.is_nan()) || limits.windows(2).any(|w| w[1] < w[0]) {
            return Err("Plif limits must be non-decreasing".into());
        }

        let len = limits.len();
        let max_value = limits[len - 1];

        Ok(Plif {
            id: 0,
            name: String::new(),
            limits,
            penalties,
            cum_derivatives: vec![0.0; len],
            transform: PlifTransform::Linear,
            min_value: 0.0,
            max_value,
            explicit_range: false,
            use_svm: None,
            cache: None,
        })
    }

    pub fn with_id(mut self, id: usize) -> Plif {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Plif {
        self.name = name.to_string();
        self
    }

    /// Without an explicit range the largest length maps onto the last knot.
    pub fn with_transform(mut self, transform: PlifTransform) -> Plif {
        self.transform = transform;
        if !self.explicit_range {
            self.max_value = transform.invert(self.limits[self.limits.len() - 1]);
        }
        self.cache = None;
        self
    }

    /// Range of admissible lengths, outside of which the penalty is `-inf`. Lengths, not
    /// transformed values.
    pub fn with_range(mut self, min_value: f64, max_value: f64) -> Result<Plif> {
        if !(min_value <= max_value) {
            return Err(Error::InvalidValue(format!("Plif range [{}, {}] is empty", min_value, max_value)));
        }
        self.min_value = min_value;
        self.max_value = max_value;
        self.explicit_range = true;
        self.cache = None;
        Ok(self)
    }

    /// Evaluate on a content feature channel instead of the segment length.
    pub fn with_svm_channel(mut self, channel: usize) -> Plif {
        self.use_svm = Some(channel);
        self.cache = None;
        self
    }

    /// Precompute integer lengths. Only applies to length functions with a small finite range.
    pub fn with_cache(mut self) -> Plif {
        self.cache = None;
        if self.use_svm.is_some() || !self.max_value.is_finite() || self.max_value < 0.0 || self.max_value > PLIF_CACHE_LIMIT {
            return self;
        }

        let max_len = self.max_value.floor() as usize;
        let cache = (0..=max_len)
            .map(|len| self.evaluate_length(len as f64))
            .collect();
        self.cache = Some(cache);
        self
    }

    pub fn get_id(&self) -> usize { self.id }

    pub fn get_name(&self) -> &str { &self.name }

    pub fn get_limits(&self) -> &[f64] { &self.limits }

    pub fn get_penalties(&self) -> &[f64] { &self.penalties }

    pub fn get_cum_derivatives(&self) -> &[f64] { &self.cum_derivatives }

    pub fn get_transform(&self) -> PlifTransform { self.transform }

    pub fn get_min_value(&self) -> f64 { self.min_value }

    pub fn get_svm_channel(&self) -> Option<usize> { self.use_svm }

    fn in_range(&self, value: f64) -> bool {
        value >= self.min_value && value <= self.max_value
    }

    fn knot_index(&self, d_value: f64) -> usize {
        self.limits.iter().filter(|&&l| l <= d_value).count()
    }

    fn interpolate(&self, d_value: f64) -> f64 {
        let len = self.limits.len();
        let idx = self.knot_index(d_value);

        if idx == 0 {
            self.penalties[0]
        } else if idx == len {
            self.penalties[len - 1]
        } else {
            let span = self.limits[idx] - self.limits[idx - 1];
            (self.penalties[idx] * (d_value - self.limits[idx - 1])
                + self.penalties[idx - 1] * (self.limits[idx] - d_value))
                / span
        }
    }

    fn add_interpolation_derivative(&mut self, d_value: f64) {
        let len = self.limits.len();
        let idx = self.knot_index(d_value);

        if idx == 0 {
            self.cum_derivatives[0] += 1.0;
        } else if idx == len {
            self.cum_derivatives[len - 1] += 1.0;
        } else {
            let span = self.limits[idx] - self.limits[idx - 1];
            self.cum_derivatives[idx] += (d_value - self.limits[idx - 1]) / span;
            self.cum_derivatives[idx - 1] += (self.limits[idx] - d_value) / span;
        }
    }

    fn evaluate_length(&self, value: f64) -> f64 {
        if !self.in_range(value) {
            return f64::NEG_INFINITY;
        }
        self.interpolate(self.transform.apply(value))
    }

    fn svm_input(&self, channel: usize, svm_values: &[f64]) -> f64 {
        svm_values.get(channel).copied().unwrap_or(f64::NAN)
    }
}

impl PenaltyFunction for Plif {
    fn lookup_penalty(&self, value: f64, svm_values: &[f64]) -> f64 {
        if let Some(channel) = self.use_svm {
            let d_value = self.transform.apply(self.svm_input(channel, svm_values));
            return self.interpolate(d_value);
        }

        if let Some(cache) = &self.cache {
            if value >= 0.0 && value.fract() == 0.0 {
                if let Some(&cached) = cache.get(value as usize) {
                    return cached;
                }
            }
        }

        self.evaluate_length(value)
    }

    fn penalty_add_derivative(&mut self, value: f64, svm_values: &[f64]) {
        let d_value = match self.use_svm {
            Some(channel) => self.transform.apply(self.svm_input(channel, svm_values)),
            None => {
                if !self.in_range(value) {
                    return;
                }
                self.transform.apply(value)
            }
        };
        self.add_interpolation_derivative(d_value);
    }

    fn penalty_clear_derivative(&mut self) {
        for d in self.cum_derivatives.iter_mut() {
            *d = 0.0;
        }
    }

    fn get_max_value(&self) -> f64 {
        match self.use_svm {
            Some(_) => f64::INFINITY,
            None => self.max_value,
        }
    }

    fn uses_svm_values(&self) -> bool { self.use_svm.is_some() }

    fn get_used_svms(&self) -> Vec<usize> { self.use_svm.into_iter().collect() }

    fn get_derivatives(&self) -> Vec<f64> { self.cum_derivatives.clone() }
}

/// Sum of several functions on the same transition, typically one length function and
/// a few content feature functions.
#[derive(Clone, Debug, Default)]
pub struct PlifArray {
    plifs: Vec<Plif>,
}

impl PlifArray {
    pub fn new() -> PlifArray {
        PlifArray { plifs: Vec::new() }
    }

    pub fn add_plif(&mut self, plif: Plif) {
        self.plifs.push(plif);
    }

    pub fn get_plifs(&self) -> &[Plif] { &self.plifs }

    pub fn len(&self) -> usize { self.plifs.len() }

    pub fn is_empty(&self) -> bool { self.plifs.is_empty() }
}

impl From<Vec<Plif>> for PlifArray {
    fn from(plifs: Vec<Plif>) -> Self {
        PlifArray { plifs }
    }
}

impl PenaltyFunction for PlifArray {
    fn lookup_penalty(&self, value: f64, svm_values: &[f64]) -> f64 {
        self.plifs.iter().map(|p| p.lookup_penalty(value, svm_values)).sum()
    }

    fn penalty_add_derivative(&mut self, value: f64, svm_values: &[f64]) {
        for plif in self.plifs.iter_mut() {
            plif.penalty_add_derivative(value, svm_values);
        }
    }

    fn penalty_clear_derivative(&mut self) {
        for plif in self.plifs.iter_mut() {
            plif.penalty_clear_derivative();
        }
    }

    fn get_max_value(&self) -> f64 {
        self.plifs
            .iter()
            .map(|p| p.get_max_value())
            .fold(f64::INFINITY, f64::min)
    }

    fn uses_svm_values(&self) -> bool {
        self.plifs.iter().any(|p| p.uses_svm_values())
    }

    fn get_used_svms(&self) -> Vec<usize> {
        let mut used: Vec<usize> = self.plifs.iter().flat_map(|p| p.get_used_svms()).collect();
        used.sort_unstable();
        used.dedup();
        used
    }

    fn get_derivatives(&self) -> Vec<f64> {
        self.plifs.iter().flat_map(|p| p.get_derivatives()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp() -> Plif {
        Plif::new(vec![10.0, 20.0, 40.0], vec![1.0, 3.0, -1.0])
            .unwrap()
            .with_range(0.0, 100.0)
            .unwrap()
    }

    #[test]
    fn test_interpolation_and_clamping() {
        let plif = ramp();

        assert_abs_diff_eq!(plif.lookup_penalty(0.0, &[]), 1.0);
        assert_abs_diff_eq!(plif.lookup_penalty(10.0, &[]), 1.0);
        assert_abs_diff_eq!(plif.lookup_penalty(15.0, &[]), 2.0);
        assert_abs_diff_eq!(plif.lookup_penalty(30.0, &[]), 1.0);
        assert_abs_diff_eq!(plif.lookup_penalty(40.0, &[]), -1.0);
        assert_abs_diff_eq!(plif.lookup_penalty(80.0, &[]), -1.0);
    }

    #[test]
    fn test_out_of_range_is_infeasible() {
        let plif = ramp();
        assert_eq!(plif.lookup_penalty(100.5, &[]), f64::NEG_INFINITY);
        assert_eq!(plif.lookup_penalty(-1.0, &[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_cache_matches_direct_evaluation() {
        let direct = ramp().with_transform(PlifTransform::LogPlus1);
        let cached = direct.clone().with_cache();

        for len in 0..=110 {
            let value = len as f64;
            let d = direct.lookup_penalty(value, &[]);
            let c = cached.lookup_penalty(value, &[]);
            if d.is_finite() {
                assert_abs_diff_eq!(d, c, epsilon = 1e-12);
            } else {
                assert_eq!(d, c);
            }
        }
    }

    #[test]
    fn test_derivative_weights() {
        let mut plif = ramp();
        plif.penalty_add_derivative(15.0, &[]);
        plif.penalty_add_derivative(5.0, &[]);
        plif.penalty_add_derivative(1000.0, &[]);

        assert_abs_diff_eq!(plif.get_cum_derivatives()[0], 1.5);
        assert_abs_diff_eq!(plif.get_cum_derivatives()[1], 0.5);
        assert_abs_diff_eq!(plif.get_cum_derivatives()[2], 0.0);

        plif.penalty_clear_derivative();
        assert!(plif.get_cum_derivatives().iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_svm_channel_ignores_length() {
        let plif = Plif::new(vec![0.0, 1.0], vec![0.0, 2.0])
            .unwrap()
            .with_svm_channel(1);

        assert!(plif.uses_svm_values());
        assert_eq!(plif.get_max_value(), f64::INFINITY);
        assert_abs_diff_eq!(plif.lookup_penalty(1e9, &[7.0, 0.25]), 0.5);
    }

    #[test]
    fn test_transformed_knots_bound_lengths() {
        let log = Plif::new(vec![0.0, 1000f64.ln()], vec![0.0, -2.0])
            .unwrap()
            .with_transform(PlifTransform::Log);
        assert_abs_diff_eq!(log.get_max_value(), 1000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(log.lookup_penalty(500.0, &[]), -2.0 * 500f64.ln() / 1000f64.ln(), epsilon = 1e-12);
        assert_eq!(log.lookup_penalty(1001.0, &[]), f64::NEG_INFINITY);

        let plus3 = Plif::new(vec![2.0, 10f64.ln()], vec![0.0, 1.0])
            .unwrap()
            .with_transform(PlifTransform::LogPlus3);
        assert_abs_diff_eq!(plus3.get_max_value(), 7.0, epsilon = 1e-9);

        // an explicit range is kept
        let ranged = ramp().with_transform(PlifTransform::LogPlus1);
        assert_abs_diff_eq!(ranged.get_max_value(), 100.0);
    }

    #[test]
    fn test_transform_parsing() {
        assert_eq!("log(+3)".parse::<PlifTransform>().unwrap(), PlifTransform::LogPlus3);
        assert_eq!("".parse::<PlifTransform>().unwrap(), PlifTransform::Linear);
        assert!("sqrt".parse::<PlifTransform>().is_err());
    }

    #[test]
    fn test_array_sums_members() {
        let length = ramp();
        let content = Plif::new(vec![0.0, 1.0], vec![0.0, 2.0])
            .unwrap()
            .with_svm_channel(0);
        let mut array = PlifArray::from(vec![length, content]);

        assert!(array.uses_svm_values());
        assert_abs_diff_eq!(array.get_max_value(), 100.0);
        assert_abs_diff_eq!(array.lookup_penalty(15.0, &[0.5]), 3.0);
        assert_eq!(array.get_used_svms(), vec![0]);

        array.penalty_add_derivative(15.0, &[0.5]);
        assert_eq!(array.get_derivatives().len(), 5);
        assert_abs_diff_eq!(array.get_derivatives().iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn test_rejects_bad_knots() {
        assert!(Plif::new(vec![], vec![]).is_err());
        assert!(Plif::new(vec![1.0, 0.0], vec![0.0, 0.0]).is_err());
        assert!(Plif::new(vec![1.0], vec![0.0, 0.0]).is_err());
    }
}
