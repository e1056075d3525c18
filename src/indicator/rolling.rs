/// Fixed-length window over the most recent observations, kept in a ring buffer.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    period: usize,
    buffer: Vec<f64>,
    head: usize,
    count: usize,
}

impl RollingWindow {
    pub fn new(period: usize) -> Self {
        assert!(period > 0, "rolling window period must be > 0");
        Self {
            period,
            buffer: vec![0.0; period],
            head: 0,
            count: 0,
        }
    }

    /// Window holding the last `period` values of `values`.
    pub fn from_tail(values: &[f64], period: usize) -> Self {
        let mut window = Self::new(period);
        let start = values.len().saturating_sub(period);
        for v in &values[start..] {
            window.push(*v);
        }
        window
    }

    pub fn push(&mut self, value: f64) {
        self.buffer[self.head] = value;
        self.head = (self.head + 1) % self.period;
        if self.count < self.period {
            self.count += 1;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.count >= self.period
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn filled(&self) -> &[f64] {
        &self.buffer[..self.count]
    }

    /// Mean of the full window, `None` until `period` values were pushed.
    pub fn mean(&self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        super::mean(self.filled())
    }

    /// Sample standard deviation of the full window.
    pub fn sample_std(&self) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        super::sample_std(self.filled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_waits_for_full_window() {
        let mut w = RollingWindow::new(3);
        w.push(1.0);
        w.push(2.0);
        assert_eq!(w.mean(), None);
        w.push(3.0);
        assert!((w.mean().unwrap() - 2.0).abs() < f64::EPSILON);
        w.push(10.0); // [10, 2, 3]
        assert!((w.mean().unwrap() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn from_tail_keeps_latest_values() {
        let w = RollingWindow::from_tail(&[50.0, 1.0, 2.0, 3.0, 4.0], 4);
        assert!((w.mean().unwrap() - 2.5).abs() < f64::EPSILON);
        assert!((w.sample_std().unwrap() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let short = RollingWindow::from_tail(&[1.0, 2.0], 4);
        assert!(!short.is_ready());
        assert_eq!(short.sample_std(), None);
    }

    #[test]
    fn no_drift_against_naive_mean() {
        let mut w = RollingWindow::new(10);
        let mut naive: Vec<f64> = Vec::new();
        for i in 0..5_000u64 {
            let v = (i as f64) * 0.1 + 0.01;
            w.push(v);
            naive.push(v);
            if naive.len() > 10 {
                naive.remove(0);
            }
            if let Some(m) = w.mean() {
                let expected = naive.iter().sum::<f64>() / naive.len() as f64;
                assert!((m - expected).abs() < 1e-8, "drift at i={}", i);
            }
        }
    }

    #[test]
    #[should_panic(expected = "rolling window period must be > 0")]
    fn zero_period_panics() {
        RollingWindow::new(0);
    }
}
