use std::collections::VecDeque;

/// Raw samples kept for the median stage.
pub const MEDIAN_WINDOW: usize = 7;
/// Weight of the newest median in the EMA stage.
pub const EMA_ALPHA: f64 = 0.2;
/// Log-distance path loss exponent; 2.0 is free space, 2.5–3.0 typical indoor.
pub const PATH_LOSS_EXPONENT: f64 = 2.5;
/// RSSI expected at one metre when a satellite has not been calibrated.
pub const DEFAULT_REF_RSSI: i32 = -59;

/// Median-then-EMA smoother for one (satellite, device) stream.
///
/// Streams must never be mixed: the window and the running EMA only make
/// sense for samples taken by one radio about one transmitter.
#[derive(Debug, Clone, Default)]
pub struct SignalBuffer {
    window: VecDeque<i32>,
    ema: Option<f64>,
}

impl SignalBuffer {
    pub fn new() -> SignalBuffer {
        SignalBuffer::default()
    }

    /// Feed one raw sample, get the new smoothed value.
    pub fn add(&mut self, raw: i32) -> f64 {
        self.window.push_back(raw);
        if self.window.len() > MEDIAN_WINDOW {
            self.window.pop_front();
        }
        let median = window_median(&self.window);
        let ema = match self.ema {
            None => median,
            Some(prev) => EMA_ALPHA * median + (1.0 - EMA_ALPHA) * prev,
        };
        self.ema = Some(ema);
        ema
    }

    pub fn value(&self) -> Option<f64> {
        self.ema
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.ema = None;
    }
}

fn window_median(window: &VecDeque<i32>) -> f64 {
    let mut sorted: Vec<i32> = window.iter().copied().collect();
    sorted.sort_unstable();
    let n = sorted.len();
    if n % 2 == 1 {
        f64::from(sorted[n / 2])
    } else {
        f64::from(sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Log-distance path loss estimate in metres, rounded to centimetres.
/// `tx_power` is the satellite's 1 m reference RSSI. Returns `-1.0` for a
/// zero RSSI or a non-finite result.
pub fn estimate_distance(rssi: f64, tx_power: i32) -> f64 {
    if rssi == 0.0 {
        return -1.0;
    }
    let ratio = (f64::from(tx_power) - rssi) / (10.0 * PATH_LOSS_EXPONENT);
    let distance = 10f64.powf(ratio);
    if !distance.is_finite() {
        return -1.0;
    }
    (distance * 100.0).round() / 100.0
}

#[cfg(test)]
mod test {
    use super::{MEDIAN_WINDOW, SignalBuffer, estimate_distance};

    #[test]
    fn first_sample_seeds_the_ema() {
        let mut buf = SignalBuffer::new();
        assert_eq!(buf.add(-60), -60.0);
        assert_eq!(buf.value(), Some(-60.0));
    }

    #[test]
    fn median_rejects_a_single_spike() {
        let mut buf = SignalBuffer::new();
        for _ in 0..MEDIAN_WINDOW {
            buf.add(-60);
        }
        // One wild sample; the window median stays at -60 so the EMA input
        // is unchanged.
        let smoothed = buf.add(-20);
        assert_eq!(smoothed, -60.0);
    }

    #[test]
    fn even_window_uses_mean_of_middles() {
        let mut buf = SignalBuffer::new();
        buf.add(-50);
        let smoothed = buf.add(-60);
        // window [-60, -50], median -55; ema = 0.2*-55 + 0.8*-50
        assert!((smoothed - (0.2 * -55.0 + 0.8 * -50.0)).abs() < 1e-9);
    }

    #[test]
    fn repeated_value_converges_within_fifty_samples() {
        let mut buf = SignalBuffer::new();
        buf.add(-90);
        let mut last = 0.0;
        for _ in 0..50 {
            last = buf.add(-60);
        }
        assert!((last - -60.0).abs() < 1e-3);
    }

    #[test]
    fn clear_resets_window_and_ema() {
        let mut buf = SignalBuffer::new();
        buf.add(-40);
        buf.clear();
        assert_eq!(buf.value(), None);
        assert_eq!(buf.add(-70), -70.0);
    }

    #[test]
    fn distance_at_reference_power_is_one_metre() {
        assert_eq!(estimate_distance(-59.0, -59), 1.0);
    }

    #[test]
    fn distance_is_rounded_to_centimetres() {
        let d = estimate_distance(-60.0, -59);
        assert_eq!(d, 1.1);
        let far = estimate_distance(-85.0, -59);
        assert_eq!(far, 10.96);
    }

    #[test]
    fn zero_rssi_is_guarded() {
        assert_eq!(estimate_distance(0.0, -59), -1.0);
    }
}
