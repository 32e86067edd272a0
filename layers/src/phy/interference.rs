//! Interference accumulator
//!
//! Keeps every PSD currently on air at one receiver together with its time
//! span. A reception window opens with [`Interference::start_rx`]; when it
//! closes the per-band SINR is averaged over the chunks delimited by signal
//! arrivals and departures, weighting each chunk by its duration.

use super::spectrum::SpectrumValue;
use crate::LayerError;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone)]
struct ActiveSignal {
    psd: SpectrumValue,
    start: Duration,
    end: Duration,
}

#[derive(Debug, Clone)]
struct RxWindow {
    signal: SpectrumValue,
    start: Duration,
}

/// Per-receiver running sum of concurrent signals
#[derive(Debug, Clone, Default)]
pub struct Interference {
    noise: Option<SpectrumValue>,
    signals: Vec<ActiveSignal>,
    rx: Option<RxWindow>,
}

impl Interference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_noise_psd(&mut self, noise: SpectrumValue) {
        self.noise = Some(noise);
    }

    pub fn noise_psd(&self) -> Option<&SpectrumValue> {
        self.noise.as_ref()
    }

    pub fn is_receiving(&self) -> bool {
        self.rx.is_some()
    }

    /// Fold a signal on air during `[now, now + duration)` into the sum
    pub fn add_signal(&mut self, psd: &SpectrumValue, now: Duration, duration: Duration) {
        let horizon = self.rx.as_ref().map_or(now, |rx| rx.start);
        self.signals.retain(|signal| signal.end > horizon);
        self.signals.push(ActiveSignal {
            psd: psd.clone(),
            start: now,
            end: now + duration,
        });
        trace!("Interference: {} signals on air", self.signals.len());
    }

    /// Mark `psd` as useful signal; opens the window on the first call
    pub fn start_rx(&mut self, psd: &SpectrumValue, now: Duration) {
        match &mut self.rx {
            Some(window) => window.signal += psd,
            None => {
                self.rx = Some(RxWindow {
                    signal: psd.clone(),
                    start: now,
                });
            }
        }
    }

    /// Close the window and return the time-averaged per-band SINR
    pub fn end_rx(&mut self, now: Duration) -> Result<SpectrumValue, LayerError> {
        let window = self.rx.take().ok_or_else(|| {
            LayerError::InvalidState("Interference window closed while not receiving".into())
        })?;
        let noise = self.noise.as_ref().ok_or_else(|| {
            LayerError::NotInitialized("noise PSD not set".into())
        })?;

        let mut boundaries = vec![window.start, now];
        for signal in &self.signals {
            for t in [signal.start, signal.end] {
                if t > window.start && t < now {
                    boundaries.push(t);
                }
            }
        }
        boundaries.sort();
        boundaries.dedup();

        let chunk_sinr = |at: Duration| {
            let mut interference = SpectrumValue::zeros(window.signal.model().clone());
            for signal in self.signals.iter().filter(|s| s.start <= at && s.end > at) {
                interference += &signal.psd;
            }
            interference -= &window.signal;
            interference.clamp_non_negative();
            interference += noise;
            window.signal.ratio(&interference)
        };

        if boundaries.len() < 2 {
            return Ok(chunk_sinr(window.start));
        }

        let mut average = SpectrumValue::zeros(window.signal.model().clone());
        let mut total = 0.0;
        for pair in boundaries.windows(2) {
            let weight = (pair[1] - pair[0]).as_secs_f64();
            let sinr = chunk_sinr(pair[0]);
            average += &(&sinr * weight);
            total += weight;
        }
        Ok(&average * (1.0 / total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::spectrum::SpectrumModel;
    use std::sync::Arc;

    fn model() -> Arc<SpectrumModel> {
        SpectrumModel::new(60e9, 3, 1e6)
    }

    fn flat(value: f64) -> SpectrumValue {
        SpectrumValue::from_values(model(), vec![value; 3]).unwrap()
    }

    #[test]
    fn test_sinr_without_interference() {
        let mut acc = Interference::new();
        acc.set_noise_psd(flat(1.0));
        let signal = flat(100.0);
        let t0 = Duration::from_micros(10);
        acc.add_signal(&signal, t0, Duration::from_micros(50));
        acc.start_rx(&signal, t0);
        let sinr = acc.end_rx(t0 + Duration::from_micros(50)).unwrap();
        assert!(sinr.values().iter().all(|v| (v - 100.0).abs() < 1e-9));
        assert!(!acc.is_receiving());
    }

    #[test]
    fn test_full_overlap_interferer() {
        let mut acc = Interference::new();
        acc.set_noise_psd(flat(1.0));
        let t0 = Duration::ZERO;
        let d = Duration::from_micros(100);
        acc.add_signal(&flat(100.0), t0, d);
        acc.add_signal(&flat(9.0), t0, d);
        acc.start_rx(&flat(100.0), t0);
        let sinr = acc.end_rx(d).unwrap();
        assert!((sinr.mean() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_overlap_is_time_weighted() {
        let mut acc = Interference::new();
        acc.set_noise_psd(flat(1.0));
        let d = Duration::from_micros(100);
        acc.add_signal(&flat(100.0), Duration::ZERO, d);
        acc.start_rx(&flat(100.0), Duration::ZERO);
        // Interferer on air for the second half only
        acc.add_signal(&flat(9.0), Duration::from_micros(50), Duration::from_micros(200));
        let sinr = acc.end_rx(d).unwrap();
        assert!((sinr.mean() - (0.5 * 100.0 + 0.5 * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_end_rx_requires_window() {
        let mut acc = Interference::new();
        acc.set_noise_psd(flat(1.0));
        assert!(acc.end_rx(Duration::ZERO).is_err());
    }
}
