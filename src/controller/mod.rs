//! Node Power Controller (§4.7): integrates power and performance time
//! series and periodically emits control telemetry; also owns RAPL cap
//! actuation via `command`.

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    t: f64,
    v: f64,
}

/// `{cap, perf, power, control_start, feedback_end}` from §4.7 step 4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlTelemetry {
    pub cap: f64,
    pub perf: f64,
    pub power: f64,
    pub control_start: f64,
    pub feedback_end: f64,
}

#[derive(Debug)]
pub struct NodePowerController {
    power_series: Vec<Sample>,
    perf_series: Vec<Sample>,
    last_action_time: f64,
    period: f64,
    cap: f64,
    rapl_domains: Vec<String>,
}

impl NodePowerController {
    pub fn new(period_secs: f64, initial_cap: f64, rapl_domains: Vec<String>) -> Self {
        Self {
            power_series: Vec::new(),
            perf_series: Vec::new(),
            last_action_time: 0.0,
            period: period_secs,
            cap: initial_cap,
            rapl_domains,
        }
    }

    pub fn feed_power(&mut self, t: f64, watts: f64) {
        self.power_series.push(Sample { t, v: watts });
    }

    pub fn feed_performance(&mut self, t: f64, units: f64) {
        self.perf_series.push(Sample { t, v: units });
    }

    pub fn step_ready(&self, now: f64) -> bool {
        self.power_series.len() > 1
            && self.perf_series.len() > 1
            && now > self.last_action_time + self.period
    }

    /// Run a control step if ready, producing telemetry to publish. Drops
    /// all but the last sample of each series and advances
    /// `last_action_time` to `now` regardless of whether the step fired.
    pub fn step(&mut self, now: f64) -> Option<ControlTelemetry> {
        if !self.step_ready(now) {
            return None;
        }

        let power: Vec<Sample> = self
            .power_series
            .iter()
            .copied()
            .filter(|s| s.t >= self.last_action_time)
            .collect();
        let perf: Vec<Sample> = self
            .perf_series
            .iter()
            .copied()
            .filter(|s| s.t >= self.last_action_time)
            .collect();

        let power_rate = rate(&power);
        let perf_rate = rate(&perf);

        let telemetry = ControlTelemetry {
            cap: self.cap,
            perf: perf_rate,
            power: power_rate,
            control_start: self.last_action_time,
            feedback_end: now,
        };

        if let Some(last) = self.power_series.last().copied() {
            self.power_series = vec![last];
        }
        if let Some(last) = self.perf_series.last().copied() {
            self.perf_series = vec![last];
        }
        self.last_action_time = now;

        Some(telemetry)
    }

    /// Set a new cap and return the per-domain RAPL program list (§4.3
    /// supplement: a fixed configured domain set is programmed every
    /// time, typically `package-0`/`package-1`).
    pub fn command(&mut self, cap: f64) -> Vec<(String, f64)> {
        self.cap = cap;
        self.rapl_domains
            .iter()
            .map(|domain| (domain.clone(), cap))
            .collect()
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }
}

/// Trapezoidal-rule integral over `t`, divided by the series' time span —
/// the rate the controller publishes as `perf`/`power`.
fn rate(series: &[Sample]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let span = series.last().unwrap().t - series.first().unwrap().t;
    if span <= 0.0 {
        return 0.0;
    }
    let integral: f64 = series
        .windows(2)
        .map(|w| {
            let (a, b) = (w[0], w[1]);
            (a.v + b.v) / 2.0 * (b.t - a.t)
        })
        .sum();
    integral / span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_not_ready_with_fewer_than_two_samples() {
        let mut ctl = NodePowerController::new(1.0, 0.0, vec!["package-0".into()]);
        ctl.feed_power(0.0, 100.0);
        ctl.feed_performance(0.0, 1.0);
        assert!(!ctl.step_ready(2.0));
    }

    #[test]
    fn step_ready_once_period_elapsed_with_two_samples() {
        let mut ctl = NodePowerController::new(1.0, 0.0, vec!["package-0".into()]);
        ctl.feed_power(0.0, 100.0);
        ctl.feed_power(1.0, 120.0);
        ctl.feed_performance(0.0, 1.0);
        ctl.feed_performance(1.0, 2.0);
        assert!(ctl.step_ready(1.5));
    }

    #[test]
    fn step_computes_trapezoidal_rate() {
        let mut ctl = NodePowerController::new(1.0, 50.0, vec!["package-0".into()]);
        ctl.feed_power(0.0, 100.0);
        ctl.feed_power(2.0, 100.0);
        ctl.feed_performance(0.0, 10.0);
        ctl.feed_performance(2.0, 10.0);
        let telemetry = ctl.step(2.0).unwrap();
        assert!((telemetry.power - 100.0).abs() < 1e-9);
        assert!((telemetry.perf - 10.0).abs() < 1e-9);
        assert_eq!(telemetry.cap, 50.0);
    }

    #[test]
    fn step_drops_all_but_last_sample_and_advances_action_time() {
        let mut ctl = NodePowerController::new(1.0, 0.0, vec!["package-0".into()]);
        ctl.feed_power(0.0, 100.0);
        ctl.feed_power(2.0, 120.0);
        ctl.feed_performance(0.0, 1.0);
        ctl.feed_performance(2.0, 3.0);
        ctl.step(2.0);
        ctl.feed_power(3.0, 130.0);
        ctl.feed_performance(3.0, 4.0);
        assert!(!ctl.step_ready(3.5));
    }

    #[test]
    fn command_programs_every_configured_domain() {
        let mut ctl = NodePowerController::new(1.0, 0.0, vec!["package-0".into(), "package-1".into()]);
        let actions = ctl.command(120.0);
        assert_eq!(
            actions,
            vec![
                ("package-0".to_string(), 120.0),
                ("package-1".to_string(), 120.0)
            ]
        );
        assert_eq!(ctl.cap(), 120.0);
    }
}
