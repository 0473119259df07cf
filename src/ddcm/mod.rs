//! Dynamic Duty Cycle Modulation (§4.5): the per-CPU phase-driven duty
//! cycle law, and the per-container manager that gates it on every CPU
//! having reported a matching phase.

use std::collections::HashMap;

/// Outcome of a single law evaluation, surfaced for logging/telemetry —
/// none of these carry information the caller needs to act on beyond what
/// `dclevel()` already reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `totaltime` fell below the damper; no change was made.
    Damper,
    /// The phase took enough longer than the last one to reset to full
    /// duty cycle.
    Slowdown,
    /// The law ran its normal reduction/increase branch.
    Ddcm,
}

/// The per-CPU duty-cycle law. Level is clamped to `1..=16`; 16 is full
/// (100%) duty cycle.
#[derive(Debug, Clone)]
pub struct DdcmLaw {
    dclevel: u32,
    previous_totaltime: Option<f64>,
    damper: f64,
    slowdown: f64,
}

impl DdcmLaw {
    pub const MAX_LEVEL: u32 = 16;
    pub const MIN_LEVEL: u32 = 1;

    pub fn new(damper: f64, slowdown: f64) -> Self {
        Self {
            dclevel: Self::MAX_LEVEL,
            previous_totaltime: None,
            damper,
            slowdown,
        }
    }

    pub fn dclevel(&self) -> u32 {
        self.dclevel
    }

    pub fn reset(&mut self) {
        self.dclevel = Self::MAX_LEVEL;
        self.previous_totaltime = None;
    }

    /// Evaluate one phase report. `computetime`/`totaltime` are seconds.
    pub fn execute(&mut self, computetime: f64, totaltime: f64) -> Outcome {
        if totaltime < self.damper {
            return Outcome::Damper;
        }

        if self.dclevel < Self::MAX_LEVEL {
            if let Some(previous) = self.previous_totaltime {
                if totaltime > self.slowdown * previous {
                    self.reset();
                    self.previous_totaltime = Some(totaltime);
                    return Outcome::Slowdown;
                }
            }
        }

        let work = computetime / totaltime;
        let effective_work = work * Self::MAX_LEVEL as f64 / self.dclevel as f64;

        let new_level = if effective_work <= 1.0 {
            let reduction = (effective_work / 0.0625).floor() as i64 - 15;
            let mut new = if reduction > -14 && reduction < 0 {
                self.dclevel as i64 + reduction + 1
            } else if reduction <= -14 {
                self.dclevel as i64 - 13
            } else {
                self.dclevel as i64
            };
            if new < Self::MIN_LEVEL as i64 {
                new = Self::MAX_LEVEL as i64;
            }
            new as u32
        } else {
            let increase = ((work / self.dclevel as f64) / 0.0625).floor() as i64;
            (self.dclevel as i64 + increase).min(Self::MAX_LEVEL as i64) as u32
        };

        self.dclevel = new_level.clamp(Self::MIN_LEVEL, Self::MAX_LEVEL);
        self.previous_totaltime = Some(totaltime);
        Outcome::Ddcm
    }
}

/// One CPU's accumulated phase report, reset after each `run_policy` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseContext {
    pub computetime: f64,
    pub totaltime: f64,
    pub aggregation: u64,
    pub set: bool,
}

/// Per-container policy manager: gates `DdcmLaw::execute` on every CPU in
/// the container having reported a phase context for the same
/// aggregation round.
#[derive(Debug)]
pub struct PowerPolicyManager {
    laws: HashMap<u32, DdcmLaw>,
    contexts: HashMap<u32, PhaseContext>,
    damper_exits: u64,
    slowdown_exits: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyStats {
    pub damper_exits: u64,
    pub slowdown_exits: u64,
}

impl PowerPolicyManager {
    pub fn new(cpus: &[u32], damper: f64, slowdown: f64) -> Self {
        let laws = cpus
            .iter()
            .map(|&cpu| (cpu, DdcmLaw::new(damper, slowdown)))
            .collect();
        let contexts = cpus.iter().map(|&cpu| (cpu, PhaseContext::default())).collect();
        Self {
            laws,
            contexts,
            damper_exits: 0,
            slowdown_exits: 0,
        }
    }

    /// Record a `phase_context` downstream event for one CPU.
    pub fn set_context(&mut self, cpu: u32, computetime: f64, totaltime: f64, aggregation: u64) {
        if let Some(ctx) = self.contexts.get_mut(&cpu) {
            *ctx = PhaseContext {
                computetime,
                totaltime,
                aggregation,
                set: true,
            };
        }
    }

    /// Run the law once per CPU if every CPU has a set phase context and
    /// they all agree on the aggregation counter. Returns `true` if the
    /// policy actually ran. If aggregations disagree, every CPU is reset
    /// and every context's set-flag cleared (§4.5).
    pub fn run_policy(&mut self) -> bool {
        if self.contexts.is_empty() || !self.contexts.values().all(|c| c.set) {
            return false;
        }

        let mut aggregations = self.contexts.values().map(|c| c.aggregation);
        let first = aggregations.next();
        let all_match = first.is_some() && aggregations.all(|a| Some(a) == first);

        if !all_match {
            for law in self.laws.values_mut() {
                law.reset();
            }
            for ctx in self.contexts.values_mut() {
                ctx.set = false;
            }
            return false;
        }

        for (cpu, ctx) in self.contexts.iter() {
            if let Some(law) = self.laws.get_mut(cpu) {
                match law.execute(ctx.computetime, ctx.totaltime) {
                    Outcome::Damper => self.damper_exits += 1,
                    Outcome::Slowdown => self.slowdown_exits += 1,
                    Outcome::Ddcm => {}
                }
            }
        }

        for ctx in self.contexts.values_mut() {
            ctx.set = false;
        }
        true
    }

    pub fn reset_all(&mut self) {
        for law in self.laws.values_mut() {
            law.reset();
        }
        for ctx in self.contexts.values_mut() {
            *ctx = PhaseContext::default();
        }
    }

    pub fn dclevel(&self, cpu: u32) -> Option<u32> {
        self.laws.get(&cpu).map(DdcmLaw::dclevel)
    }

    pub fn dclevels(&self) -> HashMap<u32, u32> {
        self.laws.iter().map(|(&cpu, law)| (cpu, law.dclevel())).collect()
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            damper_exits: self.damper_exits,
            slowdown_exits: self.slowdown_exits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damper_leaves_level_unchanged() {
        let mut law = DdcmLaw::new(0.1, 1.5);
        let outcome = law.execute(0.0, 0.05);
        assert_eq!(outcome, Outcome::Damper);
        assert_eq!(law.dclevel(), 16);
    }

    #[test]
    fn scenario_six_reduction_matches_literal_spec_example() {
        let mut law = DdcmLaw::new(0.1, 1.5);
        let outcome = law.execute(0.4, 1.0);
        assert_eq!(outcome, Outcome::Ddcm);
        assert_eq!(law.dclevel(), 8);
    }

    #[test]
    fn level_never_drops_below_one() {
        let mut law = DdcmLaw::new(0.0, 1.5);
        for _ in 0..20 {
            law.execute(0.0001, 1.0);
        }
        assert!(law.dclevel() >= DdcmLaw::MIN_LEVEL);
        assert!(law.dclevel() <= DdcmLaw::MAX_LEVEL);
    }

    #[test]
    fn slowdown_resets_to_full_duty_cycle() {
        let mut law = DdcmLaw::new(0.0, 1.5);
        law.execute(0.4, 1.0);
        assert!(law.dclevel() < 16);
        let outcome = law.execute(0.4, 10.0);
        assert_eq!(outcome, Outcome::Slowdown);
        assert_eq!(law.dclevel(), 16);
    }

    #[test]
    fn run_policy_waits_for_all_cpus() {
        let mut mgr = PowerPolicyManager::new(&[0, 1], 0.1, 1.5);
        mgr.set_context(0, 0.4, 1.0, 1);
        assert!(!mgr.run_policy());
        mgr.set_context(1, 0.4, 1.0, 1);
        assert!(mgr.run_policy());
    }

    #[test]
    fn mismatched_aggregation_resets_and_clears_flags() {
        let mut mgr = PowerPolicyManager::new(&[0, 1], 0.1, 1.5);
        mgr.set_context(0, 0.4, 1.0, 1);
        mgr.set_context(1, 0.4, 1.0, 2);
        assert!(!mgr.run_policy());
        assert_eq!(mgr.dclevel(0), Some(16));
        assert_eq!(mgr.dclevel(1), Some(16));
    }

    #[test]
    fn run_policy_clears_set_flags_after_running() {
        let mut mgr = PowerPolicyManager::new(&[0], 0.1, 1.5);
        mgr.set_context(0, 0.4, 1.0, 1);
        assert!(mgr.run_policy());
        assert!(!mgr.contexts.values().next().unwrap().set);
    }

    #[test]
    fn reset_all_is_idempotent_and_returns_to_sixteen() {
        let mut mgr = PowerPolicyManager::new(&[0, 1], 0.1, 1.5);
        mgr.set_context(0, 0.4, 1.0, 1);
        mgr.set_context(1, 0.4, 1.0, 1);
        mgr.run_policy();
        mgr.reset_all();
        mgr.reset_all();
        assert_eq!(mgr.dclevel(0), Some(16));
        assert_eq!(mgr.dclevel(1), Some(16));
    }

    proptest::proptest! {
        /// Whatever sequence of phase reports a CPU sees, the law's level
        /// never leaves `1..=16` (§4.5).
        #[test]
        fn dclevel_stays_in_bounds(
            damper in 0.0f64..0.5,
            slowdown in 1.0f64..3.0,
            reports in proptest::collection::vec((0.0001f64..2.0, 0.0001f64..2.0), 1..50),
        ) {
            let mut law = DdcmLaw::new(damper, slowdown);
            for (computetime, totaltime) in reports {
                law.execute(computetime, totaltime);
                proptest::prop_assert!(law.dclevel() >= DdcmLaw::MIN_LEVEL);
                proptest::prop_assert!(law.dclevel() <= DdcmLaw::MAX_LEVEL);
            }
        }
    }
}
