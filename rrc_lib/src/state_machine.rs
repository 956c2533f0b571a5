/** ------------------------------------------------------------
 * Per-technology time/energy aggregates over RRC state ranges
 * ------------------------------------------------------------- */
use crate::packet::{Packet, TimeRange};
use crate::profile::{Profile, ProfileKind};
use crate::rrc_state::{RrcState, RrcStateRange};
use crate::state_range;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/**
 * Time (s) and energy (J) accumulated for one state bucket
 */
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub time: f64,
    pub energy: f64,
}

impl Bucket {
    fn add(&mut self, time: f64, energy: f64) {
        self.time += time;
        self.energy += energy;
    }
}

fn ratio(value: f64, denominator: f64) -> f64 {
    if denominator != 0.0 {
        value / denominator
    } else {
        0.0
    }
}

/**
 * Values every technology reports
 */
#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSummary {
    pub trace_duration      : f64,
    pub packets_duration    : f64,
    pub total_rrc_energy    : f64,
    pub joules_per_kilobyte : f64, // 0 when no bytes were transferred
    pub ranges              : Vec<RrcStateRange>,
}

impl MachineSummary {
    fn new(ranges: Vec<RrcStateRange>, total_rrc_energy: f64, total_bytes: f64, packets_duration: f64, trace_duration: f64) -> Self {
        let joules_per_kilobyte = if total_bytes != 0.0 {
            total_rrc_energy / (total_bytes / 1000.0)
        } else {
            0.0
        };
        Self {
            trace_duration,
            packets_duration,
            total_rrc_energy,
            joules_per_kilobyte,
            ranges,
        }
    }
}

/**
 * Getters shared by all technology aggregates
 */
pub trait RrcAggregate {
    fn summary(&self) -> &MachineSummary;

    fn trace_duration(&self) -> f64 {
        self.summary().trace_duration
    }

    fn packets_duration(&self) -> f64 {
        self.summary().packets_duration
    }

    fn total_rrc_energy(&self) -> f64 {
        self.summary().total_rrc_energy
    }

    fn joules_per_kilobyte(&self) -> f64 {
        self.summary().joules_per_kilobyte
    }

    fn ranges(&self) -> &[RrcStateRange] {
        &self.summary().ranges
    }

    /// Share of the trace spent in `time`
    fn time_ratio(&self, time: f64) -> f64 {
        ratio(time, self.trace_duration())
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMachine3G {
    pub summary           : MachineSummary,
    pub idle              : Bucket,
    pub dch               : Bucket, // DCH and its tail
    pub dch_tail          : Bucket,
    pub fach              : Bucket, // FACH and its tail
    pub fach_tail         : Bucket,
    pub idle_to_dch       : Bucket,
    pub idle_to_dch_count : u32,
    pub fach_to_dch       : Bucket,
    pub fach_to_dch_count : u32,
}

impl StateMachine3G {
    fn accumulate(ranges: &[RrcStateRange], profile: &Profile) -> Self {
        let mut m = Self::default();
        for range in ranges {
            let duration = range.duration();
            let energy = profile.energy(range.begin_time, range.end_time, range.state, &[]);
            match range.state {
                RrcState::Idle => m.idle.add(duration, energy),
                RrcState::Dch => m.dch.add(duration, energy),
                RrcState::TailDch => {
                    m.dch.add(duration, energy);
                    m.dch_tail.add(duration, energy);
                }
                RrcState::Fach => m.fach.add(duration, energy),
                RrcState::TailFach => {
                    m.fach.add(duration, energy);
                    m.fach_tail.add(duration, energy);
                }
                RrcState::PromoIdleDch => {
                    m.idle_to_dch_count += 1;
                    m.idle_to_dch.add(duration, energy);
                }
                RrcState::PromoFachDch => {
                    m.fach_to_dch_count += 1;
                    m.fach_to_dch.add(duration, energy);
                }
                _ => {}
            }
        }
        m
    }

    fn total_energy(&self) -> f64 {
        self.fach.energy + self.dch.energy + self.fach_to_dch.energy + self.idle_to_dch.energy + self.idle.energy
    }

    pub fn idle_time_ratio(&self) -> f64 {
        self.time_ratio(self.idle.time)
    }

    pub fn dch_time_ratio(&self) -> f64 {
        self.time_ratio(self.dch.time)
    }

    pub fn fach_time_ratio(&self) -> f64 {
        self.time_ratio(self.fach.time)
    }

    pub fn idle_to_dch_time_ratio(&self) -> f64 {
        self.time_ratio(self.idle_to_dch.time)
    }

    pub fn fach_to_dch_time_ratio(&self) -> f64 {
        self.time_ratio(self.fach_to_dch.time)
    }

    pub fn dch_tail_ratio(&self) -> f64 {
        ratio(self.dch_tail.time, self.dch.time)
    }

    pub fn fach_tail_ratio(&self) -> f64 {
        ratio(self.fach_tail.time, self.fach.time)
    }

    /// Promotion overhead relative to the time packets were flowing
    pub fn promotion_ratio(&self) -> f64 {
        ratio(self.idle_to_dch.time + self.fach_to_dch.time, self.packets_duration())
    }
}

impl RrcAggregate for StateMachine3G {
    fn summary(&self) -> &MachineSummary {
        &self.summary
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMachineLte {
    pub summary        : MachineSummary,
    pub idle           : Bucket,
    pub promotion      : Bucket, // idle -> continuous reception
    pub cr             : Bucket, // continuous reception and its tail
    pub cr_tail        : Bucket,
    pub drx_short      : Bucket,
    pub drx_long       : Bucket,
}

impl StateMachineLte {
    fn accumulate(ranges: &[RrcStateRange], profile: &Profile, packets: &[Packet]) -> (Self, f64) {
        let mut m = Self::default();
        let mut total = 0.0;
        for range in ranges {
            let duration = range.duration();
            let energy = profile.energy(range.begin_time, range.end_time, range.state, packets);
            total += energy;
            match range.state {
                RrcState::LteIdle => m.idle.add(duration, energy),
                RrcState::LtePromotion => m.promotion.add(duration, energy),
                RrcState::LteContinuous => m.cr.add(duration, energy),
                RrcState::LteCrTail => {
                    m.cr.add(duration, energy);
                    m.cr_tail.add(duration, energy);
                }
                RrcState::LteDrxShort => m.drx_short.add(duration, energy),
                RrcState::LteDrxLong => m.drx_long.add(duration, energy),
                _ => {}
            }
        }
        (m, total)
    }

    pub fn idle_time_ratio(&self) -> f64 {
        self.time_ratio(self.idle.time)
    }

    pub fn promotion_time_ratio(&self) -> f64 {
        self.time_ratio(self.promotion.time)
    }

    pub fn cr_time_ratio(&self) -> f64 {
        self.time_ratio(self.cr.time)
    }

    pub fn cr_tail_time_ratio(&self) -> f64 {
        self.time_ratio(self.cr_tail.time)
    }

    pub fn drx_short_time_ratio(&self) -> f64 {
        self.time_ratio(self.drx_short.time)
    }

    pub fn drx_long_time_ratio(&self) -> f64 {
        self.time_ratio(self.drx_long.time)
    }

    /// Signalling overhead: promotion time over packet time
    pub fn promotion_ratio(&self) -> f64 {
        ratio(self.promotion.time, self.packets_duration())
    }

    pub fn cr_tail_ratio(&self) -> f64 {
        ratio(self.cr_tail.time, self.cr.time)
    }

    pub fn drx_short_ratio(&self) -> f64 {
        ratio(self.drx_short.time, self.packets_duration())
    }

    pub fn drx_long_ratio(&self) -> f64 {
        ratio(self.drx_long.time, self.packets_duration())
    }
}

impl RrcAggregate for StateMachineLte {
    fn summary(&self) -> &MachineSummary {
        &self.summary
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMachineWifi {
    pub summary : MachineSummary,
    pub active  : Bucket, // active and tail
    pub tail    : Bucket,
    pub idle    : Bucket,
}

impl StateMachineWifi {
    fn accumulate(ranges: &[RrcStateRange], profile: &Profile) -> (Self, f64) {
        let mut m = Self::default();
        let mut total = 0.0;
        for range in ranges {
            let duration = range.duration();
            let energy = profile.energy(range.begin_time, range.end_time, range.state, &[]);
            total += energy;
            match range.state {
                RrcState::WifiActive => m.active.add(duration, energy),
                RrcState::WifiTail => {
                    m.active.add(duration, energy);
                    m.tail.add(duration, energy);
                }
                RrcState::WifiIdle => m.idle.add(duration, energy),
                _ => {}
            }
        }
        (m, total)
    }

    pub fn active_time_ratio(&self) -> f64 {
        self.time_ratio(self.active.time)
    }

    pub fn tail_time_ratio(&self) -> f64 {
        self.time_ratio(self.tail.time)
    }

    pub fn idle_time_ratio(&self) -> f64 {
        self.time_ratio(self.idle.time)
    }
}

impl RrcAggregate for StateMachineWifi {
    fn summary(&self) -> &MachineSummary {
        &self.summary
    }
}

/**
 * Aggregate for the network type of the profile used
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RrcStateMachine {
    ThreeG(StateMachine3G),
    Lte(StateMachineLte),
    Wifi(StateMachineWifi),
}

impl RrcAggregate for RrcStateMachine {
    fn summary(&self) -> &MachineSummary {
        match self {
            RrcStateMachine::ThreeG(m) => &m.summary,
            RrcStateMachine::Lte(m) => &m.summary,
            RrcStateMachine::Wifi(m) => &m.summary,
        }
    }
}

/**
 * Reconstruct the state ranges for `packets` and aggregate them.
 *
 * With a `time_range`, only the part of each range inside it counts.
 */
pub fn create(
    packets: &[Packet],
    profile: &Profile,
    packets_duration: f64,
    trace_duration: f64,
    total_bytes: f64,
    time_range: Option<TimeRange>,
) -> RrcStateMachine {
    let mut ranges = state_range::create(packets, profile, trace_duration);
    if let Some(window) = time_range {
        ranges = clip_to_time_range(&ranges, window);
    }
    from_ranges(ranges, packets, profile, packets_duration, trace_duration, total_bytes)
}

/**
 * Aggregate an already reconstructed range list. Each range is priced
 * by the profile's energy function and added to its state bucket.
 */
pub fn from_ranges(
    ranges: Vec<RrcStateRange>,
    packets: &[Packet],
    profile: &Profile,
    packets_duration: f64,
    trace_duration: f64,
    total_bytes: f64,
) -> RrcStateMachine {
    let negative = ranges.iter().filter(|r| r.duration() < 0.0).count();
    if negative > 0 {
        warn!(negative, "negative duration state ranges kept as is");
    }

    let machine = match &profile.kind {
        ProfileKind::ThreeG(_) => {
            let mut m = StateMachine3G::accumulate(&ranges, profile);
            m.summary = MachineSummary::new(ranges, m.total_energy(), total_bytes, packets_duration, trace_duration);
            RrcStateMachine::ThreeG(m)
        }
        ProfileKind::Lte(_) => {
            let (mut m, total) = StateMachineLte::accumulate(&ranges, profile, packets);
            m.summary = MachineSummary::new(ranges, total, total_bytes, packets_duration, trace_duration);
            RrcStateMachine::Lte(m)
        }
        ProfileKind::Wifi(_) => {
            let (mut m, total) = StateMachineWifi::accumulate(&ranges, profile);
            m.summary = MachineSummary::new(ranges, total, total_bytes, packets_duration, trace_duration);
            RrcStateMachine::Wifi(m)
        }
    };

    debug!(
        ranges = machine.ranges().len(),
        energy = machine.total_rrc_energy(),
        "aggregated rrc state machine"
    );
    machine
}

/**
 * Keep the ranges overlapping `window`, clipped to it.
 *
 * Only the first range running past the end of the window is kept.
 */
pub fn clip_to_time_range(ranges: &[RrcStateRange], window: TimeRange) -> Vec<RrcStateRange> {
    let (begin, end) = (window.begin_time, window.end_time);
    let mut clipped = Vec::new();
    let mut crossed_end = false;

    for r in ranges {
        if r.begin_time >= begin && r.end_time <= end {
            clipped.push(*r);
        } else if r.begin_time <= begin && r.end_time <= end && r.end_time > begin {
            clipped.push(RrcStateRange::new(begin, r.end_time, r.state));
        } else if r.begin_time <= begin && r.end_time >= end {
            clipped.push(RrcStateRange::new(begin, end, r.state));
        } else if r.begin_time >= begin && r.begin_time < end && r.end_time >= end && !crossed_end {
            clipped.push(RrcStateRange::new(r.begin_time, end, r.state));
            crossed_end = true;
        }
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Direction;
    use crate::profile::ProfileType;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn wifi_profile(active_power: f64) -> Profile {
        let mut profile = Profile::default_wifi();
        profile.common.power_wifi_active = active_power;
        profile
    }

    #[test]
    fn wifi_single_active_range() {
        let ranges = vec![RrcStateRange::new(0.0, 2000.0, RrcState::WifiActive)];
        let machine = from_ranges(ranges, &[], &wifi_profile(0.001), 1000.0, 2000.0, 100.0);

        assert_relative_eq!(machine.total_rrc_energy(), 2.0);
        assert_relative_eq!(machine.joules_per_kilobyte(), 20.0);
        assert_eq!(machine.trace_duration(), 2000.0);
        assert_eq!(machine.packets_duration(), 1000.0);
        let RrcStateMachine::Wifi(m) = machine else {
            panic!("expected a wifi aggregate");
        };
        assert_relative_eq!(m.active.time, 2000.0);
        assert_relative_eq!(m.active_time_ratio(), 1.0);
    }

    #[test]
    fn g3_idle_ranges_are_summed() {
        let mut profile = Profile::default_3g();
        if let ProfileKind::ThreeG(p) = &mut profile.kind {
            p.power_idle = 0.2;
        }
        let ranges: Vec<_> = (0..5)
            .map(|i| RrcStateRange::new(i as f64 * 500.0, (i + 1) as f64 * 500.0, RrcState::Idle))
            .collect();
        let machine = from_ranges(ranges, &[], &profile, 0.0, 2500.0, 0.0);
        let RrcStateMachine::ThreeG(m) = &machine else {
            panic!("expected a 3g aggregate");
        };
        assert_relative_eq!(m.idle.time, 2500.0);
        assert_relative_eq!(m.idle.energy, 500.0);
        assert_relative_eq!(m.idle_time_ratio(), 1.0);
        assert_eq!(machine.joules_per_kilobyte(), 0.0);
    }

    #[test]
    fn g3_buckets_fold_tails_and_count_promotions() {
        let ranges = vec![
            RrcStateRange::new(0.0, 1.0, RrcState::Idle),
            RrcStateRange::new(1.0, 3.0, RrcState::PromoIdleDch),
            RrcStateRange::new(3.0, 4.0, RrcState::Dch),
            RrcStateRange::new(4.0, 9.0, RrcState::TailDch),
            RrcStateRange::new(9.0, 10.0, RrcState::Fach),
            RrcStateRange::new(10.0, 11.0, RrcState::PromoFachDch),
            RrcStateRange::new(11.0, 16.0, RrcState::TailDch),
            RrcStateRange::new(16.0, 28.0, RrcState::TailFach),
        ];
        let machine = from_ranges(ranges, &[], &Profile::default_3g(), 10.0, 28.0, 1000.0);
        let RrcStateMachine::ThreeG(m) = &machine else {
            panic!("expected a 3g aggregate");
        };
        assert_eq!(m.idle_to_dch_count, 1);
        assert_eq!(m.fach_to_dch_count, 1);
        assert_relative_eq!(m.dch.time, 11.0);
        assert_relative_eq!(m.dch_tail.time, 10.0);
        assert_relative_eq!(m.fach.time, 13.0);
        assert_relative_eq!(m.fach_tail_ratio(), 12.0 / 13.0);
        assert_relative_eq!(m.promotion_ratio(), 0.3);
        assert_relative_eq!(machine.total_rrc_energy(), m.total_energy());
    }

    #[test]
    fn ratios_are_zero_without_duration() {
        let empty = Vec::new();
        for profile_type in [ProfileType::ThreeG, ProfileType::Lte, ProfileType::Wifi] {
            let machine = from_ranges(empty.clone(), &[], &Profile::default_for(profile_type), 0.0, 0.0, 0.0);
            assert_eq!(machine.time_ratio(5.0), 0.0);
            assert_eq!(machine.joules_per_kilobyte(), 0.0);
            match machine {
                RrcStateMachine::ThreeG(m) => {
                    assert_eq!(m.dch_time_ratio(), 0.0);
                    assert_eq!(m.dch_tail_ratio(), 0.0);
                    assert_eq!(m.promotion_ratio(), 0.0);
                }
                RrcStateMachine::Lte(m) => {
                    assert_eq!(m.cr_time_ratio(), 0.0);
                    assert_eq!(m.cr_tail_ratio(), 0.0);
                    assert_eq!(m.drx_long_ratio(), 0.0);
                }
                RrcStateMachine::Wifi(m) => {
                    assert_eq!(m.idle_time_ratio(), 0.0);
                    assert_eq!(m.tail_time_ratio(), 0.0);
                }
            }
        }
    }

    #[test]
    fn negative_ranges_are_tolerated() {
        let ranges = vec![RrcStateRange::new(5.0, 4.0, RrcState::WifiIdle)];
        let machine = from_ranges(ranges, &[], &Profile::default_wifi(), 0.0, 10.0, 0.0);
        assert_eq!(machine.ranges().len(), 1);
        assert!(machine.total_rrc_energy() < 0.0);
    }

    #[test]
    fn clip_handles_every_overlap() {
        let ranges = vec![
            RrcStateRange::new(0.0, 2.0, RrcState::Idle),
            RrcStateRange::new(2.0, 4.0, RrcState::Dch),
            RrcStateRange::new(4.0, 6.0, RrcState::Fach),
            RrcStateRange::new(6.0, 8.0, RrcState::Idle),
            RrcStateRange::new(8.0, 9.0, RrcState::Dch),
        ];
        let clipped = clip_to_time_range(&ranges, TimeRange::new(1.0, 5.0));
        assert_eq!(
            clipped,
            vec![
                RrcStateRange::new(1.0, 2.0, RrcState::Idle),
                RrcStateRange::new(2.0, 4.0, RrcState::Dch),
                RrcStateRange::new(4.0, 5.0, RrcState::Fach),
            ]
        );

        let inside = clip_to_time_range(&ranges, TimeRange::new(2.5, 3.0));
        assert_eq!(inside, vec![RrcStateRange::new(2.5, 3.0, RrcState::Dch)]);
    }

    #[test]
    fn time_range_limits_the_aggregate() {
        let packets = vec![Packet::new(1.0, Direction::Uplink, 100, 60)];
        let full = create(&packets, &Profile::default_wifi(), 0.0, 10.0, 100.0, None);
        let part = create(&packets, &Profile::default_wifi(), 0.0, 10.0, 100.0, Some(TimeRange::new(0.0, 0.5)));
        assert!(part.total_rrc_energy() < full.total_rrc_energy());
        assert_eq!(part.ranges().len(), 1);
    }

    fn bucket_energy(machine: &RrcStateMachine) -> f64 {
        match machine {
            RrcStateMachine::ThreeG(m) => m.idle.energy + m.dch.energy + m.fach.energy + m.idle_to_dch.energy + m.fach_to_dch.energy,
            RrcStateMachine::Lte(m) => m.idle.energy + m.promotion.energy + m.cr.energy + m.drx_short.energy + m.drx_long.energy,
            RrcStateMachine::Wifi(m) => m.active.energy + m.idle.energy,
        }
    }

    fn trace_strategy() -> impl Strategy<Value = (Vec<Packet>, f64, usize)> {
        (prop::collection::vec((0.0f64..20.0, any::<bool>(), 40u32..1500), 1..30), 0.0f64..20.0, 0usize..3).prop_map(
            |(raw, extra, kind)| {
                let mut times: Vec<f64> = raw.iter().map(|(t, _, _)| *t).collect();
                times.sort_by(f64::total_cmp);
                let packets: Vec<Packet> = times
                    .iter()
                    .zip(&raw)
                    .map(|(ts, (_, is_up, len))| {
                        let dir = if *is_up { Direction::Uplink } else { Direction::Downlink };
                        Packet::new(*ts, dir, *len, len - 40)
                    })
                    .collect();
                let duration = times.last().copied().unwrap_or(0.0) + extra;
                (packets, duration, kind)
            },
        )
    }

    proptest! {
        #[test]
        fn total_energy_is_sum_of_buckets((packets, duration, kind) in trace_strategy()) {
            let profile = Profile::default_for([ProfileType::ThreeG, ProfileType::Lte, ProfileType::Wifi][kind]);
            let machine = create(&packets, &profile, duration, duration, 1000.0, None);
            let sum = bucket_energy(&machine);
            prop_assert!((machine.total_rrc_energy() - sum).abs() <= 1e-6 * sum.abs().max(1.0));
        }

        #[test]
        fn split_pipeline_matches_combined((packets, duration, kind) in trace_strategy()) {
            let profile = Profile::default_for([ProfileType::ThreeG, ProfileType::Lte, ProfileType::Wifi][kind]);
            let combined = create(&packets, &profile, duration, duration, 1000.0, None);
            let ranges = state_range::create(&packets, &profile, duration);
            let split = from_ranges(ranges, &packets, &profile, duration, duration, 1000.0);
            prop_assert_eq!(combined, split);
        }
    }
}
