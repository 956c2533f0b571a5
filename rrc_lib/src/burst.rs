/** ------------------------------------------------------------
 * Burst segmentation, classification and energy attribution
 * ------------------------------------------------------------- */
use crate::packet::{CpuActivity, Direction, Packet, Session, TcpInfo, UserEvent};
use crate::periodic::{periodic_remote_ips, PeriodSettings};
use crate::profile::Profile;
use crate::rrc_state::{RrcState, RrcStateRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use tracing::debug;

/// Slack when matching packet times against promotion boundaries
const EPS: f64 = 1e-6;
/// How far back (s) user events and CPU samples are considered
const USER_EVENT_TOLERANCE: f64 = 4.0;
/// Average CPU usage (%) above which a burst is CPU driven
const AVG_CPU_USAGE_THRESHOLD: f64 = 70.0;
/// Used when the trace shows no dominant large packet size
const DEFAULT_MSS: u32 = 1460;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BurstCategory {
    Cpu,
    TcpProtocol,
    TcpLossOrDup,
    UserInput,
    ScreenRotation,
    ClientApp,
    ServerNetDelay,
    Long,
    Periodical,
    Unknown,
}

impl BurstCategory {
    pub const ALL: [BurstCategory; 10] = [
        BurstCategory::Cpu,
        BurstCategory::TcpProtocol,
        BurstCategory::TcpLossOrDup,
        BurstCategory::UserInput,
        BurstCategory::ScreenRotation,
        BurstCategory::ClientApp,
        BurstCategory::ServerNetDelay,
        BurstCategory::Long,
        BurstCategory::Periodical,
        BurstCategory::Unknown,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            BurstCategory::Cpu => "CPU",
            BurstCategory::TcpProtocol => "TCP_PROTOCOL",
            BurstCategory::TcpLossOrDup => "TCP_LOSS_OR_DUP",
            BurstCategory::UserInput => "USER_INPUT",
            BurstCategory::ScreenRotation => "SCREEN_ROTATION",
            BurstCategory::ClientApp => "CLIENT_APP",
            BurstCategory::ServerNetDelay => "SERVER_NET_DELAY",
            BurstCategory::Long => "LONG",
            BurstCategory::Periodical => "PERIODICAL",
            BurstCategory::Unknown => "UNKNOWN",
        }
    }
}

/**
 * Group of packets with no inactivity gap above the burst threshold.
 *
 * Packets are referenced by index into the analysed packet slice.
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub packets                  : Vec<usize>,
    pub begin_time               : f64,
    pub end_time                 : f64,
    pub begin_packet             : usize,
    pub end_packet               : usize,
    pub first_uplink_data_packet : Option<usize>,
    pub long                     : bool,          // elapsed time above the long burst threshold
    pub energy                   : f64,           // J
    pub active_time              : f64,           // s in a high power state
    pub category                 : BurstCategory,
}

impl Burst {
    fn new(indices: Vec<usize>, packets: &[Packet]) -> Option<Self> {
        let begin_packet = *indices.first()?;
        let end_packet = *indices.last()?;
        Some(Self {
            begin_time: packets[begin_packet].timestamp,
            end_time: packets[end_packet].timestamp,
            begin_packet,
            end_packet,
            packets: indices,
            first_uplink_data_packet: None,
            long: false,
            energy: 0.0,
            active_time: 0.0,
            category: BurstCategory::Unknown,
        })
    }

    fn merge(&mut self, other: Burst) {
        if self.begin_time > other.begin_time {
            self.begin_time = other.begin_time;
            self.begin_packet = other.begin_packet;
        }
        if self.end_time < other.end_time {
            self.end_time = other.end_time;
            self.end_packet = other.end_packet;
        }
        self.packets.extend(other.packets);
    }

    pub fn elapsed_time(&self) -> f64 {
        self.end_time - self.begin_time
    }

    pub fn payload_bytes(&self, packets: &[Packet]) -> u64 {
        self.packets.iter().map(|&i| packets[i].payload_len as u64).sum()
    }

    pub fn throughput_kbps(&self, packets: &[Packet]) -> f64 {
        let kbits = self.payload_bytes(packets) as f64 * 8.0 / 1000.0;
        if self.elapsed_time() > 0.001 {
            kbits / self.elapsed_time()
        } else {
            kbits
        }
    }
}

/**
 * Totals for one burst category and its share of the whole trace
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstAnalysisInfo {
    pub category        : BurstCategory,
    pub payload         : u64,
    pub payload_pct     : f64,
    pub energy          : f64,
    pub energy_pct      : f64,
    pub active_time     : f64,
    pub active_time_pct : f64,
    pub jpkb            : Option<f64>, // None without payload
}

#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurstCollectionAnalysisData {
    pub bursts                 : Vec<Burst>,
    pub total_energy           : f64,
    pub long_burst_count       : usize,
    pub shortest_period_packet : Option<usize>,
    pub category_info          : Vec<BurstAnalysisInfo>,
    pub close_spaced_bursts    : Vec<(usize, usize)>,
}

/**
 * Segment `packets` into bursts, classify them and attribute the radio
 * energy of `ranges` to each burst.
 *
 * `size_counts` maps payload length to packet count and drives MSS
 * detection. User events and CPU samples must be sorted by time.
 */
pub fn analyze(
    packets: &[Packet],
    profile: &Profile,
    size_counts: &BTreeMap<u32, u64>,
    ranges: &[RrcStateRange],
    user_events: &[UserEvent],
    cpu_activity: &[CpuActivity],
    sessions: &[Session],
) -> BurstCollectionAnalysisData {
    let mss = mss_sizes(size_counts);
    let mut bursts = group_into_bursts(packets, profile, &mss, ranges);
    if bursts.is_empty() {
        return BurstCollectionAnalysisData::default();
    }

    let settings = PeriodSettings {
        min_cycle: profile.common.period_min_cycle,
        cycle_tolerance: profile.common.period_cycle_tol,
        min_samples: profile.common.period_min_samples,
    };
    let periodic_ips = periodic_remote_ips(sessions, &settings);

    let mut classifier = Classifier {
        packets,
        profile,
        user_events,
        cpu_activity,
        periodic_ips: &periodic_ips,
        user_pointer: 0,
        cpu_pointer: 0,
    };
    let mut previous_end = None;
    for burst in bursts.iter_mut() {
        burst.first_uplink_data_packet = burst
            .packets
            .iter()
            .copied()
            .find(|&i| packets[i].direction == Direction::Uplink && packets[i].payload_len > 0);
        burst.category = classifier.classify(burst, previous_end);
        previous_end = Some(burst.end_time);
    }

    let long_burst_count = bursts.iter().filter(|b| b.long).count();
    let total_energy = attribute_energy(&mut bursts, ranges, profile, packets);
    let category_info = category_summary(&bursts, packets);
    let shortest_period_packet = shortest_period_packet(&bursts);
    let close_spaced_bursts = close_spaced_pairs(&bursts, profile.common.close_spaced_burst_threshold);

    debug!(
        bursts = bursts.len(),
        long = long_burst_count,
        categories = category_info.len(),
        energy = total_energy,
        "analyzed bursts"
    );

    BurstCollectionAnalysisData {
        bursts,
        total_energy,
        long_burst_count,
        shortest_period_packet,
        category_info,
        close_spaced_bursts,
    }
}

/**
 * Payload sizes treated as full segments: sizes above 1000 bytes seen
 * more than once and making up over 30% of such packets.
 */
pub fn mss_sizes(size_counts: &BTreeMap<u32, u64>) -> HashSet<u32> {
    let large = || size_counts.iter().filter(|(&size, &count)| size > 1000 && count > 1);
    let total: u64 = large().map(|(_, &count)| count).sum();
    if total == 0 {
        return HashSet::from([DEFAULT_MSS]);
    }
    large()
        .filter(|(_, &count)| count as f64 / total as f64 > 0.3)
        .map(|(&size, _)| size)
        .collect()
}

/**
 * Packet timestamps with the time spent in DCH promotions removed
 */
fn normalized_timestamps(packets: &[Packet], ranges: &[RrcStateRange]) -> Vec<f64> {
    let mut promotions: Vec<&RrcStateRange> = ranges.iter().filter(|r| r.state.is_3g_promotion()).collect();
    promotions.sort_by(|a, b| a.begin_time.total_cmp(&b.begin_time));

    let mut shift = 0.0;
    let mut next = 0;
    // timestamp of the last packet seen inside the promotion at `next`
    let mut inside: Option<f64> = None;
    let mut result = Vec::with_capacity(packets.len());

    for packet in packets {
        let ts = packet.timestamp;
        while let Some(promo) = promotions.get(next) {
            if ts < promo.end_time - EPS {
                break;
            }
            shift += match inside.take() {
                Some(middle) => promo.end_time - middle,
                None => promo.end_time - promo.begin_time,
            };
            next += 1;
        }
        if let Some(promo) = promotions.get(next) {
            if promo.begin_time - EPS < ts && ts < promo.end_time + EPS {
                shift += ts - inside.unwrap_or(promo.begin_time);
                inside = Some(ts);
            }
        }
        result.push(ts - shift);
    }
    result
}

/**
 * Split on gaps above the burst threshold, then merge neighbours whose
 * gap drops below it once promotion delays are removed.
 */
fn group_into_bursts(packets: &[Packet], profile: &Profile, mss: &HashSet<u32>, ranges: &[RrcStateRange]) -> Vec<Burst> {
    let burst_th = profile.common.burst_th;
    let mut raw = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        if let Some(&last) = current.last() {
            let prev = &packets[last];
            if packet.timestamp - prev.timestamp > burst_th && !mss.contains(&prev.payload_len) {
                raw.extend(Burst::new(std::mem::take(&mut current), packets));
            }
        }
        current.push(i);
    }
    raw.extend(Burst::new(current, packets));

    let normalized = normalized_timestamps(packets, ranges);
    let raw_count = raw.len();
    let mut merged: Vec<Burst> = Vec::with_capacity(raw_count);
    for burst in raw {
        match merged.last_mut() {
            Some(last) if normalized[burst.begin_packet] - normalized[last.end_packet] < burst_th => last.merge(burst),
            _ => merged.push(burst),
        }
    }

    for burst in merged.iter_mut() {
        burst.long = burst.elapsed_time() > profile.common.long_burst_th;
    }
    debug!(raw = raw_count, merged = merged.len(), "grouped packets into bursts");
    merged
}

/**
 * Classification state carried from one burst to the next
 */
struct Classifier<'a> {
    packets: &'a [Packet],
    profile: &'a Profile,
    user_events: &'a [UserEvent],
    cpu_activity: &'a [CpuActivity],
    periodic_ips: &'a HashSet<IpAddr>,
    user_pointer: usize,
    cpu_pointer: usize,
}

impl<'a> Classifier<'a> {
    /**
     * First matching rule wins
     */
    fn classify(&mut self, burst: &Burst, previous_end: Option<f64>) -> BurstCategory {
        let packets = self.packets;
        let profile = self.profile;
        let common = &profile.common;
        let payload = burst.payload_bytes(packets);
        let infos: Vec<TcpInfo> = burst.packets.iter().filter_map(|&i| packets[i].tcp_info).collect();

        if payload == 0 && !infos.is_empty() && infos.iter().all(|info| info.is_control()) {
            return BurstCategory::TcpProtocol;
        }
        if infos.iter().any(|info| info.is_loss_or_dup()) {
            return BurstCategory::TcpLossOrDup;
        }
        if payload > 0 {
            if let Some(category) = self.user_triggered(burst, previous_end) {
                return category;
            }
        }
        if burst.elapsed_time() > common.large_burst_duration && payload > common.large_burst_size {
            return BurstCategory::Long;
        }
        if packets[burst.begin_packet]
            .remote_ip
            .is_some_and(|ip| self.periodic_ips.contains(&ip))
        {
            return BurstCategory::Periodical;
        }

        let trigger = burst.first_uplink_data_packet.unwrap_or(burst.begin_packet);
        let trigger_ts = packets[trigger].timestamp;
        if self
            .average_cpu(trigger_ts - USER_EVENT_TOLERANCE, trigger_ts)
            .is_some_and(|avg| avg > AVG_CPU_USAGE_THRESHOLD)
        {
            return BurstCategory::Cpu;
        }

        let first = &packets[burst.begin_packet];
        if first.direction == Direction::Downlink && matches!(first.tcp_info, Some(TcpInfo::Data | TcpInfo::Ack)) {
            return BurstCategory::ServerNetDelay;
        }
        if payload > 0 {
            BurstCategory::ClientApp
        } else {
            BurstCategory::Unknown
        }
    }

    /**
     * User input (or rotation) shortly before the burst's first packet.
     * Falls back to CPU when the gap is larger than the user input
     * threshold and the CPU was busy in between.
     */
    fn user_triggered(&mut self, burst: &Burst, previous_end: Option<f64>) -> Option<BurstCategory> {
        let events = self.user_events;
        let time0 = self.packets[burst.begin_packet].timestamp;

        while events
            .get(self.user_pointer)
            .is_some_and(|e| e.release_time < time0 - USER_EVENT_TOLERANCE)
        {
            self.user_pointer += 1;
        }
        let category = match events.get(self.user_pointer) {
            Some(e) if e.event_type.is_rotation() => BurstCategory::ScreenRotation,
            Some(_) => BurstCategory::UserInput,
            None => return None,
        };

        let within = |t: f64| t < time0 && t > time0 - USER_EVENT_TOLERANCE;
        let mut min_gap = f64::MAX;
        for event in &events[self.user_pointer..] {
            for t in [event.press_time, event.release_time] {
                if within(t) {
                    min_gap = min_gap.min(time0 - t);
                }
            }
            if event.press_time > time0 {
                break;
            }
        }

        if min_gap < self.profile.common.user_input_th {
            return Some(category);
        }
        let clear_of_previous = previous_end.map_or(true, |end| end < burst.begin_time - min_gap);
        if min_gap < USER_EVENT_TOLERANCE && clear_of_previous {
            while self
                .cpu_activity
                .get(self.cpu_pointer)
                .is_some_and(|c| c.timestamp < burst.begin_time - USER_EVENT_TOLERANCE)
            {
                self.cpu_pointer += 1;
            }
            let busy = self
                .average_cpu_from(self.cpu_pointer, time0 - min_gap, time0)
                .is_some_and(|avg| avg > AVG_CPU_USAGE_THRESHOLD);
            return Some(if busy { BurstCategory::Cpu } else { category });
        }
        None
    }

    fn average_cpu(&self, begin: f64, end: f64) -> Option<f64> {
        let start = self.cpu_activity.partition_point(|c| c.timestamp <= begin);
        self.average_cpu_from(start, begin, end)
    }

    /**
     * Mean usage of the samples strictly inside `(begin, end)`
     */
    fn average_cpu_from(&self, start: usize, begin: f64, end: f64) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0;
        for sample in self.cpu_activity.iter().skip(start) {
            if sample.timestamp >= end {
                break;
            }
            if sample.timestamp > begin {
                total += sample.total_cpu_usage;
                count += 1;
            }
        }
        (count > 0).then(|| total / count as f64)
    }
}

/**
 * Energy and high-power time of the radio from each burst's start up
 * to the next burst's start (the last one runs to the end of the
 * ranges). Returns the total.
 */
fn attribute_energy(bursts: &mut [Burst], ranges: &[RrcStateRange], profile: &Profile, packets: &[Packet]) -> f64 {
    let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
        return 0.0;
    };
    let trace_end = last.end_time;
    let next_begins: Vec<f64> = bursts
        .iter()
        .skip(1)
        .map(|b| b.begin_time)
        .chain(std::iter::once(trace_end))
        .collect();

    let mut total = 0.0;
    let mut time1 = first.begin_time;
    let mut p = 0;
    for (burst, &time2) in bursts.iter_mut().zip(&next_begins) {
        let mut energy = 0.0;
        let mut active = 0.0;
        let mut add = |begin: f64, end: f64, state: RrcState| {
            energy += profile.energy(begin, end, state, packets);
            if state.is_active() {
                active += end - begin;
            }
        };

        // first range still open at time1
        while let Some(r) = ranges.get(p) {
            if r.end_time < time1 {
                p += 1;
                continue;
            }
            if time2 > r.end_time {
                add(time1, r.end_time, r.state);
                p += 1;
            }
            break;
        }
        while let Some(r) = ranges.get(p) {
            let begin = r.begin_time.max(time1);
            if r.end_time < time2 {
                add(begin, r.end_time, r.state);
                p += 1;
            } else {
                add(begin, time2, r.state);
                break;
            }
        }

        burst.energy = energy;
        burst.active_time = active;
        total += energy;
        time1 = time2;
    }
    total
}

fn category_summary(bursts: &[Burst], packets: &[Packet]) -> Vec<BurstAnalysisInfo> {
    let mut per_category: BTreeMap<BurstCategory, (u64, f64, f64)> = BTreeMap::new();
    let (mut total_payload, mut total_energy, mut total_active) = (0u64, 0.0, 0.0);

    for burst in bursts {
        // background traffic without an owning app is not counted
        let payload: u64 = burst
            .packets
            .iter()
            .map(|&i| &packets[i])
            .filter(|p| p.app_name.is_some())
            .map(|p| p.payload_len as u64)
            .sum();
        let entry = per_category.entry(burst.category).or_default();
        entry.0 += payload;
        entry.1 += burst.energy;
        entry.2 += burst.active_time;
        total_payload += payload;
        total_energy += burst.energy;
        total_active += burst.active_time;
    }

    let pct = |part: f64, total: f64| if total > 0.0 { part / total * 100.0 } else { 0.0 };
    per_category
        .into_iter()
        .map(|(category, (payload, energy, active_time))| BurstAnalysisInfo {
            category,
            payload,
            payload_pct: pct(payload as f64, total_payload as f64),
            energy,
            energy_pct: pct(energy, total_energy),
            active_time,
            active_time_pct: pct(active_time, total_active),
            jpkb: (payload > 0).then(|| energy / (payload as f64 * 8.0 / 1000.0)),
        })
        .collect()
}

/**
 * Trigger packet of the periodical burst that follows its predecessor
 * most closely.
 */
fn shortest_period_packet(bursts: &[Burst]) -> Option<usize> {
    let mut previous: Option<&Burst> = None;
    let mut min_repeat = f64::MAX;
    let mut packet = None;
    for burst in bursts.iter().filter(|b| b.category == BurstCategory::Periodical) {
        if let Some(prev) = previous {
            let repeat = burst.begin_time - prev.begin_time;
            if repeat < min_repeat {
                min_repeat = repeat;
                packet = Some(burst.first_uplink_data_packet.unwrap_or(burst.begin_packet));
            }
        }
        previous = Some(burst);
    }
    packet
}

fn close_spaced_pairs(bursts: &[Burst], threshold: f64) -> Vec<(usize, usize)> {
    bursts
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1].begin_time - pair[0].begin_time < threshold)
        .map(|(i, _)| (i, i + 1))
        .collect()
}
