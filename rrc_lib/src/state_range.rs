/** ------------------------------------------------------------
 * RRC state range reconstruction.
 *
 * Walks the packet list once and emits the ordered list of state
 * intervals the radio went through, for the network type of the
 * given profile.
 * ------------------------------------------------------------- */
use crate::packet::{Direction, Packet};
use crate::profile::{Profile, Profile3G, ProfileKind, ProfileLte, ProfileWifi};
use crate::queues::{DchDemotionQueue, FachQueue};
use crate::rrc_state::{RrcState, RrcStateRange};
use tracing::{debug, trace};

/// Duration/limit used where a range should run until the next event.
const UNBOUNDED: f64 = f64::MAX;

/// Slack when comparing against the DCH tail.
const DCH_TAIL_EPS: f64 = 1e-5;

/**
 * Reconstructed ranges together with the state each packet was
 * observed in (same order and length as the input packets).
 */
#[derive(Debug, Clone, PartialEq)]
pub struct StateRangeOutput {
    pub ranges: Vec<RrcStateRange>,
    pub packet_states: Vec<RrcState>,
}

/**
 * Build the RRC state ranges covering `[0, trace_duration]`.
 *
 * Packets must be sorted by timestamp. An empty packet list yields a
 * single idle range for the whole trace.
 */
pub fn create(packets: &[Packet], profile: &Profile, trace_duration: f64) -> Vec<RrcStateRange> {
    create_with_states(packets, profile, trace_duration).ranges
}

/**
 * Like [`create`], additionally reporting the state of every packet
 */
pub fn create_with_states(packets: &[Packet], profile: &Profile, trace_duration: f64) -> StateRangeOutput {
    let (mut output, idle) = match &profile.kind {
        ProfileKind::ThreeG(p) => (create_3g(packets, p), RrcState::Idle),
        ProfileKind::Lte(p) => (create_lte(packets, p, trace_duration), RrcState::LteIdle),
        ProfileKind::Wifi(p) => (create_wifi(packets, p, trace_duration), RrcState::WifiIdle),
    };
    output.ranges = truncate_to_trace(output.ranges, trace_duration, idle);

    debug!(
        packets = packets.len(),
        ranges = output.ranges.len(),
        profile = profile.profile_type().as_str(),
        "reconstructed rrc state ranges"
    );
    output
}

/**
 * Append-only range list with the clamping rules used by every walk
 */
#[derive(Debug, Default)]
struct RangeBuilder {
    ranges: Vec<RrcStateRange>,
}

impl RangeBuilder {
    fn push(&mut self, begin: f64, end: f64, state: RrcState) {
        self.ranges.push(RrcStateRange::new(begin, end, state));
    }

    /**
     * Add `state` from `time` for `duration`, cut at `t_max`.
     * Returns the end of the added range, or `time` if nothing fit.
     */
    fn add(&mut self, time: f64, duration: f64, state: RrcState, t_max: f64) -> f64 {
        if time >= t_max || duration <= 0.0 {
            return time;
        }
        let duration = if time + duration > t_max { t_max - time } else { duration };
        let end = time + duration;
        self.push(time, end, state);
        end
    }

    /**
     * Relabel the trailing `duration` seconds (whole ranges) as `state`
     */
    fn relabel_back(&mut self, duration: f64, state: RrcState) {
        let mut remaining = duration;
        if remaining < DCH_TAIL_EPS {
            return;
        }
        for range in self.ranges.iter_mut().rev() {
            range.state = state;
            remaining -= range.duration();
            if remaining <= DCH_TAIL_EPS {
                break;
            }
        }
    }
}

/**
 * Sort by begin time and merge neighbours sharing a state
 */
fn compress(mut ranges: Vec<RrcStateRange>) -> Vec<RrcStateRange> {
    ranges.sort_by(|a, b| a.begin_time.total_cmp(&b.begin_time));
    let mut merged: Vec<RrcStateRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if last.state == range.state => last.end_time = range.end_time,
            _ => merged.push(range),
        }
    }
    merged
}

/**
 * Drop what starts after the trace, clip what crosses its end and
 * fill any remaining gap with `idle`.
 */
fn truncate_to_trace(ranges: Vec<RrcStateRange>, trace_duration: f64, idle: RrcState) -> Vec<RrcStateRange> {
    let last_end = ranges.last().map_or(0.0, |r| r.end_time.min(trace_duration));
    let mut result: Vec<RrcStateRange> = ranges
        .into_iter()
        .filter(|r| r.begin_time < trace_duration)
        .map(|mut r| {
            r.end_time = r.end_time.min(trace_duration);
            r
        })
        .collect();

    if result.is_empty() {
        result.push(RrcStateRange::new(0.0, trace_duration, idle));
    } else if last_end < trace_duration {
        result.push(RrcStateRange::new(last_end, trace_duration, idle));
    }
    result
}

/* ---------------------------------- LTE ---------------------------------- */

/**
 * Idle until the promotion that completes at `end`, then the promotion
 */
fn promote_lte(ranges: &mut RangeBuilder, start: f64, end: f64, p: &ProfileLte) -> f64 {
    let promo_start = start.max(end - p.promotion_time);
    if promo_start > start {
        ranges.push(start, promo_start, RrcState::LteIdle);
    }
    ranges.push(promo_start, end, RrcState::LtePromotion);
    end
}

/**
 * Continuous reception up to `start`, then the CR tail and the short and
 * long DRX cycles, each cut short at `end`.
 */
fn tail_lte(ranges: &mut RangeBuilder, timer: f64, start: f64, end: f64, p: &ProfileLte) -> f64 {
    ranges.push(timer, start, RrcState::LteContinuous);

    let mut start = start;
    let mut tail = start;
    for (length, state) in [
        (p.inactivity_timer, RrcState::LteCrTail),
        (p.drx_short_time, RrcState::LteDrxShort),
        (p.drx_long_time, RrcState::LteDrxLong),
    ] {
        tail = (start + length).min(end);
        if tail > start {
            ranges.push(start, tail, state);
            start = tail;
        }
    }
    tail
}

fn create_lte(packets: &[Packet], p: &ProfileLte, trace_duration: f64) -> StateRangeOutput {
    let mut ranges = RangeBuilder::default();
    let Some(first) = packets.first() else {
        ranges.push(0.0, trace_duration, RrcState::LteIdle);
        return StateRangeOutput {
            ranges: ranges.ranges,
            packet_states: Vec::new(),
        };
    };

    let mut last = first.timestamp;
    let mut timer = promote_lte(&mut ranges, 0.0, last, p);
    for packet in &packets[1..] {
        let curr = packet.timestamp;
        if curr - last > p.inactivity_timer {
            timer = tail_lte(&mut ranges, timer, last, curr, p);
            if timer < curr {
                timer = promote_lte(&mut ranges, timer, curr, p);
            }
        }
        last = curr;
    }

    timer = tail_lte(&mut ranges, timer, last, trace_duration, p);
    if timer < trace_duration {
        ranges.push(timer, trace_duration, RrcState::LteIdle);
    }

    StateRangeOutput {
        ranges: ranges.ranges,
        packet_states: vec![RrcState::LteContinuous; packets.len()],
    }
}

/* ---------------------------------- WiFi --------------------------------- */

fn tail_wifi(ranges: &mut RangeBuilder, timer: f64, start: f64, end: f64, p: &ProfileWifi) -> f64 {
    ranges.push(timer, start, RrcState::WifiActive);
    let tail = (start + p.tail_time).min(end);
    if tail > start {
        ranges.push(start, tail, RrcState::WifiTail);
    }
    tail
}

fn create_wifi(packets: &[Packet], p: &ProfileWifi, trace_duration: f64) -> StateRangeOutput {
    let mut ranges = RangeBuilder::default();
    let Some(first) = packets.first() else {
        ranges.push(0.0, trace_duration, RrcState::WifiIdle);
        return StateRangeOutput {
            ranges: ranges.ranges,
            packet_states: Vec::new(),
        };
    };

    let mut last = first.timestamp;
    ranges.push(0.0, last, RrcState::WifiIdle);
    let mut timer = last;
    for packet in &packets[1..] {
        let curr = packet.timestamp;
        if curr - last > p.tail_time {
            timer = tail_wifi(&mut ranges, timer, last, curr, p);
            if timer < curr {
                ranges.push(timer, curr, RrcState::WifiIdle);
                timer = curr;
            }
        }
        last = curr;
    }

    timer = tail_wifi(&mut ranges, timer, last, trace_duration, p);
    if timer < trace_duration {
        ranges.push(timer, trace_duration, RrcState::WifiIdle);
    }

    StateRangeOutput {
        ranges: ranges.ranges,
        packet_states: vec![RrcState::WifiActive; packets.len()],
    }
}

/* ----------------------------------- 3G ---------------------------------- */

/**
 * The packet being placed, relative to its predecessor
 */
struct Step {
    index: usize,
    prev_ts: f64,
    curr_ts: f64,
    dir: Direction,
    len: u32,
}

impl Step {
    fn delta(&self) -> f64 {
        self.curr_ts - self.prev_ts
    }
}

/**
 * Mutable state of one 3G reconstruction pass
 */
struct Walk3G<'a> {
    p: &'a Profile3G,
    ranges: RangeBuilder,
    fach: FachQueue<'a>,
    dch: DchDemotionQueue<'a>,
    /// time already spent in the current promotion
    timer: f64,
}

fn create_3g(packets: &[Packet], p: &Profile3G) -> StateRangeOutput {
    let Some(first) = packets.first() else {
        // the caller fills the whole trace with idle
        return StateRangeOutput {
            ranges: Vec::new(),
            packet_states: Vec::new(),
        };
    };

    let mut walk = Walk3G {
        p,
        ranges: RangeBuilder::default(),
        fach: FachQueue::new(p),
        dch: DchDemotionQueue::new(p),
        timer: 0.0,
    };

    let mut states = Vec::with_capacity(packets.len());
    states.push(RrcState::PromoIdleDch);
    walk.ranges.add(0.0, UNBOUNDED, RrcState::Idle, first.timestamp);

    // one extra round with a virtual uplink packet at infinity closes the tail
    for i in 1..=packets.len() {
        let (curr_ts, dir, len) = match packets.get(i) {
            Some(packet) => (packet.timestamp, packet.direction, packet.len),
            None => (UNBOUNDED, Direction::Uplink, 0),
        };
        let step = Step {
            index: i,
            prev_ts: packets[i - 1].timestamp,
            curr_ts,
            dir,
            len,
        };

        let prev_state = states[i - 1];
        let next = match prev_state {
            RrcState::PromoIdleDch | RrcState::PromoFachDch => walk.from_promotion(prev_state, &step),
            RrcState::Dch => walk.from_dch(&step),
            RrcState::Fach => walk.from_fach(&step, packets, &states),
            other => other,
        };
        trace!(index = i, from = prev_state.name(), to = next.name(), "3g transition");

        if i < packets.len() {
            states.push(next);
        }
    }

    StateRangeOutput {
        ranges: compress(walk.ranges.ranges),
        packet_states: states,
    }
}

impl<'a> Walk3G<'a> {
    /**
     * Previous packet was still waiting for promotion to DCH
     */
    fn from_promotion(&mut self, promo: RrcState, s: &Step) -> RrcState {
        let p = self.p;
        let (avg, min, max) = if promo == RrcState::PromoIdleDch {
            (p.idle_dch_promo_avg, p.idle_dch_promo_min, p.idle_dch_promo_max)
        } else {
            (p.fach_dch_promo_avg, p.fach_dch_promo_min, p.fach_dch_promo_max)
        };
        let elapsed = self.timer + s.delta();
        let r = &mut self.ranges;
        let mut t = s.prev_ts;

        if elapsed <= min && s.dir != Direction::Unknown {
            // still promoting
            r.add(t, UNBOUNDED, promo, s.curr_ts);
            self.timer += s.delta();
            promo
        } else if elapsed <= max {
            // promotion completed at this packet
            r.add(t, UNBOUNDED, promo, s.curr_ts);
            self.dch.init(s.curr_ts, s.len, s.dir);
            RrcState::Dch
        } else if elapsed <= avg + p.dch_fach_timer {
            t = r.add(t, avg - self.timer, promo, s.curr_ts);
            r.add(t, UNBOUNDED, RrcState::Dch, s.curr_ts);
            self.dch.init(s.curr_ts, s.len, s.dir);
            RrcState::Dch
        } else if elapsed <= avg + p.dch_fach_timer + p.fach_idle_timer {
            // demoted to FACH before this packet
            self.fach.init();
            if s.dir == Direction::Downlink {
                if self.fach.sim_fach(s.curr_ts, s.dir, s.len) {
                    let t_max = s.curr_ts - p.fach_dch_promo_avg;
                    t = r.add(t, avg - self.timer, promo, t_max);
                    t = r.add(t, p.dch_fach_timer, RrcState::TailDch, t_max);
                    t = r.add(t, UNBOUNDED, RrcState::Fach, t_max);
                    r.add(t, UNBOUNDED, RrcState::PromoFachDch, s.curr_ts);
                    self.dch.init(s.curr_ts, s.len, s.dir);
                    RrcState::Dch
                } else {
                    t = r.add(t, avg - self.timer, promo, s.curr_ts);
                    t = r.add(t, p.dch_fach_timer, RrcState::TailDch, s.curr_ts);
                    r.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
                    RrcState::Fach
                }
            } else {
                t = r.add(t, avg - self.timer, promo, s.curr_ts);
                t = r.add(t, p.dch_fach_timer, RrcState::TailDch, s.curr_ts);
                r.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
                if self.fach.sim_fach(s.curr_ts, s.dir, s.len) {
                    self.timer = 0.0;
                    RrcState::PromoFachDch
                } else {
                    RrcState::Fach
                }
            }
        } else if s.dir == Direction::Uplink {
            // demoted all the way to idle
            t = r.add(t, avg - self.timer, promo, s.curr_ts);
            t = r.add(t, p.dch_fach_timer, RrcState::TailDch, s.curr_ts);
            t = r.add(t, p.fach_idle_timer, RrcState::TailFach, s.curr_ts);
            r.add(t, UNBOUNDED, RrcState::Idle, s.curr_ts);
            self.timer = 0.0;
            RrcState::PromoIdleDch
        } else {
            let t_max = s.curr_ts - p.idle_dch_promo_avg;
            t = r.add(t, avg - self.timer, promo, t_max);
            t = r.add(t, p.dch_fach_timer, RrcState::TailDch, t_max);
            t = r.add(t, p.fach_idle_timer, RrcState::TailFach, t_max);
            t = r.add(t, UNBOUNDED, RrcState::Idle, t_max);
            r.add(t, UNBOUNDED, RrcState::PromoIdleDch, s.curr_ts);
            self.dch.init(s.curr_ts, s.len, s.dir);
            RrcState::Dch
        }
    }

    /**
     * Previous packet was sent/received on DCH
     */
    fn from_dch(&mut self, s: &Step) -> RrcState {
        let p = self.p;
        let dch_tail = self.dch.dch_tail();
        let delta = s.delta();
        let r = &mut self.ranges;
        let mut t = s.prev_ts;

        if delta <= dch_tail + DCH_TAIL_EPS {
            r.add(t, UNBOUNDED, RrcState::Dch, s.curr_ts);
            self.dch.update(s.curr_ts, s.len, s.dir);
            return RrcState::Dch;
        }

        // the timer ran out: what followed the last reset was already tail
        r.relabel_back(p.dch_fach_timer - dch_tail, RrcState::TailDch);

        if delta <= dch_tail + p.fach_idle_timer {
            self.fach.init();
            if s.dir == Direction::Downlink {
                if self.fach.sim_fach(s.curr_ts, s.dir, s.len) {
                    let t_max = s.curr_ts - p.fach_dch_promo_avg;
                    t = r.add(t, dch_tail, RrcState::TailDch, t_max);
                    t = r.add(t, UNBOUNDED, RrcState::Fach, t_max);
                    r.add(t, UNBOUNDED, RrcState::PromoFachDch, s.curr_ts);
                    self.dch.init(s.curr_ts, s.len, s.dir);
                    RrcState::Dch
                } else {
                    t = r.add(t, dch_tail, RrcState::TailDch, s.curr_ts);
                    r.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
                    RrcState::Fach
                }
            } else {
                t = r.add(t, dch_tail, RrcState::TailDch, s.curr_ts);
                r.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
                if self.fach.sim_fach(s.curr_ts, s.dir, s.len) {
                    self.timer = 0.0;
                    RrcState::PromoFachDch
                } else {
                    RrcState::Fach
                }
            }
        } else if s.dir == Direction::Uplink {
            t = r.add(t, dch_tail, RrcState::TailDch, s.curr_ts);
            t = r.add(t, p.fach_idle_timer, RrcState::TailFach, s.curr_ts);
            r.add(t, UNBOUNDED, RrcState::Idle, s.curr_ts);
            self.timer = 0.0;
            RrcState::PromoIdleDch
        } else {
            let t_max = s.curr_ts - p.idle_dch_promo_avg;
            t = r.add(t, dch_tail, RrcState::TailDch, t_max);
            t = r.add(t, p.fach_idle_timer, RrcState::TailFach, t_max);
            t = r.add(t, UNBOUNDED, RrcState::Idle, t_max);
            r.add(t, UNBOUNDED, RrcState::PromoIdleDch, s.curr_ts);
            self.dch.init(s.curr_ts, s.len, s.dir);
            RrcState::Dch
        }
    }

    /**
     * Previous packet was sent/received on FACH
     */
    fn from_fach(&mut self, s: &Step, packets: &[Packet], states: &[RrcState]) -> RrcState {
        let p = self.p;
        let t = s.prev_ts;

        if s.delta() > p.fach_idle_timer {
            if s.dir == Direction::Uplink {
                let t = self.ranges.add(t, p.fach_idle_timer, RrcState::TailFach, s.curr_ts);
                self.ranges.add(t, UNBOUNDED, RrcState::Idle, s.curr_ts);
                self.timer = 0.0;
                return RrcState::PromoIdleDch;
            }
            let t_max = s.curr_ts - p.idle_dch_promo_avg;
            let t = self.ranges.add(t, p.fach_idle_timer, RrcState::TailFach, t_max);
            let t = self.ranges.add(t, UNBOUNDED, RrcState::Idle, t_max);
            self.ranges.add(t, UNBOUNDED, RrcState::PromoIdleDch, s.curr_ts);
            self.dch.init(s.curr_ts, s.len, s.dir);
            return RrcState::Dch;
        }

        if s.dir == Direction::Uplink {
            self.ranges.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
            return if self.fach.sim_fach(s.curr_ts, s.dir, s.len) {
                self.timer = 0.0;
                RrcState::PromoFachDch
            } else {
                RrcState::Fach
            };
        }

        if !self.fach.sim_fach(s.curr_ts, s.dir, s.len) {
            self.ranges.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
            return RrcState::Fach;
        }

        // downlink overflowed the FACH queue: the promotion must have
        // started before this packet arrived
        let avg_start = s.curr_ts - p.fach_dch_promo_avg;
        let min_start = s.curr_ts - p.fach_dch_promo_min;
        if avg_start > t || p.fach_dch_promo_avg < 1e-6 {
            let t = self.ranges.add(t, UNBOUNDED, RrcState::Fach, avg_start);
            self.ranges.add(t, UNBOUNDED, RrcState::PromoFachDch, s.curr_ts);
        } else if min_start > t {
            let t = self.ranges.add(t, UNBOUNDED, RrcState::Fach, min_start);
            self.ranges.add(t, UNBOUNDED, RrcState::PromoFachDch, s.curr_ts);
        } else if !self.promote_from_earlier_uplink(s, packets, states) {
            self.ranges.add(t, UNBOUNDED, RrcState::Fach, s.curr_ts);
            self.fach.init();
        }
        self.dch.init(s.curr_ts, s.len, s.dir);
        RrcState::Dch
    }

    /**
     * Look back over the run of FACH packets for an uplink packet early
     * enough to have triggered the promotion, and rewrite the ranges
     * from there as FACH->DCH promotion followed by DCH.
     */
    fn promote_from_earlier_uplink(&mut self, s: &Step, packets: &[Packet], states: &[RrcState]) -> bool {
        let p = self.p;
        for ii in (1..s.index).rev() {
            if states[ii] != RrcState::Fach {
                break;
            }
            let earlier = &packets[ii];
            let t0 = earlier.timestamp;
            if earlier.direction != Direction::Uplink || s.curr_ts < t0 + p.fach_dch_promo_min {
                continue;
            }

            let promo = if s.curr_ts >= t0 + p.fach_dch_promo_avg {
                p.fach_dch_promo_avg
            } else {
                p.fach_dch_promo_min
            };
            let ranges = &mut self.ranges.ranges;
            if let Some(pos) = (1..ranges.len()).rev().find(|&jj| ranges[jj].begin_time == t0) {
                ranges.truncate(pos);
                let dch_start = t0 + promo;
                self.ranges.push(t0, dch_start, RrcState::PromoFachDch);
                let t = if s.prev_ts > dch_start {
                    self.ranges.push(dch_start, s.prev_ts, RrcState::Dch);
                    s.prev_ts
                } else {
                    dch_start
                };
                self.ranges.add(t, UNBOUNDED, RrcState::Dch, s.curr_ts);
            }
            return true;
        }
        false
    }
}
