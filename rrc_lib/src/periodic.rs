/** ------------------------------------------------------------
 * Periodic request detection by self-correlation of event times
 * ------------------------------------------------------------- */
use crate::packet::Session;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::debug;

/**
 * Thresholds for calling a series of events periodic
 */
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PeriodSettings {
    /// minimum average cycle length (s)
    pub min_cycle: f64,
    /// width of an inter-arrival cluster (s)
    pub cycle_tolerance: f64,
    /// minimum chain length
    pub min_samples: u32,
}

/**
 * Detected recurrence: average cycle and the number of intervals in the
 * longest chain.
 */
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PeriodicChain {
    pub cycle: f64,
    pub intervals: usize,
}

/// Inter-arrival time between two events
#[derive(Debug, Copy, Clone)]
struct Iat {
    iat: f64,
    begin_time: f64,
    begin_event: usize,
    end_event: usize,
}

fn average(cluster: &[Iat]) -> f64 {
    if cluster.is_empty() {
        return 0.0;
    }
    cluster.iter().map(|c| c.iat).sum::<f64>() / cluster.len() as f64
}

/**
 * Longest chain of intervals where each one starts at the event the
 * previous one ended at. Returns the chain in time order.
 */
fn longest_chain(cluster: &[Iat]) -> Vec<Iat> {
    let mut sorted = cluster.to_vec();
    sorted.sort_by(|a, b| a.begin_time.total_cmp(&b.begin_time));

    let mut best_len = 0;
    let mut best_end = None;
    let mut length = Vec::with_capacity(sorted.len());
    let mut back: Vec<Option<usize>> = Vec::with_capacity(sorted.len());
    for (i, current) in sorted.iter().enumerate() {
        let mut len = 1;
        let mut prev = None;
        for j in 0..i {
            if sorted[j].end_event == current.begin_event && length[j] + 1 > len {
                len = length[j] + 1;
                prev = Some(j);
            }
        }
        if len > best_len {
            best_len = len;
            best_end = Some(i);
        }
        length.push(len);
        back.push(prev);
    }

    let mut chain = Vec::with_capacity(best_len);
    let mut cursor = best_end;
    while let Some(i) = cursor {
        chain.push(sorted[i]);
        cursor = back[i];
    }
    chain.reverse();
    chain
}

/**
 * Decide whether the sorted event `times` recur with a stable period.
 *
 * Every pairwise inter-arrival time is clustered within the cycle
 * tolerance. The cluster with the longest non-overlapping chain among
 * those whose average exceeds the minimum cycle wins; it must hold at
 * least `min_samples` intervals.
 */
pub fn self_correlation(times: &[f64], settings: &PeriodSettings) -> Option<PeriodicChain> {
    let n = times.len();
    if n <= 3 {
        return None;
    }

    let mut iats = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n - 1 {
        for j in i + 1..n {
            iats.push(Iat {
                iat: times[j] - times[i],
                begin_time: times[i],
                begin_event: i,
                end_event: j,
            });
        }
    }
    iats.sort_by(|a, b| a.iat.total_cmp(&b.iat));

    let mut best_cluster: &[Iat] = &[];
    let mut best_size = 0;
    for i in 0..iats.len() {
        let end = iats[i..]
            .iter()
            .position(|c| c.iat - iats[i].iat >= settings.cycle_tolerance)
            .map_or(iats.len(), |p| i + p);
        let cluster = &iats[i..end];
        let size = longest_chain(cluster).len();
        if average(cluster) > settings.min_cycle && size > best_size {
            best_cluster = cluster;
            best_size = size;
        }
    }

    let chain = longest_chain(best_cluster);
    if chain.len() < settings.min_samples as usize {
        return None;
    }
    let cycle = average(best_cluster);
    if cycle <= 0.0 {
        return None;
    }

    Some(PeriodicChain {
        cycle,
        intervals: chain.len(),
    })
}

/**
 * Remote addresses whose sessions open at a regular cadence
 */
pub fn periodic_remote_ips(sessions: &[Session], settings: &PeriodSettings) -> HashSet<IpAddr> {
    let mut starts: HashMap<IpAddr, Vec<f64>> = HashMap::new();
    for session in sessions {
        starts.entry(session.remote_ip).or_default().push(session.begin_time);
    }

    starts
        .into_iter()
        .filter_map(|(ip, mut times)| {
            times.sort_by(f64::total_cmp);
            let chain = self_correlation(&times, settings)?;
            debug!(%ip, cycle = chain.cycle, intervals = chain.intervals, "periodic remote");
            Some(ip)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Protocol;
    use approx::assert_relative_eq;
    use std::net::Ipv4Addr;

    fn settings() -> PeriodSettings {
        PeriodSettings {
            min_cycle: 10.0,
            cycle_tolerance: 1.0,
            min_samples: 3,
        }
    }

    fn session(ip: [u8; 4], begin: f64) -> Session {
        Session {
            remote_ip: IpAddr::V4(Ipv4Addr::from(ip)),
            remote_port: 443,
            local_port: 50000,
            protocol: Protocol::Tcp,
            begin_time: begin,
            end_time: begin + 1.0,
            bytes_transferred: 0,
            packet_count: 1,
        }
    }

    #[test]
    fn regular_events_are_periodic() {
        let times = [0.0, 30.0, 60.2, 89.9, 120.0];
        let chain = self_correlation(&times, &settings()).unwrap();
        assert_eq!(chain.intervals, 4);
        assert_relative_eq!(chain.cycle, 30.0, epsilon = 0.5);
    }

    #[test]
    fn too_few_events() {
        assert!(self_correlation(&[0.0, 30.0, 60.0], &settings()).is_none());
    }

    #[test]
    fn short_cycles_are_ignored() {
        let times = [0.0, 2.0, 4.0, 6.0, 8.0, 10.0];
        assert!(self_correlation(&times, &settings()).is_none());
    }

    #[test]
    fn irregular_events_are_not_periodic() {
        let times = [0.0, 13.0, 41.0, 97.0, 211.0];
        assert!(self_correlation(&times, &settings()).is_none());
    }

    #[test]
    fn groups_sessions_by_remote_ip() {
        let mut sessions: Vec<Session> = (0..5).map(|i| session([10, 0, 0, 1], i as f64 * 60.0)).collect();
        sessions.push(session([10, 0, 0, 2], 5.0));
        sessions.push(session([10, 0, 0, 2], 17.0));
        let ips = periodic_remote_ips(&sessions, &settings());
        assert_eq!(ips.len(), 1);
        assert!(ips.contains(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }
}
