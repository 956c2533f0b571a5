/** ------------------------------------------------------------
 * Full analysis pipeline over one trace
 * ------------------------------------------------------------- */
use crate::burst::{self, BurstCollectionAnalysisData};
use crate::energy_model::{EnergyModel, PeripheralLogs};
use crate::packet::{CpuActivity, Packet, Protocol, Session, TimeRange, UserEvent};
use crate::profile::Profile;
use crate::rrc_state::RrcState;
use crate::state_machine::{self, RrcAggregate, RrcStateMachine};
use crate::state_range;
use crate::statistic::Statistic;
use crate::throughput::{calculate_throughput, Throughput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, info};

/**
 * Everything captured for one trace. Packets, sessions and telemetry
 * are sorted by time.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    pub packets: Vec<Packet>,
    pub sessions: Vec<Session>,
    pub user_events: Vec<UserEvent>,
    pub cpu_activity: Vec<CpuActivity>,
    pub peripherals: PeripheralLogs,
    pub trace_duration: f64,
}

/**
 * Packet selection applied before analysis
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFilter {
    pub time_range : Option<TimeRange>,
    pub ipv4       : bool,
    pub ipv6       : bool,
    pub udp        : bool,
    pub app_names  : Option<BTreeSet<String>>, // "" selects packets without an app
}

impl Default for AnalysisFilter {
    fn default() -> Self {
        Self {
            time_range: None,
            ipv4: true,
            ipv6: true,
            udp: true,
            app_names: None,
        }
    }
}

impl AnalysisFilter {
    fn accepts_ip(&self, ip: Option<IpAddr>, protocol: Protocol) -> bool {
        let ip_ok = match ip {
            Some(IpAddr::V4(_)) => self.ipv4,
            Some(IpAddr::V6(_)) => self.ipv6,
            None => true,
        };
        ip_ok && (self.udp || protocol != Protocol::Udp)
    }

    pub fn accepts(&self, packet: &Packet) -> bool {
        if let Some(range) = self.time_range {
            if !range.contains(packet.timestamp) {
                return false;
            }
        }
        if let Some(apps) = &self.app_names {
            if !apps.contains(packet.app_name.as_deref().unwrap_or("")) {
                return false;
            }
        }
        self.accepts_ip(packet.remote_ip, packet.protocol)
    }

    pub fn accepts_session(&self, session: &Session) -> bool {
        if let Some(range) = self.time_range {
            if !range.contains(session.begin_time) {
                return false;
            }
        }
        self.accepts_ip(Some(session.remote_ip), session.protocol)
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketAnalyzerResult {
    pub profile          : Profile,
    pub filter           : AnalysisFilter,
    pub trace_duration   : f64,
    pub packets          : Vec<Packet>,      // after filtering
    pub packet_states    : Vec<RrcState>,    // parallel to `packets`
    pub statistic        : Statistic,
    pub throughput       : Vec<Throughput>,
    pub state_machine    : RrcStateMachine,
    pub burst_collection : BurstCollectionAnalysisData,
    pub energy_model     : EnergyModel,
}

/**
 * Run statistics, RRC reconstruction, burst analysis and the energy
 * model over `trace`. Without a profile the default LTE one is used.
 */
pub fn analyze_trace(trace: &TraceData, profile: Option<&Profile>, filter: &AnalysisFilter) -> PacketAnalyzerResult {
    let profile = profile.cloned().unwrap_or_else(Profile::default_lte);

    let packets: Vec<Packet> = trace.packets.iter().filter(|p| filter.accepts(p)).cloned().collect();
    let sessions: Vec<Session> = trace
        .sessions
        .iter()
        .filter(|s| filter.accepts_session(s))
        .cloned()
        .collect();
    debug!(
        kept = packets.len(),
        dropped = trace.packets.len() - packets.len(),
        "filtered packets"
    );

    let statistic = Statistic::from_packets(&packets);
    let throughput = calculate_throughput(
        0.0,
        trace.trace_duration,
        profile.common.throughput_window,
        &packets,
    );

    let reconstructed = state_range::create_with_states(&packets, &profile, trace.trace_duration);
    let mut ranges = reconstructed.ranges;
    if let Some(window) = filter.time_range {
        ranges = state_machine::clip_to_time_range(&ranges, window);
    }
    let state_machine = state_machine::from_ranges(
        ranges,
        &packets,
        &profile,
        statistic.packets_duration,
        trace.trace_duration,
        statistic.total_bytes as f64,
    );

    let burst_collection = burst::analyze(
        &packets,
        &profile,
        &statistic.packet_size_counts,
        state_machine.ranges(),
        &trace.user_events,
        &trace.cpu_activity,
        &sessions,
    );

    let energy_model = EnergyModel::new(
        state_machine.total_rrc_energy(),
        &trace.peripherals,
        &profile.common,
        trace.trace_duration,
    );

    info!(
        profile = profile.profile_type().as_str(),
        packets = packets.len(),
        bursts = burst_collection.bursts.len(),
        rrc_energy = energy_model.total_rrc_energy,
        "trace analyzed"
    );

    PacketAnalyzerResult {
        profile,
        filter: filter.clone(),
        trace_duration: trace.trace_duration,
        packets,
        packet_states: reconstructed.packet_states,
        statistic,
        throughput,
        state_machine,
        burst_collection,
        energy_model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Direction;
    use approx::assert_relative_eq;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn trace() -> TraceData {
        let v4 = IpAddr::V4(Ipv4Addr::new(172, 16, 0, 9));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        TraceData {
            packets: vec![
                Packet::new(1.0, Direction::Uplink, 100, 60)
                    .with_protocol(Protocol::Tcp)
                    .with_remote(v4, 443, 50000)
                    .with_app_name("mail"),
                Packet::new(1.2, Direction::Downlink, 1440, 1400)
                    .with_protocol(Protocol::Tcp)
                    .with_remote(v4, 443, 50000)
                    .with_app_name("mail"),
                Packet::new(8.0, Direction::Uplink, 80, 52)
                    .with_protocol(Protocol::Udp)
                    .with_remote(v6, 53, 41000),
            ],
            trace_duration: 20.0,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_to_lte() {
        let result = analyze_trace(&trace(), None, &AnalysisFilter::default());
        assert!(matches!(result.state_machine, RrcStateMachine::Lte(_)));
        assert_eq!(result.packets.len(), 3);
        assert_eq!(result.packet_states, vec![RrcState::LteContinuous; 3]);
        assert_eq!(result.burst_collection.bursts.len(), 2);
        assert_relative_eq!(result.energy_model.total_rrc_energy, result.state_machine.total_rrc_energy());
        assert_relative_eq!(result.state_machine.trace_duration(), 20.0);
        assert_eq!(result.throughput.len(), 40);
    }

    #[test]
    fn filters_udp_and_ipv6() {
        let mut filter = AnalysisFilter {
            udp: false,
            ..Default::default()
        };
        assert_eq!(analyze_trace(&trace(), None, &filter).packets.len(), 2);

        filter.udp = true;
        filter.ipv6 = false;
        assert_eq!(analyze_trace(&trace(), None, &filter).packets.len(), 2);
    }

    #[test]
    fn filters_by_app_and_time() {
        let filter = AnalysisFilter {
            app_names: Some(BTreeSet::from([String::new()])),
            ..Default::default()
        };
        let result = analyze_trace(&trace(), None, &filter);
        assert_eq!(result.packets.len(), 1);
        assert!(result.packets[0].app_name.is_none());

        let filter = AnalysisFilter {
            time_range: Some(TimeRange::new(0.0, 5.0)),
            ..Default::default()
        };
        let result = analyze_trace(&trace(), Some(&Profile::default_wifi()), &filter);
        assert_eq!(result.packets.len(), 2);
        assert!(result
            .state_machine
            .ranges()
            .iter()
            .all(|r| r.begin_time >= 0.0 && r.end_time <= 5.0));
    }

    #[test]
    fn empty_trace_still_covers_duration() {
        let data = TraceData {
            trace_duration: 10.0,
            ..Default::default()
        };
        let result = analyze_trace(&data, Some(&Profile::default_3g()), &AnalysisFilter::default());
        assert_eq!(result.state_machine.ranges().len(), 1);
        assert!(result.burst_collection.bursts.is_empty());
        assert_eq!(result.state_machine.joules_per_kilobyte(), 0.0);
    }
}
