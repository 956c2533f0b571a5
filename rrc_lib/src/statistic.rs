/** ------------------------------------------------------------
 * Whole-trace packet statistics
 * ------------------------------------------------------------- */
use crate::packet::{Packet, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpPacketSummary {
    pub ip: Option<IpAddr>,
    pub packet_count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationPacketSummary {
    /// None groups packets without an owning application
    pub app_name: Option<String>,
    pub packet_count: usize,
    pub total_bytes: u64,
}

#[rustfmt::skip]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistic {
    pub total_packets      : usize,
    pub total_bytes        : u64,
    pub total_https_bytes  : u64,
    pub packets_duration   : f64,             // s, last - first timestamp
    pub average_kbps       : f64,
    pub packet_size_counts : BTreeMap<u32, u64>, // payload length -> count
    pub ip_summaries       : Vec<IpPacketSummary>,
    pub app_summaries      : Vec<ApplicationPacketSummary>,
}

/// TCP is counted on the wire, everything else by payload
fn counted_bytes(packet: &Packet) -> u64 {
    match packet.protocol {
        Protocol::Tcp => packet.len as u64,
        _ => packet.payload_len as u64,
    }
}

impl Statistic {
    pub fn from_packets(packets: &[Packet]) -> Self {
        let mut stat = Statistic {
            total_packets: packets.len(),
            ..Default::default()
        };
        let mut per_ip: BTreeMap<Option<IpAddr>, IpPacketSummary> = BTreeMap::new();
        let mut per_app: BTreeMap<Option<String>, ApplicationPacketSummary> = BTreeMap::new();

        for packet in packets {
            let bytes = counted_bytes(packet);
            stat.total_bytes += bytes;
            if packet.is_https() {
                stat.total_https_bytes += bytes;
            }
            *stat.packet_size_counts.entry(packet.payload_len).or_default() += 1;

            let ip = per_ip.entry(packet.remote_ip).or_insert_with(|| IpPacketSummary {
                ip: packet.remote_ip,
                ..Default::default()
            });
            ip.packet_count += 1;
            ip.total_bytes += bytes;

            let app = per_app
                .entry(packet.app_name.clone())
                .or_insert_with(|| ApplicationPacketSummary {
                    app_name: packet.app_name.clone(),
                    ..Default::default()
                });
            app.packet_count += 1;
            app.total_bytes += bytes;
        }

        if let (Some(first), Some(last)) = (packets.first(), packets.last()) {
            stat.packets_duration = last.timestamp - first.timestamp;
        }
        if stat.packets_duration > 0.0 {
            stat.average_kbps = stat.total_bytes as f64 * 8.0 / 1000.0 / stat.packets_duration;
        }
        stat.ip_summaries = per_ip.into_values().collect();
        stat.app_summaries = per_app.into_values().collect();
        stat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Direction;
    use approx::assert_relative_eq;
    use std::net::Ipv4Addr;

    #[test]
    fn totals_and_groups() {
        let server = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1));
        let dns = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        let packets = vec![
            Packet::new(1.0, Direction::Uplink, 100, 60)
                .with_protocol(Protocol::Tcp)
                .with_remote(server, 443, 51000)
                .with_app_name("browser"),
            Packet::new(2.0, Direction::Downlink, 1500, 1460)
                .with_protocol(Protocol::Tcp)
                .with_remote(server, 443, 51000)
                .with_app_name("browser"),
            Packet::new(3.0, Direction::Uplink, 70, 42)
                .with_protocol(Protocol::Udp)
                .with_remote(dns, 53, 40000),
        ];
        let stat = Statistic::from_packets(&packets);

        assert_eq!(stat.total_packets, 3);
        assert_eq!(stat.total_bytes, 100 + 1500 + 42);
        assert_eq!(stat.total_https_bytes, 1600);
        assert_relative_eq!(stat.packets_duration, 2.0);
        assert_relative_eq!(stat.average_kbps, 1642.0 * 8.0 / 1000.0 / 2.0);
        assert_eq!(stat.packet_size_counts.get(&1460), Some(&1));
        assert_eq!(stat.ip_summaries.len(), 2);

        let browser = stat
            .app_summaries
            .iter()
            .find(|a| a.app_name.as_deref() == Some("browser"))
            .unwrap();
        assert_eq!(browser.packet_count, 2);
        assert!(stat.app_summaries.iter().any(|a| a.app_name.is_none() && a.total_bytes == 42));
    }

    #[test]
    fn single_packet_has_no_rate() {
        let stat = Statistic::from_packets(&[Packet::new(5.0, Direction::Uplink, 40, 0)]);
        assert_eq!(stat.packets_duration, 0.0);
        assert_eq!(stat.average_kbps, 0.0);
    }

    #[test]
    fn empty_trace() {
        let stat = Statistic::from_packets(&[]);
        assert_eq!(stat, Statistic::default());
    }
}
