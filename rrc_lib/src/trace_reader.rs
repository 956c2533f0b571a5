/** ------------------------------------------------------------
 * Reading packets and sessions from a pcap capture
 * ------------------------------------------------------------- */
use crate::analyzer::TraceData;
use crate::errors::RrcError;
use crate::packet::{Direction, Packet, Protocol, Session, TcpFlags, TcpInfo};
use crate::util::{get_ipv4, get_ipv6, get_u16_be, get_u8};
use pcap::{Capture, Linktype};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;

/**
 * Network and transport header fields of one frame
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq)]
struct Decoded {
    src         : IpAddr,
    dst         : IpAddr,
    protocol    : Protocol,
    src_port    : u16,
    dst_port    : u16,
    ip_len      : u32,              // IP total length
    payload_len : u32,              // transport payload
    tcp_flags   : Option<TcpFlags>,
}

fn malformed(index: usize, reason: &str) -> RrcError {
    RrcError::MalformedPacket {
        index,
        reason: reason.to_string(),
    }
}

/**
 * Offset and ethertype of the network header for a frame
 */
fn network_header(linktype: Linktype, data: &[u8], index: usize) -> Result<(usize, u16), RrcError> {
    let truncated = || malformed(index, "truncated link header");
    if linktype == Linktype::ETHERNET {
        let ethertype = get_u16_be(data, 12).ok_or_else(truncated)?;
        if ethertype == ETHERTYPE_VLAN {
            return Ok((18, get_u16_be(data, 16).ok_or_else(truncated)?));
        }
        Ok((14, ethertype))
    } else if linktype == Linktype::LINUX_SLL {
        Ok((16, get_u16_be(data, 14).ok_or_else(truncated)?))
    } else if linktype == Linktype::IPV4 {
        Ok((0, ETHERTYPE_IPV4))
    } else if linktype == Linktype::IPV6 {
        Ok((0, ETHERTYPE_IPV6))
    } else {
        // raw IP, version from the first nibble
        match get_u8(data, 0).ok_or_else(truncated)? >> 4 {
            4 => Ok((0, ETHERTYPE_IPV4)),
            6 => Ok((0, ETHERTYPE_IPV6)),
            _ => Err(malformed(index, "unknown IP version")),
        }
    }
}

fn decode_frame(linktype: Linktype, data: &[u8], index: usize) -> Result<Decoded, RrcError> {
    let (offset, ethertype) = network_header(linktype, data, index)?;
    let ip = data.get(offset..).ok_or_else(|| malformed(index, "truncated IP header"))?;
    let truncated = || malformed(index, "truncated IP header");

    let (src, dst, next_proto, header_len, ip_len) = match ethertype {
        ETHERTYPE_IPV4 => {
            let ihl = (get_u8(ip, 0).ok_or_else(truncated)? & 0x0f) as usize * 4;
            (
                get_ipv4(ip, 12).ok_or_else(truncated)?,
                get_ipv4(ip, 16).ok_or_else(truncated)?,
                get_u8(ip, 9).ok_or_else(truncated)?,
                ihl,
                get_u16_be(ip, 2).ok_or_else(truncated)? as usize,
            )
        }
        ETHERTYPE_IPV6 => (
            get_ipv6(ip, 8).ok_or_else(truncated)?,
            get_ipv6(ip, 24).ok_or_else(truncated)?,
            get_u8(ip, 6).ok_or_else(truncated)?,
            40,
            40 + get_u16_be(ip, 4).ok_or_else(truncated)? as usize,
        ),
        other => return Err(malformed(index, &format!("not an IP frame (ethertype {other:#06x})"))),
    };
    if ip_len < header_len {
        return Err(malformed(index, "IP length shorter than its header"));
    }
    let ip_payload = ip_len - header_len;
    let transport = ip.get(header_len..).ok_or_else(truncated)?;
    let truncated = || malformed(index, "truncated transport header");

    let decoded = match next_proto {
        IP_PROTO_TCP => {
            let data_offset = (get_u8(transport, 12).ok_or_else(truncated)? >> 4) as usize * 4;
            Decoded {
                src,
                dst,
                protocol: Protocol::Tcp,
                src_port: get_u16_be(transport, 0).ok_or_else(truncated)?,
                dst_port: get_u16_be(transport, 2).ok_or_else(truncated)?,
                ip_len: ip_len as u32,
                payload_len: ip_payload.saturating_sub(data_offset) as u32,
                tcp_flags: Some(TcpFlags::from(get_u8(transport, 13).ok_or_else(truncated)?)),
            }
        }
        IP_PROTO_UDP => Decoded {
            src,
            dst,
            protocol: Protocol::Udp,
            src_port: get_u16_be(transport, 0).ok_or_else(truncated)?,
            dst_port: get_u16_be(transport, 2).ok_or_else(truncated)?,
            ip_len: ip_len as u32,
            payload_len: ip_payload.saturating_sub(8) as u32,
            tcp_flags: None,
        },
        _ => Decoded {
            src,
            dst,
            protocol: Protocol::Other,
            src_port: 0,
            dst_port: 0,
            ip_len: ip_len as u32,
            payload_len: ip_payload as u32,
            tcp_flags: None,
        },
    };
    Ok(decoded)
}

/**
 * Turn a decoded frame into a packet seen from `device`
 */
fn to_packet(decoded: &Decoded, timestamp: f64, device: IpAddr) -> Packet {
    let (direction, remote, remote_port, local_port) = if decoded.src == device {
        (Direction::Uplink, decoded.dst, decoded.dst_port, decoded.src_port)
    } else if decoded.dst == device {
        (Direction::Downlink, decoded.src, decoded.src_port, decoded.dst_port)
    } else {
        (Direction::Unknown, decoded.dst, decoded.dst_port, decoded.src_port)
    };
    let mut packet = Packet::new(timestamp, direction, decoded.ip_len, decoded.payload_len)
        .with_protocol(decoded.protocol)
        .with_remote(remote, remote_port, local_port);
    if let Some(flags) = decoded.tcp_flags {
        packet.tcp_info = Some(TcpInfo::from_flags(flags, decoded.payload_len));
    }
    packet
}

/**
 * Group packets into sessions keyed by remote address, remote port and
 * local port. Sessions are returned in order of their first packet.
 */
pub fn build_sessions(packets: &[Packet]) -> Vec<Session> {
    let mut index: HashMap<(IpAddr, u16, u16), usize> = HashMap::new();
    let mut sessions: Vec<Session> = Vec::new();
    for packet in packets {
        let Some(remote_ip) = packet.remote_ip else {
            continue;
        };
        let key = (remote_ip, packet.remote_port, packet.local_port);
        let slot = *index.entry(key).or_insert_with(|| {
            sessions.push(Session {
                remote_ip,
                remote_port: packet.remote_port,
                local_port: packet.local_port,
                protocol: packet.protocol,
                begin_time: packet.timestamp,
                end_time: packet.timestamp,
                bytes_transferred: 0,
                packet_count: 0,
            });
            sessions.len() - 1
        });
        let session = &mut sessions[slot];
        session.end_time = packet.timestamp;
        session.bytes_transferred += packet.len as u64;
        session.packet_count += 1;
    }
    sessions
}

/**
 * Read a capture into trace data.
 *
 * Timestamps are made relative to the first packet. Without a
 * `device_ip` the source of the first decodable packet is taken as the
 * device. Frames that cannot be decoded are skipped.
 */
pub fn read_pcap(path: &Path, device_ip: Option<IpAddr>) -> Result<TraceData, RrcError> {
    let mut capture = Capture::from_file(path)?;
    let linktype = capture.get_datalink();
    if ![
        Linktype::ETHERNET,
        Linktype::LINUX_SLL,
        Linktype::RAW,
        Linktype::IPV4,
        Linktype::IPV6,
    ]
    .contains(&linktype)
    {
        return Err(RrcError::UnsupportedLinkType(linktype.0));
    }

    let mut device = device_ip;
    let mut first_ts = None;
    let mut packets = Vec::new();
    let mut skipped = 0usize;
    let mut index = 0usize;

    loop {
        let frame = match capture.next_packet() {
            Ok(frame) => frame,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e.into()),
        };
        let ts = frame.header.ts.tv_sec as f64 + frame.header.ts.tv_usec as f64 * 1e-6;
        let base = *first_ts.get_or_insert(ts);

        match decode_frame(linktype, frame.data, index) {
            Ok(decoded) => {
                let device = *device.get_or_insert(decoded.src);
                packets.push(to_packet(&decoded, ts - base, device));
            }
            Err(e) => {
                warn!("skipping frame: {e}");
                skipped += 1;
            }
        }
        index += 1;
    }

    let sessions = build_sessions(&packets);
    let trace_duration = packets.last().map_or(0.0, |p| p.timestamp);
    debug!(
        frames = index,
        packets = packets.len(),
        skipped,
        sessions = sessions.len(),
        "read capture"
    );

    Ok(TraceData {
        packets,
        sessions,
        trace_duration,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    const DEVICE: [u8; 4] = [10, 0, 0, 2];
    const SERVER: [u8; 4] = [93, 184, 216, 34];

    /// Ethernet + IPv4 + TCP frame with `payload` bytes of data
    fn tcp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, flags: u8, payload: usize) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let total_len = (20 + 20 + payload) as u16;
        let mut ip = vec![0x45, 0];
        ip.extend_from_slice(&total_len.to_be_bytes());
        ip.extend_from_slice(&[0, 0, 0, 0, 64, IP_PROTO_TCP, 0, 0]);
        ip.extend_from_slice(&src);
        ip.extend_from_slice(&dst);
        frame.extend(ip);

        frame.extend_from_slice(&sport.to_be_bytes());
        frame.extend_from_slice(&dport.to_be_bytes());
        frame.extend_from_slice(&[0; 8]);
        frame.extend_from_slice(&[0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
        frame.extend(std::iter::repeat(0xab).take(payload));
        frame
    }

    fn write_pcap(frames: &[(f64, Vec<u8>)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut header = Vec::new();
        header.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
        header.extend_from_slice(&2u16.to_le_bytes());
        header.extend_from_slice(&4u16.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&65535u32.to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        file.write_all(&header).unwrap();

        for (ts, data) in frames {
            let secs = ts.trunc() as u32;
            let micros = ((ts - ts.trunc()) * 1e6).round() as u32;
            file.write_all(&secs.to_le_bytes()).unwrap();
            file.write_all(&micros.to_le_bytes()).unwrap();
            file.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
            file.write_all(data).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn decodes_ethernet_ipv4_tcp() {
        let frame = tcp_frame(DEVICE, SERVER, 51000, 443, 0b0001_1000, 100);
        let decoded = decode_frame(Linktype::ETHERNET, &frame, 0).unwrap();
        assert_eq!(decoded.protocol, Protocol::Tcp);
        assert_eq!(decoded.ip_len, 140);
        assert_eq!(decoded.payload_len, 100);
        assert_eq!(decoded.dst_port, 443);
        assert!(decoded.tcp_flags.unwrap().psh());
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let frame = tcp_frame(DEVICE, SERVER, 51000, 443, 0b0001_0000, 0);
        let err = decode_frame(Linktype::ETHERNET, &frame[..30], 7).unwrap_err();
        assert!(matches!(err, RrcError::MalformedPacket { index: 7, .. }));
    }

    #[test]
    fn direction_and_tcp_info_from_device_address() {
        let device = IpAddr::V4(Ipv4Addr::from(DEVICE));
        let up = decode_frame(Linktype::ETHERNET, &tcp_frame(DEVICE, SERVER, 51000, 443, 0b0000_0010, 0), 0).unwrap();
        let down = decode_frame(Linktype::ETHERNET, &tcp_frame(SERVER, DEVICE, 443, 51000, 0b0001_0000, 20), 1).unwrap();

        let up = to_packet(&up, 0.0, device);
        assert_eq!(up.direction, Direction::Uplink);
        assert_eq!(up.tcp_info, Some(TcpInfo::Establish));
        assert_eq!(up.local_port, 51000);

        let down = to_packet(&down, 0.1, device);
        assert_eq!(down.direction, Direction::Downlink);
        assert_eq!(down.tcp_info, Some(TcpInfo::Data));
        assert_eq!(down.remote_port, 443);
        assert!(down.is_https());
    }

    #[test]
    fn reads_capture_and_groups_sessions() {
        let file = write_pcap(&[
            (100.0, tcp_frame(DEVICE, SERVER, 51000, 443, 0b0000_0010, 0)),
            (100.25, tcp_frame(SERVER, DEVICE, 443, 51000, 0b0001_0010, 0)),
            (100.5, vec![0u8; 10]),
            (101.0, tcp_frame(DEVICE, SERVER, 51001, 443, 0b0001_1000, 300)),
        ]);
        let trace = read_pcap(file.path(), None).unwrap();

        assert_eq!(trace.packets.len(), 3);
        assert_eq!(trace.packets[0].timestamp, 0.0);
        assert_eq!(trace.packets[1].direction, Direction::Downlink);
        assert_eq!(trace.trace_duration, 1.0);
        assert_eq!(trace.sessions.len(), 2);
        assert_eq!(trace.sessions[0].packet_count, 2);
        assert_eq!(trace.sessions[1].bytes_transferred, 340);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_pcap(&dir.path().join("absent.pcap"), None).is_err());
    }
}
