/** ------------------------------------------------------------
 * Trace input model: packets, sessions and device telemetry.
 * ------------------------------------------------------------- */
use bilge::prelude::*;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/**
 * Direction of a packet relative to the device
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Uplink,
    Downlink,
    Unknown,
}

/**
 * Transport protocol carried by the packet
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Other,
}

/**
 * TCP role of a packet within its connection.
 *
 * Assigned upstream (session reassembly or the trace reader); the
 * burst analysis only consumes it.
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcpInfo {
    Establish,
    Close,
    Reset,
    Ack,
    Data,
    KeepAlive,
    KeepAliveAck,
    ZeroWindow,
    WindowUpdate,
    AckDup,
    DataDup,
    AckRecover,
    DataRecover,
}

impl TcpInfo {
    /// Connection management packets that carry no application data.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            TcpInfo::Establish
                | TcpInfo::Close
                | TcpInfo::Reset
                | TcpInfo::Ack
                | TcpInfo::KeepAlive
                | TcpInfo::KeepAliveAck
                | TcpInfo::ZeroWindow
                | TcpInfo::WindowUpdate
        )
    }

    /// Retransmissions, duplicates and recovery traffic.
    pub fn is_loss_or_dup(self) -> bool {
        matches!(
            self,
            TcpInfo::AckDup | TcpInfo::DataDup | TcpInfo::AckRecover | TcpInfo::DataRecover
        )
    }

    /**
     * Coarse classification from the TCP header alone.
     *
     * Duplicate and recovery detection needs sequence tracking across
     * the connection, so this never yields those variants.
     */
    pub fn from_flags(flags: TcpFlags, payload_len: u32) -> Self {
        if flags.rst() {
            TcpInfo::Reset
        } else if flags.syn() {
            TcpInfo::Establish
        } else if flags.fin() {
            TcpInfo::Close
        } else if payload_len > 0 {
            TcpInfo::Data
        } else {
            TcpInfo::Ack
        }
    }
}

/**
 * TCP flags byte (offset 13 of the TCP header), LSB first
 */
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

/**
 * A single captured packet as seen by the analysis
 */
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub timestamp   : f64,              // seconds since trace start
    pub direction   : Direction,
    pub len         : u32,              // bytes on the wire (IP layer)
    pub payload_len : u32,              // transport payload bytes
    pub protocol    : Protocol,
    pub remote_ip   : Option<IpAddr>,
    pub local_port  : u16,
    pub remote_port : u16,
    pub tcp_info    : Option<TcpInfo>,
    pub app_name    : Option<String>,
}

impl Packet {
    pub fn new(timestamp: f64, direction: Direction, len: u32, payload_len: u32) -> Self {
        Self {
            timestamp,
            direction,
            len,
            payload_len,
            protocol: Protocol::Other,
            remote_ip: None,
            local_port: 0,
            remote_port: 0,
            tcp_info: None,
            app_name: None,
        }
    }

    pub fn with_tcp_info(mut self, info: TcpInfo) -> Self {
        self.protocol = Protocol::Tcp;
        self.tcp_info = Some(info);
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_remote(mut self, ip: IpAddr, remote_port: u16, local_port: u16) -> Self {
        self.remote_ip = Some(ip);
        self.remote_port = remote_port;
        self.local_port = local_port;
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn is_https(&self) -> bool {
        self.protocol == Protocol::Tcp && (self.remote_port == 443 || self.local_port == 443)
    }
}

/**
 * A transport connection (TCP) or flow (UDP) with its time span
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub local_port: u16,
    pub protocol: Protocol,
    pub begin_time: f64,
    pub end_time: f64,
    pub bytes_transferred: u64,
    pub packet_count: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEventType {
    ScreenTouch,
    ScreenLandscape,
    ScreenPortrait,
    KeyPower,
    KeyVolumeUp,
    KeyVolumeDown,
    KeyBall,
    KeyHome,
    KeyMenu,
    KeyBack,
    KeySearch,
    KeyGreen,
    KeyRed,
    KeyKey,
    Unknown,
}

impl UserEventType {
    pub fn is_rotation(self) -> bool {
        matches!(self, UserEventType::ScreenLandscape | UserEventType::ScreenPortrait)
    }
}

/**
 * A user interaction with press and release timestamps
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub event_type: UserEventType,
    pub press_time: f64,
    pub release_time: f64,
}

impl UserEvent {
    pub fn new(event_type: UserEventType, press_time: f64, release_time: f64) -> Self {
        Self {
            event_type,
            press_time,
            release_time,
        }
    }
}

/**
 * Total CPU usage sample (percent)
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuActivity {
    pub timestamp: f64,
    pub total_cpu_usage: f64,
}

impl CpuActivity {
    pub fn new(timestamp: f64, total_cpu_usage: f64) -> Self {
        Self {
            timestamp,
            total_cpu_usage,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeripheralState {
    Active,
    Standby,
    Off,
}

/**
 * State change of a device peripheral (GPS, camera, WiFi, bluetooth,
 * screen). The state holds until the next sample or the end of the trace.
 * A WiFi link that is connected or changing state counts as active, a
 * disconnected or suspended one as standby.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralSample {
    pub timestamp: f64,
    pub state: PeripheralState,
}

impl PeripheralSample {
    pub fn new(timestamp: f64, state: PeripheralState) -> Self {
        Self { timestamp, state }
    }
}

/**
 * Closed analysis window in trace seconds
 */
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin_time: f64,
    pub end_time: f64,
}

impl TimeRange {
    pub fn new(begin_time: f64, end_time: f64) -> Self {
        Self {
            begin_time,
            end_time,
        }
    }

    pub fn contains(&self, ts: f64) -> bool {
        self.begin_time <= ts && ts <= self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_from_header_byte() {
        // SYN + ACK
        let flags = TcpFlags::from(0b0001_0010u8);
        assert!(flags.syn());
        assert!(flags.ack());
        assert!(!flags.fin());
        assert_eq!(TcpInfo::from_flags(flags, 0), TcpInfo::Establish);
    }

    #[test]
    fn reset_wins_over_other_flags() {
        let flags = TcpFlags::from(0b0001_0101u8);
        assert_eq!(TcpInfo::from_flags(flags, 10), TcpInfo::Reset);
    }

    #[test]
    fn payload_decides_between_ack_and_data() {
        let ack_only = TcpFlags::from(0b0001_0000u8);
        assert_eq!(TcpInfo::from_flags(ack_only, 0), TcpInfo::Ack);
        assert_eq!(TcpInfo::from_flags(ack_only, 1200), TcpInfo::Data);
    }

    #[test]
    fn control_and_loss_sets_are_disjoint() {
        let all = [
            TcpInfo::Establish,
            TcpInfo::Close,
            TcpInfo::Reset,
            TcpInfo::Ack,
            TcpInfo::Data,
            TcpInfo::KeepAlive,
            TcpInfo::KeepAliveAck,
            TcpInfo::ZeroWindow,
            TcpInfo::WindowUpdate,
            TcpInfo::AckDup,
            TcpInfo::DataDup,
            TcpInfo::AckRecover,
            TcpInfo::DataRecover,
        ];
        for info in all {
            assert!(!(info.is_control() && info.is_loss_or_dup()), "{:?}", info);
        }
        assert!(!TcpInfo::Data.is_control());
    }

    #[test]
    fn https_detection_uses_either_port() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let p = Packet::new(0.0, Direction::Uplink, 60, 0)
            .with_tcp_info(TcpInfo::Ack)
            .with_remote(ip, 443, 50000);
        assert!(p.is_https());
        let udp = Packet::new(0.0, Direction::Uplink, 60, 0)
            .with_protocol(Protocol::Udp)
            .with_remote(ip, 443, 50000);
        assert!(!udp.is_https());
    }
}
