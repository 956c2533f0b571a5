/** ------------------------------------------------------------
 * Sliding window throughput over a sorted packet list
 * ------------------------------------------------------------- */
use crate::packet::{Direction, Packet};
use serde::{Deserialize, Serialize};

/**
 * Bytes moved in each direction during one sampling window
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub begin_time: f64,
    pub end_time: f64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

impl Throughput {
    pub fn sample_period(&self) -> f64 {
        self.end_time - self.begin_time
    }

    pub fn upload_kbps(&self) -> f64 {
        self.rate_kbps(self.upload_bytes)
    }

    pub fn download_kbps(&self) -> f64 {
        self.rate_kbps(self.download_bytes)
    }

    pub fn upload_mbps(&self) -> f64 {
        self.upload_kbps() / 1000.0
    }

    pub fn download_mbps(&self) -> f64 {
        self.download_kbps() / 1000.0
    }

    pub fn kbps(&self) -> f64 {
        self.upload_kbps() + self.download_kbps()
    }

    fn rate_kbps(&self, bytes: u64) -> f64 {
        let period = self.sample_period();
        if period <= 0.0 {
            return 0.0;
        }
        bytes as f64 * 8.0 / 1000.0 / period
    }
}

/**
 * Running byte totals of all packets strictly before a moving edge
 */
struct EdgeAccumulator<'a> {
    packets: &'a [Packet],
    next: usize,
    up: u64,
    down: u64,
}

impl<'a> EdgeAccumulator<'a> {
    fn new(packets: &'a [Packet]) -> Self {
        Self {
            packets,
            next: 0,
            up: 0,
            down: 0,
        }
    }

    fn advance_to(&mut self, edge: f64) {
        while let Some(packet) = self.packets.get(self.next) {
            if packet.timestamp >= edge {
                break;
            }
            match packet.direction {
                Direction::Uplink => self.up += packet.len as u64,
                Direction::Downlink => self.down += packet.len as u64,
                Direction::Unknown => {}
            }
            self.next += 1;
        }
    }
}

/**
 * Split `[start_time, end_time]` into consecutive windows of `window`
 * seconds and count the wire bytes falling into each of them.
 *
 * A trailing partial window covers what is left when the range is not
 * a multiple of the window size. Packets must be sorted by timestamp.
 * An empty packet list yields no samples.
 */
pub fn calculate_throughput(
    start_time: f64,
    end_time: f64,
    window: f64,
    packets: &[Packet],
) -> Vec<Throughput> {
    let mut result = Vec::new();
    if packets.is_empty() || window <= 0.0 || end_time <= start_time {
        return result;
    }

    let mut head = EdgeAccumulator::new(packets);
    let mut tail = EdgeAccumulator::new(packets);

    let steps = ((end_time - start_time) / window) as usize;
    let mut window_end = start_time;
    for i in 1..=steps {
        window_end = start_time + i as f64 * window;
        let window_begin = window_end - window;
        head.advance_to(window_begin);
        tail.advance_to(window_end);
        result.push(Throughput {
            begin_time: window_begin,
            end_time: window_end,
            upload_bytes: tail.up - head.up,
            download_bytes: tail.down - head.down,
        });
    }

    if end_time > window_end {
        head.advance_to(window_end);
        tail.advance_to(end_time);
        result.push(Throughput {
            begin_time: window_end,
            end_time,
            upload_bytes: tail.up - head.up,
            download_bytes: tail.down - head.down,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn packet(ts: f64, direction: Direction, len: u32) -> Packet {
        Packet::new(ts, direction, len, 0)
    }

    #[test]
    fn windows_cover_range_with_leftover() {
        let packets = vec![
            packet(0.1, Direction::Uplink, 100),
            packet(0.6, Direction::Downlink, 1000),
            packet(1.2, Direction::Uplink, 50),
        ];
        let samples = calculate_throughput(0.0, 1.25, 0.5, &packets);
        assert_eq!(samples.len(), 3);

        assert_eq!(samples[0].upload_bytes, 100);
        assert_eq!(samples[0].download_bytes, 0);
        assert_eq!(samples[1].download_bytes, 1000);
        assert_eq!(samples[2].upload_bytes, 50);
        assert_relative_eq!(samples[2].begin_time, 1.0);
        assert_relative_eq!(samples[2].end_time, 1.25);
    }

    #[test]
    fn rates_use_sample_period() {
        let t = Throughput {
            begin_time: 0.0,
            end_time: 0.5,
            upload_bytes: 62_500,
            download_bytes: 0,
        };
        // 62500 B * 8 / 0.5 s = 1 Mbit/s
        assert_relative_eq!(t.upload_mbps(), 1.0);
        assert_relative_eq!(t.download_mbps(), 0.0);
    }

    #[test]
    fn empty_inputs_produce_nothing() {
        assert!(calculate_throughput(0.0, 10.0, 0.5, &[]).is_empty());
        let packets = vec![packet(1.0, Direction::Uplink, 10)];
        assert!(calculate_throughput(5.0, 5.0, 0.5, &packets).is_empty());
    }

    #[test]
    fn unknown_direction_is_ignored() {
        let packets = vec![packet(0.1, Direction::Unknown, 500)];
        let samples = calculate_throughput(0.0, 0.5, 0.5, &packets);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].upload_bytes + samples[0].download_bytes, 0);
    }
}
