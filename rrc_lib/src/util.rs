/** ------------------------------------------------------------
 * Bounds-checked big-endian readers for header decoding
 * ------------------------------------------------------------- */
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/**
 * `N` bytes starting at `offset`, or None past the end of the buffer
 */
pub fn get_bytes<const N: usize>(buffer: &[u8], offset: usize) -> Option<[u8; N]> {
    buffer.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

pub fn get_u8(buffer: &[u8], offset: usize) -> Option<u8> {
    buffer.get(offset).copied()
}

pub fn get_u16_be(buffer: &[u8], offset: usize) -> Option<u16> {
    get_bytes::<2>(buffer, offset).map(u16::from_be_bytes)
}

pub fn get_ipv4(buffer: &[u8], offset: usize) -> Option<IpAddr> {
    get_bytes::<4>(buffer, offset).map(|b| IpAddr::V4(Ipv4Addr::from(b)))
}

pub fn get_ipv6(buffer: &[u8], offset: usize) -> Option<IpAddr> {
    get_bytes::<16>(buffer, offset).map(|b| IpAddr::V6(Ipv6Addr::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_is_big_endian() {
        let buffer: &[u8] = &[0x08, 0x00, 0x45];
        assert_eq!(get_u16_be(buffer, 0), Some(0x0800));
        assert_eq!(get_u16_be(buffer, 1), Some(0x0045));
    }

    #[test]
    fn reads_past_the_end_fail() {
        let buffer: &[u8] = &[1, 2, 3];
        assert_eq!(get_u16_be(buffer, 2), None);
        assert_eq!(get_u8(buffer, 3), None);
        assert_eq!(get_ipv4(buffer, 0), None);
        assert_eq!(get_bytes::<2>(buffer, usize::MAX), None);
    }

    #[test]
    fn addresses() {
        let buffer: &[u8] = &[0, 10, 0, 0, 1];
        assert_eq!(get_ipv4(buffer, 1), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));

        let mut v6 = [0u8; 16];
        v6[15] = 1;
        assert_eq!(get_ipv6(&v6, 0), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }
}
