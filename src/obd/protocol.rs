//! # OBD-II PID Definitions and Reply Decoding
//!
//! Requests are 4-character mode-01 PID codes. An ELM327-style adapter answers
//! with space-separated hex text, e.g. `41 0C 1A F8` for an RPM request:
//!
//! ```text
//! offset  0  3  6  9
//!         41 0C 1A F8
//!         |  |  |  +-- B
//!         |  |  +----- A
//!         |  +-------- PID echo
//!         +----------- mode 01 response (0x40 + 0x01)
//! ```
//!
//! Decoding never indexes past the end of the reply: a missing header, a
//! truncated reply or non-hex digits all decode to `None`.

/// Fixed capacity of one reply buffer
pub const REPLY_BUFFER_SIZE: usize = 64;

/// Adapter prompt that terminates every reply
pub const PROMPT: u8 = b'>';

/// Offset of the first data byte relative to the start of the header
const DATA_OFFSET: usize = 6;

/// Distance between consecutive data bytes ("XX ")
const BYTE_STRIDE: usize = 3;

/// Engine metrics requested on every acquisition tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pid {
    /// Engine speed, rpm
    EngineRpm,
    /// Road speed, km/h
    VehicleSpeed,
    /// Mass air flow, g/s
    MassAirFlow,
    /// Absolute throttle position, percent
    Throttle,
}

impl Pid {
    /// Every PID polled on a tick, in request order
    pub const ALL: [Pid; 4] = [Pid::EngineRpm, Pid::VehicleSpeed, Pid::MassAirFlow, Pid::Throttle];

    /// Request code written to the adapter
    pub const fn code(self) -> &'static str {
        match self {
            Pid::EngineRpm => "010C",
            Pid::VehicleSpeed => "010D",
            Pid::MassAirFlow => "0110",
            Pid::Throttle => "014A",
        }
    }

    /// Header the reply must contain
    pub const fn header(self) -> &'static str {
        match self {
            Pid::EngineRpm => "41 0C",
            Pid::VehicleSpeed => "41 0D",
            Pid::MassAirFlow => "41 10",
            Pid::Throttle => "41 4A",
        }
    }
}

/// One reply from the adapter, held in a fixed-size buffer
#[derive(Clone, PartialEq, Eq)]
pub struct RawReply {
    buf: [u8; REPLY_BUFFER_SIZE],
    len: usize,
}

impl RawReply {
    /// Copy at most `REPLY_BUFFER_SIZE` bytes of `bytes` into a reply
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(REPLY_BUFFER_SIZE);
        let mut buf = [0u8; REPLY_BUFFER_SIZE];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self { buf, len }
    }

    pub(crate) fn from_buffer(buf: [u8; REPLY_BUFFER_SIZE], len: usize) -> Self {
        Self { buf, len: len.min(REPLY_BUFFER_SIZE) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for RawReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RawReply")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

fn find_header(reply: &[u8], header: &[u8]) -> Option<usize> {
    if header.is_empty() || reply.len() < header.len() {
        return None;
    }
    reply
        .windows(header.len())
        .position(|window| window.eq_ignore_ascii_case(header))
}

fn hex_byte(reply: &[u8], at: usize) -> Option<u8> {
    let digits = reply.get(at..at.checked_add(2)?)?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    u8::from_str_radix(text, 16).ok()
}

/// True when `reply` answers some other PID and not `pid`
///
/// This is how a late reply to an earlier request shows up. `NO DATA`,
/// `SEARCHING...` and other adapter text do not count.
pub fn answers_other(reply: &RawReply, pid: Pid) -> bool {
    let bytes = reply.as_bytes();
    find_header(bytes, pid.header().as_bytes()).is_none()
        && Pid::ALL
            .iter()
            .any(|other| *other != pid && find_header(bytes, other.header().as_bytes()).is_some())
}

/// Extract `N` data bytes following the PID's header
pub fn data_bytes<const N: usize>(reply: &[u8], pid: Pid) -> Option<[u8; N]> {
    let start = find_header(reply, pid.header().as_bytes())?;
    let mut out = [0u8; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = hex_byte(reply, start + DATA_OFFSET + i * BYTE_STRIDE)?;
    }
    Some(out)
}

/// RPM = ((A * 256) + B) / 4
pub fn parse_rpm(reply: &RawReply) -> Option<u32> {
    let [a, b] = data_bytes::<2>(reply.as_bytes(), Pid::EngineRpm)?;
    Some(((a as u32) * 256 + b as u32) / 4)
}

/// Speed = A km/h
pub fn parse_speed(reply: &RawReply) -> Option<u32> {
    let [a] = data_bytes::<1>(reply.as_bytes(), Pid::VehicleSpeed)?;
    Some(a as u32)
}

/// MAF = ((A * 256) + B) / 100 g/s
pub fn parse_maf(reply: &RawReply) -> Option<f32> {
    let [a, b] = data_bytes::<2>(reply.as_bytes(), Pid::MassAirFlow)?;
    Some(((a as u32) * 256 + b as u32) as f32 / 100.0)
}

/// Throttle = A * 100 / 255 percent, truncated
pub fn parse_throttle(reply: &RawReply) -> Option<u8> {
    let [a] = data_bytes::<1>(reply.as_bytes(), Pid::Throttle)?;
    Some(((a as u32) * 100 / 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> RawReply {
        RawReply::from_bytes(text.as_bytes())
    }

    #[test]
    fn test_pid_codes_and_headers() {
        assert_eq!(Pid::EngineRpm.code(), "010C");
        assert_eq!(Pid::EngineRpm.header(), "41 0C");
        assert_eq!(Pid::VehicleSpeed.code(), "010D");
        assert_eq!(Pid::VehicleSpeed.header(), "41 0D");
        assert_eq!(Pid::MassAirFlow.code(), "0110");
        assert_eq!(Pid::MassAirFlow.header(), "41 10");
        assert_eq!(Pid::Throttle.code(), "014A");
        assert_eq!(Pid::Throttle.header(), "41 4A");
    }

    #[test]
    fn test_parse_rpm() {
        assert_eq!(parse_rpm(&reply("41 0C 1A F8 \r\r>")), Some(1726));
        assert_eq!(parse_rpm(&reply("41 0C 00 00\r>")), Some(0));
        assert_eq!(parse_rpm(&reply("41 0C FF FF\r>")), Some(16383));
    }

    #[test]
    fn test_parse_rpm_matches_formula_for_all_bytes() {
        for a in (0u32..=255).step_by(17) {
            for b in (0u32..=255).step_by(15) {
                let text = format!("41 0C {:02X} {:02X}\r>", a, b);
                assert_eq!(parse_rpm(&reply(&text)), Some((a * 256 + b) / 4), "{}", text);
            }
        }
    }

    #[test]
    fn test_header_found_after_noise() {
        assert_eq!(parse_rpm(&reply("SEARCHING...\r41 0C 0B B8\r\r>")), Some(750));
        assert_eq!(parse_rpm(&reply("010C\r41 0c 1a f8\r>")), Some(1726));
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed(&reply("41 0D 32\r>")), Some(50));
        assert_eq!(parse_speed(&reply("41 0D FF\r>")), Some(255));
    }

    #[test]
    fn test_parse_maf() {
        let maf = parse_maf(&reply("41 10 04 D2\r>")).unwrap();
        assert!((maf - 12.34).abs() < 0.001);
    }

    #[test]
    fn test_parse_throttle_truncates() {
        assert_eq!(parse_throttle(&reply("41 4A FF\r>")), Some(100));
        assert_eq!(parse_throttle(&reply("41 4A 80\r>")), Some(50));
        assert_eq!(parse_throttle(&reply("41 4A 00\r>")), Some(0));
        assert_eq!(parse_throttle(&reply("41 4A 01\r>")), Some(0));
    }

    #[test]
    fn test_wrong_header_is_no_value() {
        assert_eq!(parse_rpm(&reply("41 0D 32\r>")), None);
        assert_eq!(parse_speed(&reply("41 0C 1A F8\r>")), None);
        assert_eq!(parse_maf(&reply("NO DATA\r>")), None);
        assert_eq!(parse_throttle(&reply("?\r>")), None);
    }

    #[test]
    fn test_late_reply_to_other_pid() {
        assert!(answers_other(&reply("41 0C 1A F8\r\r>"), Pid::VehicleSpeed));
        assert!(!answers_other(&reply("41 0C 1A F8\r\r>"), Pid::EngineRpm));
        assert!(!answers_other(&reply("41 0C 1A F8\r>41 0D 32\r>"), Pid::VehicleSpeed));
        assert!(!answers_other(&reply("NO DATA\r\r>"), Pid::MassAirFlow));
        assert!(!answers_other(&reply("SEARCHING...\r"), Pid::EngineRpm));
    }

    #[test]
    fn test_truncated_reply_is_no_value() {
        assert_eq!(parse_rpm(&reply("41 0C 1A")), None);
        assert_eq!(parse_rpm(&reply("41 0C 1A F")), None);
        assert_eq!(parse_rpm(&reply("41 0C")), None);
        assert_eq!(parse_speed(&reply("41 0D ")), None);
        assert_eq!(parse_rpm(&reply("41")), None);
        assert_eq!(parse_rpm(&reply("")), None);
    }

    #[test]
    fn test_malformed_hex_is_no_value() {
        assert_eq!(parse_rpm(&reply("41 0C ZZ F8\r>")), None);
        assert_eq!(parse_rpm(&reply("41 0C +F F8\r>")), None);
        assert_eq!(parse_speed(&reply("41 0D -1\r>")), None);
    }

    #[test]
    fn test_header_at_end_of_full_buffer() {
        let mut text = "X".repeat(REPLY_BUFFER_SIZE - 8);
        text.push_str("41 0C 1A");
        let full = reply(&text);
        assert_eq!(full.len(), REPLY_BUFFER_SIZE);
        assert_eq!(parse_rpm(&full), None);
    }

    #[test]
    fn test_reply_is_bounded() {
        let long = "41 0D 32 ".repeat(20);
        let r = reply(&long);
        assert_eq!(r.len(), REPLY_BUFFER_SIZE);
        assert_eq!(parse_speed(&r), Some(50));
    }

    #[test]
    fn test_raw_reply_debug_is_text() {
        let r = reply("41 0D 32");
        assert_eq!(format!("{:?}", r), "RawReply(\"41 0D 32\")");
        assert!(RawReply::from_bytes(b"").is_empty());
    }
}
