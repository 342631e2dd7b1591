//! AX.25 UI frame encoding and KISS framing.

const KISS_FEND: u8 = 0xC0;
const KISS_FESC: u8 = 0xDB;
const KISS_TFEND: u8 = 0xDC;
const KISS_TFESC: u8 = 0xDD;

/// Encode one address field (callsign, optionally `CALL-SSID`) into its
/// 7-byte AX.25 shifted-ASCII representation. `last` marks the final
/// address field in the path, which gets the address-extension bit set.
fn encode_address(addr: &str, last: bool) -> [u8; 7] {
    let (call, ssid) = match addr.split_once('-') {
        Some((c, s)) => (c, s.parse::<u8>().unwrap_or(0)),
        None => (addr, 0),
    };
    let mut out = [0u8; 7];
    let call_bytes = call.to_ascii_uppercase();
    for i in 0..6 {
        let c = call_bytes.as_bytes().get(i).copied().unwrap_or(b' ');
        out[i] = c << 1;
    }
    let extension = if last { 1 } else { 0 };
    out[6] = ((ssid & 0x0F) << 1) | 0x60 | extension;
    out
}

/// Build one AX.25 UI frame: destination, source, digipeater path, control
/// byte `0x03`, PID byte `0xF0` (no layer 3), and the info field payload.
pub fn ax25_ui_frame(dstcall: &str, srccall: &str, digipath: &[String], info: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    let path_len = digipath.len();

    frame.extend_from_slice(&encode_address(dstcall, false));
    frame.extend_from_slice(&encode_address(srccall, path_len == 0));
    for (i, repeater) in digipath.iter().enumerate() {
        frame.extend_from_slice(&encode_address(repeater, i == path_len - 1));
    }

    frame.push(0x03); // control: UI frame
    frame.push(0xF0); // PID: no layer 3 protocol
    frame.extend_from_slice(info);
    frame
}

/// Wrap one AX.25 frame in a KISS data frame on `port`, with end-to-end
/// byte escaping, delimited by `0xC0` on both ends.
pub fn kiss_frame(port: u8, ax25_frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ax25_frame.len() + 4);
    out.push(KISS_FEND);
    out.push((port << 4) & 0xF0);
    for &byte in ax25_frame {
        match byte {
            KISS_FEND => {
                out.push(KISS_FESC);
                out.push(KISS_TFEND);
            }
            KISS_FESC => {
                out.push(KISS_FESC);
                out.push(KISS_TFESC);
            }
            other => out.push(other),
        }
    }
    out.push(KISS_FEND);
    out
}

/// Decode a single KISS-framed buffer back into `(port, payload)`, undoing
/// the escaping above. Used by tests to verify the escaping round-trip.
pub fn kiss_decode(framed: &[u8]) -> Option<(u8, Vec<u8>)> {
    let inner = framed.strip_prefix(&[KISS_FEND])?.strip_suffix(&[KISS_FEND])?;
    let (&cmd, rest) = inner.split_first()?;
    let port = cmd >> 4;

    let mut out = Vec::with_capacity(rest.len());
    let mut iter = rest.iter().copied();
    while let Some(byte) = iter.next() {
        if byte == KISS_FESC {
            match iter.next()? {
                KISS_TFEND => out.push(KISS_FEND),
                KISS_TFESC => out.push(KISS_FESC),
                _ => return None,
            }
        } else {
            out.push(byte);
        }
    }
    Some((port, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_encoding_shifts_and_pads() {
        let encoded = encode_address("N0CALL", false);
        assert_eq!(encoded[0], b'N' << 1);
        assert_eq!(encoded[6] & 1, 0);
    }

    #[test]
    fn last_address_sets_extension_bit() {
        let encoded = encode_address("N0CALL", true);
        assert_eq!(encoded[6] & 1, 1);
    }

    #[test]
    fn address_carries_ssid() {
        let encoded = encode_address("N0CALL-7", false);
        assert_eq!((encoded[6] >> 1) & 0x0F, 7);
    }

    #[test]
    fn ui_frame_destination_extension_bit_is_clear_with_no_digipath() {
        let frame = ax25_ui_frame("APMOWA", "DB0ABC", &[], b"hello");
        assert_eq!(frame[6] & 1, 0, "destination is never the last address");
        assert_eq!(frame[13] & 1, 1, "source is last when there is no digipath");
    }

    #[test]
    fn ui_frame_has_control_and_pid_bytes() {
        let frame = ax25_ui_frame("APMOWA", "DB0ABC", &["WIDE1-1".to_string()], b"hello");
        // dst (7) + src (7) + 1 digipeater (7) + control + pid + info
        assert_eq!(frame[21], 0x03);
        assert_eq!(frame[22], 0xF0);
        assert_eq!(&frame[23..], b"hello");
    }

    #[test]
    fn kiss_round_trip_preserves_payload() {
        let frame = ax25_ui_frame("APMOWA", "DB0ABC", &[], b"test payload");
        let framed = kiss_frame(2, &frame);
        let (port, decoded) = kiss_decode(&framed).unwrap();
        assert_eq!(port, 2);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn kiss_escapes_literal_fend_and_fesc_bytes() {
        let payload = vec![0xC0, 0xDB, 0x42];
        let framed = kiss_frame(0, &payload);
        assert!(!framed[1..framed.len() - 1].windows(1).any(|w| w == [KISS_FEND]));
        let (_, decoded) = kiss_decode(&framed).unwrap();
        assert_eq!(decoded, payload);
    }
}
