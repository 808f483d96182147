use uuid::Uuid;

/// Apple's Bluetooth SIG company identifier.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_DATA_LEN: u8 = 0x15;

/// Proximity fields of an iBeacon manufacturer-data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IBeaconFrame {
    /// 36-char dashed proximity UUID, upper case.
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
}

/// Parse the manufacturer data that accompanies Apple's company id.
/// Layout after the company id: type (0x02), length (0x15), 16-byte
/// proximity UUID, big-endian major and minor, measured power.
pub fn parse(data: &[u8]) -> Option<IBeaconFrame> {
    if data.len() < 23 || data[0] != IBEACON_TYPE || data[1] != IBEACON_DATA_LEN {
        return None;
    }
    let uuid = Uuid::from_slice(&data[2..18]).ok()?;
    Some(IBeaconFrame {
        uuid: uuid.hyphenated().to_string().to_uppercase(),
        major: u16::from_be_bytes([data[18], data[19]]),
        minor: u16::from_be_bytes([data[20], data[21]]),
    })
}

#[cfg(test)]
mod test {
    use super::parse;

    fn frame() -> Vec<u8> {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(&[
            0xE2, 0xC5, 0x6D, 0xB5, 0xDF, 0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0xA7, 0x10,
            0x96, 0xE0,
        ]);
        data.extend_from_slice(&[0x00, 0x03]); // major 3
        data.extend_from_slice(&[0x01, 0x00]); // minor 256
        data.push(0xC5); // measured power
        data
    }

    #[test]
    fn parses_a_proximity_frame() {
        let beacon = parse(&frame()).unwrap();
        assert_eq!(beacon.uuid, "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0");
        assert_eq!(beacon.major, 3);
        assert_eq!(beacon.minor, 256);
    }

    #[test]
    fn rejects_short_or_foreign_frames() {
        assert!(parse(&[0x02, 0x15, 0x00]).is_none());
        let mut not_beacon = frame();
        not_beacon[0] = 0x10; // some other Apple frame type
        assert!(parse(&not_beacon).is_none());
    }
}
