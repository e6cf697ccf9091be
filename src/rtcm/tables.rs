//! Static RTCM3 message-id → (constellation, carrier) classification tables
//! (spec §4.2). Transcribed from the original's `CARRIER_INFO` dict in
//! `src/rtcm2.py`, which maps exact `(start, end)` ranges to a constellation
//! tag and carrier/signal tag.

/// One classified message-id range.
pub struct CarrierRange {
    pub start: u16,
    pub end: u16,
    pub constellation: &'static str,
    pub carrier: &'static str,
}

/// MSM and station/antenna message-id ranges, in the order the original
/// table lists them.
pub const CARRIER_RANGES: &[CarrierRange] = &[
    CarrierRange { start: 1040, end: 1047, constellation: "SBAS", carrier: "L1" },
    CarrierRange { start: 1070, end: 1077, constellation: "GPS", carrier: "L1+L2+L5" },
    CarrierRange { start: 1080, end: 1087, constellation: "GLO", carrier: "G1+G2+G3" },
    CarrierRange { start: 1090, end: 1097, constellation: "GAL", carrier: "E1+E5" },
    CarrierRange { start: 1100, end: 1107, constellation: "QZSS", carrier: "L1+L2+L5" },
    CarrierRange { start: 1110, end: 1117, constellation: "IRNSS", carrier: "L5" },
    CarrierRange { start: 1120, end: 1127, constellation: "BDS", carrier: "B1+B2" },
];

/// Station coordinate message ids (DF025/026/027 ECEF X/Y/Z).
pub const STATION_COORDINATE_MESSAGE_IDS: &[u16] = &[1005, 1006];

/// Antenna/receiver/firmware descriptor message id (DF030/DF228/DF230).
pub const ANTENNA_DESCRIPTOR_MESSAGE_ID: u16 = 1033;

/// Lower bound of the MSM message family (spec glossary: 1070-1229).
pub const MSM_FAMILY_START: u16 = 1070;
pub const MSM_FAMILY_END: u16 = 1229;

/// Classify a message id into `(constellation, carrier)`, splitting a
/// composite carrier token like `"L1+L2+L5"` into its individual bands.
pub fn classify(msg_id: u16) -> Option<(&'static str, Vec<&'static str>)> {
    CARRIER_RANGES
        .iter()
        .find(|r| msg_id >= r.start && msg_id <= r.end)
        .map(|r| (r.constellation, r.carrier.split('+').collect()))
}

pub fn is_msm_message(msg_id: u16) -> bool {
    (MSM_FAMILY_START..=MSM_FAMILY_END).contains(&msg_id)
}

pub fn is_station_coordinate_message(msg_id: u16) -> bool {
    STATION_COORDINATE_MESSAGE_IDS.contains(&msg_id)
}

pub fn is_antenna_descriptor_message(msg_id: u16) -> bool {
    msg_id == ANTENNA_DESCRIPTOR_MESSAGE_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gps_msm() {
        let (constellation, carriers) = classify(1074).unwrap();
        assert_eq!(constellation, "GPS");
        assert_eq!(carriers, vec!["L1", "L2", "L5"]);
    }

    #[test]
    fn classifies_beidou_range_boundaries() {
        assert_eq!(classify(1120).unwrap().0, "BDS");
        assert_eq!(classify(1127).unwrap().0, "BDS");
        assert!(classify(1128).is_none());
    }

    #[test]
    fn station_and_antenna_ids() {
        assert!(is_station_coordinate_message(1005));
        assert!(is_station_coordinate_message(1006));
        assert!(!is_station_coordinate_message(1033));
        assert!(is_antenna_descriptor_message(1033));
    }

    #[test]
    fn msm_family_bounds() {
        assert!(is_msm_message(1070));
        assert!(is_msm_message(1127));
        assert!(!is_msm_message(1069));
    }
}
