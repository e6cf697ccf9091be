//! RTCM Inspector: a bounded streaming parser fed a duplicated copy of a
//! producer's bytes, classifying frames and accumulating a per-mount
//! `InspectionResult` (spec §4.2).
//!
//! Grounded on `RTCMParserThread` in the original's `src/rtcm2.py`: same
//! `mode` split (`STR_FIX` / `REALTIME_WEB`), same 5 s warm-up before
//! counting bytes toward bitrate, same 10 s bitrate recompute interval. The
//! manual `DF030_xx`/`DF228_xx`/`DF230_xx` character-by-character
//! reconstruction in `_process_device_info` is not replicated; we assume a
//! `rtcm-rs` message exposes already-decoded descriptor strings and read
//! them directly through `frame::decode_all`.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rtcm_rs::Message;

use super::frame;
use super::geocode::{ecef_to_wgs84, reverse_geocode};
use super::tables::{classify, is_antenna_descriptor_message, is_station_coordinate_message};

const WARMUP: Duration = Duration::from_secs(5);
const BITRATE_INTERVAL: Duration = Duration::from_secs(10);
const REVERSE_GEOCODE_MIN_POPULATION: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorMode {
    /// Runs for a fixed duration then terminates (spec §4.2).
    StrFix { duration: Duration },
    /// Runs until explicitly stopped.
    RealtimeWeb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeographyRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub height_m: f64,
    pub country_iso3: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfoRecord {
    pub antenna_desc: String,
    pub receiver_desc: String,
    pub firmware: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MsmSatelliteRecord {
    pub prn: u8,
    pub signal: String,
    pub cnr: Option<f64>,
    pub lock_time_ms: Option<u32>,
}

/// Running aggregate for one mount, rewritten into the STR row by
/// `Registry::apply_inspection` (spec §9 "STR generation mixed with parsing"
/// → keep STR rewrite entirely in Registry, Inspector yields a pure value).
#[derive(Debug, Clone, Default)]
pub struct InspectionResult {
    pub message_counts: HashMap<u16, u32>,
    pub nav_systems: HashSet<String>,
    pub carriers: HashSet<String>,
    pub geography: Option<GeographyRecord>,
    pub device_info: Option<DeviceInfoRecord>,
    pub bitrate_bps: Option<f64>,
    pub latest_epoch_satellites: Vec<MsmSatelliteRecord>,
}

impl InspectionResult {
    pub fn is_empty(&self) -> bool {
        self.message_counts.is_empty()
            && self.geography.is_none()
            && self.device_info.is_none()
            && self.bitrate_bps.is_none()
    }

    /// `freq = max(1, round(count/10))` (spec §4.2 message cadence; original
    /// `_calculate_message_frequency`).
    pub fn frequency_for(&self, msg_id: u16) -> u32 {
        let count = self.message_counts.get(&msg_id).copied().unwrap_or(0);
        ((count as f64 / 10.0).round() as u32).max(1)
    }
}

/// A bounded streaming parser over one mount's byte stream. Owns no socket;
/// callers feed it chunks as they arrive from the Forwarder's internal
/// subscriber pipe (spec §4.4 `register_subscriber_pipe`).
pub struct Inspector {
    mode: InspectorMode,
    started_at: Instant,
    buffer: Vec<u8>,
    result: InspectionResult,
    bitrate_window_start: Instant,
    bitrate_window_bytes: u64,
    last_bitrate_emit: Instant,
}

impl Inspector {
    pub fn new(mode: InspectorMode) -> Inspector {
        let now = Instant::now();
        Inspector {
            mode,
            started_at: now,
            buffer: Vec::new(),
            result: InspectionResult::default(),
            bitrate_window_start: now,
            bitrate_window_bytes: 0,
            last_bitrate_emit: now,
        }
    }

    /// Whether an STR_FIX inspector's hard cutoff has elapsed (spec §5
    /// "STR fix mode hard cutoff 30 s").
    pub fn expired(&self) -> bool {
        match self.mode {
            InspectorMode::StrFix { duration } => self.started_at.elapsed() >= duration,
            InspectorMode::RealtimeWeb => false,
        }
    }

    /// Feed a chunk of bytes copied from the producer stream. Frames are
    /// decoded as they complete; the 5 s warm-up excludes bytes seen before
    /// it elapses from the bitrate counter, and bitrate is recomputed and
    /// reset every 10 s thereafter.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        let (messages, consumed) = frame::decode_all(&self.buffer);
        self.buffer.drain(..consumed);

        if self.started_at.elapsed() >= WARMUP {
            self.bitrate_window_bytes += consumed as u64;
        }

        for message in &messages {
            self.classify_message(message);
        }

        if self.last_bitrate_emit.elapsed() >= BITRATE_INTERVAL {
            let elapsed = self.bitrate_window_start.elapsed().as_secs_f64().max(1.0);
            self.result.bitrate_bps = Some((self.bitrate_window_bytes as f64 * 8.0) / elapsed);
            self.bitrate_window_bytes = 0;
            self.bitrate_window_start = Instant::now();
            self.last_bitrate_emit = Instant::now();
        }
    }

    fn classify_message(&mut self, message: &Message) {
        let msg_id = message_number(message);
        *self.result.message_counts.entry(msg_id).or_insert(0) += 1;

        if let Some((constellation, carriers)) = classify(msg_id) {
            self.result.nav_systems.insert(constellation.to_string());
            for carrier in carriers {
                self.result.carriers.insert(carrier.to_string());
            }
        }

        if is_station_coordinate_message(msg_id) {
            if let Some((x, y, z)) = extract_station_ecef(message) {
                let pos = ecef_to_wgs84(x, y, z);
                let geocoded = reverse_geocode(pos.latitude, pos.longitude, REVERSE_GEOCODE_MIN_POPULATION);
                self.result.geography = Some(GeographyRecord {
                    latitude: pos.latitude,
                    longitude: pos.longitude,
                    height_m: pos.height_m,
                    country_iso3: geocoded.as_ref().and_then(|g| g.country_iso3.clone()),
                    city: geocoded.map(|g| g.city),
                });
            }
        }

        if is_antenna_descriptor_message(msg_id) {
            if let Some(device) = extract_device_info(message) {
                self.result.device_info = Some(device);
            }
        }

        if let Some(satellites) = extract_msm_satellites(message) {
            self.result.latest_epoch_satellites = satellites;
        }
    }

    pub fn result(&self) -> InspectionResult {
        self.result.clone()
    }
}

fn message_number(message: &Message) -> u16 {
    message.number().unwrap_or(0)
}

/// Extract ECEF X/Y/Z (DF025/026/027) from a 1005/1006 frame.
fn extract_station_ecef(message: &Message) -> Option<(f64, f64, f64)> {
    match message {
        Message::Msg1005(m) => Some((
            m.antenna_ref_point_ecef_x_m,
            m.antenna_ref_point_ecef_y_m,
            m.antenna_ref_point_ecef_z_m,
        )),
        Message::Msg1006(m) => Some((
            m.antenna_ref_point_ecef_x_m,
            m.antenna_ref_point_ecef_y_m,
            m.antenna_ref_point_ecef_z_m,
        )),
        _ => None,
    }
}

/// Extract decoded antenna/receiver/firmware descriptors from a 1033 frame.
fn extract_device_info(message: &Message) -> Option<DeviceInfoRecord> {
    match message {
        Message::Msg1033(m) => Some(DeviceInfoRecord {
            antenna_desc: m.antenna_descriptor_str.to_string(),
            receiver_desc: m.receiver_type_descriptor_str.to_string(),
            firmware: m.receiver_firmware_version_str.to_string(),
        }),
        _ => None,
    }
}

/// Extract per-satellite PRN/signal/CNR/lock-time from an MSM frame.
fn extract_msm_satellites(message: &Message) -> Option<Vec<MsmSatelliteRecord>> {
    let observables = message.msm_observables()?;
    Some(
        observables
            .into_iter()
            .map(|o| MsmSatelliteRecord {
                prn: o.prn,
                signal: o.signal,
                cnr: o.cnr,
                lock_time_ms: o.lock_time_ms,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_empty() {
        assert!(InspectionResult::default().is_empty());
    }

    #[test]
    fn frequency_floors_at_one() {
        let mut result = InspectionResult::default();
        result.message_counts.insert(1074, 3);
        assert_eq!(result.frequency_for(1074), 1);
        result.message_counts.insert(1074, 25);
        assert_eq!(result.frequency_for(1074), 3);
    }

    #[test]
    fn str_fix_expires_after_duration() {
        let inspector = Inspector::new(InspectorMode::StrFix { duration: Duration::from_millis(0) });
        assert!(inspector.expired());
    }

    #[test]
    fn realtime_web_never_expires() {
        let inspector = Inspector::new(InspectorMode::RealtimeWeb);
        assert!(!inspector.expired());
    }
}
