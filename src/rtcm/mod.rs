//! RTCM frame decoding, classification, and geocoding (spec §4.2).

pub mod frame;
pub mod geocode;
pub mod inspector;
pub mod tables;
