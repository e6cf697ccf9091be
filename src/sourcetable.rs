//! Source-table generation: the 19-field STR row format plus CAS/NET lines
//! and response framing (spec §4.6).
//!
//! Grounded on the teacher's `snip.rs`, which parses this exact STR format
//! client-side field by field; this module is the inverse (generation
//! instead of parsing), reusing the same `isocountry` crate for the
//! two/three-letter country step instead of a hand-rolled table (see
//! `rtcm::geocode`).

use crate::rtcm::inspector::InspectionResult;

pub const STR_FIELD_COUNT: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrState {
    Initial,
    Corrected,
}

/// A single mount's 19-field STR catalogue row, generated on admission and
/// rewritten in place as inspection results arrive.
#[derive(Debug, Clone)]
pub struct StrRow {
    fields: [String; STR_FIELD_COUNT],
}

impl StrRow {
    /// Build the initial STR row on mount admission, before any RTCM byte
    /// has been inspected (spec §4.3 `admit`, §11 "graceful half-open
    /// reconnect via `_generate_initial_str`").
    pub fn initial(mount: &str, caster: &CasterDefaults) -> StrRow {
        let mut fields: [String; STR_FIELD_COUNT] = Default::default();
        fields[0] = "STR".to_string();
        fields[1] = mount.to_string();
        fields[2] = mount.to_string();
        fields[3] = "RTCM3.x".to_string();
        fields[4] = String::new();
        fields[5] = "0".to_string();
        fields[6] = "GPS".to_string();
        fields[7] = caster.network.clone();
        fields[8] = caster.country.clone();
        fields[9] = format!("{:.4}", caster.latitude);
        fields[10] = format!("{:.4}", caster.longitude);
        fields[11] = "0".to_string();
        fields[12] = "0".to_string();
        fields[13] = caster.generator.clone();
        fields[14] = "N".to_string();
        fields[15] = "B".to_string();
        fields[16] = "N".to_string();
        fields[17] = "0".to_string();
        fields[18] = "NO".to_string();
        StrRow { fields }
    }

    /// Rewrite the row from an `InspectionResult` (spec §4.3
    /// `apply_inspection`). An empty result (no geography, device info, or
    /// message stats observed) leaves the row unchanged, satisfying the STR
    /// idempotence law (spec §8).
    pub fn apply_inspection(&mut self, result: &InspectionResult, caster: &CasterDefaults) {
        if result.is_empty() {
            return;
        }

        if let Some(geo) = &result.geography {
            self.fields[2] = geo.city.clone().unwrap_or_else(|| self.fields[2].clone());
            self.fields[8] = geo.country_iso3.clone().unwrap_or_else(|| self.fields[8].clone());
            self.fields[9] = format!("{:.4}", geo.latitude);
            self.fields[10] = format!("{:.4}", geo.longitude);
        }

        if let Some((&msg_id, _)) = result.message_counts.iter().max_by_key(|(_, &count)| count) {
            self.fields[4] = format!("{}({})", msg_id, result.frequency_for(msg_id));
        }

        if !result.nav_systems.is_empty() {
            let mut systems: Vec<&str> = result.nav_systems.iter().map(String::as_str).collect();
            systems.sort_unstable();
            self.fields[6] = systems.join("+");
        }

        if !result.carriers.is_empty() {
            let mut carriers: Vec<&str> = result.carriers.iter().map(String::as_str).collect();
            carriers.sort_unstable();
            self.fields[5] = carriers.join("+");
        }

        if let Some(bitrate) = result.bitrate_bps {
            self.fields[17] = (bitrate as u64).to_string();
        }

        self.fields[13] = caster.generator.clone();
        self.fields[15] = "N".to_string();
        self.fields[18] = "YES".to_string();
    }

    pub fn state(&self) -> StrState {
        if self.fields[18] == "YES" {
            StrState::Corrected
        } else {
            StrState::Initial
        }
    }

    /// The `"STR;...;...;"`-joined line, as served in a sourcetable body.
    pub fn render(&self) -> String {
        format!("{};", self.fields.join(";"))
    }
}

/// Caster-wide defaults baked into a freshly-admitted mount's STR row and
/// the `CAS`/`NET` lines (spec §6 `caster.*` / `app.*` config keys).
#[derive(Debug, Clone)]
pub struct CasterDefaults {
    pub operator: String,
    pub network: String,
    pub generator: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub host: String,
    pub port: u16,
    pub website: String,
    pub contact: String,
}

/// `CAS;` line: caster metadata.
fn cas_line(c: &CasterDefaults) -> String {
    format!(
        "CAS;{op};{port};{name};{op};0;{country};{lat};{lon};{host};0;{website}",
        op = c.operator,
        port = c.port,
        name = c.operator,
        country = c.country,
        lat = c.latitude,
        lon = c.longitude,
        host = c.host,
        website = c.website,
    )
}

/// `NET;` line: network metadata.
fn net_line(c: &CasterDefaults) -> String {
    format!(
        "NET;{op};{op};B;{country};{website};{website};{contact};none",
        op = c.operator,
        country = c.country,
        website = c.website,
        contact = c.contact,
    )
}

/// Dialect-specific wire framing for the sourcetable response (spec §4.6).
pub enum SourcetableFraming {
    V10,
    V20,
}

/// Compose the full sourcetable body: one `CAS;` line, one `NET;` line, then
/// one `STR;` line per live mount.
pub fn render_body(caster: &CasterDefaults, str_rows: &[String]) -> String {
    let mut body = String::new();
    body.push_str(&cas_line(caster));
    body.push_str("\r\n");
    body.push_str(&net_line(caster));
    body.push_str("\r\n");
    for row in str_rows {
        body.push_str(row);
        body.push_str("\r\n");
    }
    body
}

/// Frame a sourcetable body per dialect (spec §4.6 "Response framing").
pub fn render_response(framing: SourcetableFraming, body: &str) -> String {
    match framing {
        SourcetableFraming::V10 => {
            format!(
                "SOURCETABLE 200 OK\r\nContent-Length: {len}\r\nContent-Type: text/plain\r\n\r\n{body}ENDSOURCETABLE\r\n",
                len = body.len(),
            )
        }
        SourcetableFraming::V20 => {
            format!(
                "HTTP/1.1 200 OK\r\nNtrip-Version: Ntrip/2.0\r\nContent-Type: text/plain\r\nConnection: close\r\nContent-Length: {len}\r\n\r\n{body}",
                len = body.len(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcm::inspector::{DeviceInfoRecord, GeographyRecord, InspectionResult};

    fn defaults() -> CasterDefaults {
        CasterDefaults {
            operator: "2RTK".to_string(),
            network: "2RTK".to_string(),
            generator: "2RTK_NtripCaster".to_string(),
            country: "CHN".to_string(),
            latitude: 39.9,
            longitude: 116.4,
            host: "caster.example.com".to_string(),
            port: 2101,
            website: "https://example.com".to_string(),
            contact: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn initial_row_has_19_fields_and_no_state() {
        let row = StrRow::initial("BASE1", &defaults());
        assert_eq!(row.render().trim_end_matches(';').split(';').count(), 19);
        assert_eq!(row.state(), StrState::Initial);
        assert!(row.render().ends_with("NO;"));
    }

    #[test]
    fn empty_inspection_is_idempotent() {
        let mut row = StrRow::initial("BASE1", &defaults());
        let before = row.render();
        row.apply_inspection(&InspectionResult::default(), &defaults());
        assert_eq!(row.render(), before);
    }

    #[test]
    fn inspection_flips_final_field_to_yes() {
        let mut row = StrRow::initial("BASE1", &defaults());
        let mut result = InspectionResult::default();
        result.geography = Some(GeographyRecord {
            latitude: 40.0,
            longitude: 116.0,
            height_m: 50.0,
            country_iso3: Some("CHN".to_string()),
            city: Some("Beijing".to_string()),
        });
        row.apply_inspection(&result, &defaults());
        assert_eq!(row.state(), StrState::Corrected);
        assert!(row.render().contains("Beijing"));
        assert!(row.render().ends_with("YES;"));
    }

    #[test]
    fn repeated_application_is_idempotent() {
        let mut row = StrRow::initial("BASE1", &defaults());
        let mut result = InspectionResult::default();
        result.device_info = Some(DeviceInfoRecord {
            antenna_desc: "TRM159900".to_string(),
            receiver_desc: "TRIMBLE NETR9".to_string(),
            firmware: "5.45".to_string(),
        });
        row.apply_inspection(&result, &defaults());
        let once = row.render();
        row.apply_inspection(&result, &defaults());
        assert_eq!(row.render(), once);
    }

    #[test]
    fn sourcetable_body_contains_each_str_row_exactly_once() {
        let row = StrRow::initial("BASE1", &defaults()).render();
        let body = render_body(&defaults(), &[row.clone()]);
        assert_eq!(body.matches(&row).count(), 1);
    }

    #[test]
    fn v10_content_length_excludes_endsourcetable() {
        let body = render_body(&defaults(), &[]);
        let response = render_response(SourcetableFraming::V10, &body);
        let len: usize = response
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(len, body.len());
        assert!(response.trim_end().ends_with("ENDSOURCETABLE"));
    }
}
