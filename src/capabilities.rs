//! Device capability profiles
//!
//! Resolves what an attached device can do from its product id, using a
//! line-oriented table file when one is present and a handful of per-family
//! name heuristics otherwise.
//!
//! ## Table format
//! One device per line, nine comma-separated fields:
//!
//! ```text
//! productId,name,hasProximity,hasMobCallerId,hasMobCallState,hasDocking,hasWearingSensor,hasMultiline,isWireless
//! ```
//!
//! `YES` (any case) is true, anything else is false. Lines starting with `#`
//! or `,` are ignored, as are rows that are too short or whose id is not hex.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Default capability table file name
pub const CAPABILITIES_FILE: &str = "DeviceCapabilities.csv";

/// Number of fields in a table row
const ROW_FIELDS: usize = 9;

/// One capability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Proximity,
    MobileCallerId,
    MobileCallState,
    Docking,
    WearingSensor,
    Multiline,
    Wireless,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Proximity => "proximity",
            Capability::MobileCallerId => "mobile caller id",
            Capability::MobileCallState => "mobile call state",
            Capability::Docking => "docking",
            Capability::WearingSensor => "wearing sensor",
            Capability::Multiline => "multiline",
            Capability::Wireless => "wireless",
        };
        f.write_str(name)
    }
}

/// Capability profile of one device
///
/// The default value (all flags false, no product id) is what an absent or
/// unknown device has.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub has_proximity: bool,
    pub has_mobile_caller_id: bool,
    pub has_mobile_call_state: bool,
    pub has_docking: bool,
    pub has_wearing_sensor: bool,
    pub has_multiline: bool,
    pub is_wireless: bool,
    /// Product id this profile was resolved for
    #[serde(default)]
    pub product_id: Option<u16>,
}

impl DeviceCapabilities {
    pub fn get(&self, capability: Capability) -> bool {
        match capability {
            Capability::Proximity => self.has_proximity,
            Capability::MobileCallerId => self.has_mobile_caller_id,
            Capability::MobileCallState => self.has_mobile_call_state,
            Capability::Docking => self.has_docking,
            Capability::WearingSensor => self.has_wearing_sensor,
            Capability::Multiline => self.has_multiline,
            Capability::Wireless => self.is_wireless,
        }
    }

    /// Set a flag, returning whether it changed
    pub fn set(&mut self, capability: Capability, value: bool) -> bool {
        let flag = match capability {
            Capability::Proximity => &mut self.has_proximity,
            Capability::MobileCallerId => &mut self.has_mobile_caller_id,
            Capability::MobileCallState => &mut self.has_mobile_call_state,
            Capability::Docking => &mut self.has_docking,
            Capability::WearingSensor => &mut self.has_wearing_sensor,
            Capability::Multiline => &mut self.has_multiline,
            Capability::Wireless => &mut self.is_wireless,
        };
        let changed = *flag != value;
        *flag = value;
        changed
    }

    /// True when no flag is set
    pub fn is_minimal(&self) -> bool {
        !(self.has_proximity
            || self.has_mobile_caller_id
            || self.has_mobile_call_state
            || self.has_docking
            || self.has_wearing_sensor
            || self.has_multiline
            || self.is_wireless)
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proximity={} caller_id={} mobile_state={} docking={} wearing={} multiline={} wireless={}",
            self.has_proximity,
            self.has_mobile_caller_id,
            self.has_mobile_call_state,
            self.has_docking,
            self.has_wearing_sensor,
            self.has_multiline,
            self.is_wireless
        )
    }
}

// ============================================================================
// Product families
// ============================================================================

/// Name substring and the flags it forces when a device is not in the table
struct FamilyOverride {
    pattern: &'static str,
    apply: fn(&mut DeviceCapabilities),
}

/// Known families, matched against the uppercased device name in order
const FAMILY_OVERRIDES: &[FamilyOverride] = &[
    FamilyOverride {
        pattern: "BLACKWIRE",
        apply: |caps| {
            caps.is_wireless = false;
            caps.has_docking = false;
            caps.has_wearing_sensor = false;
        },
    },
    FamilyOverride {
        pattern: "C710",
        apply: wired_c7xx,
    },
    FamilyOverride {
        pattern: "C720",
        apply: wired_c7xx,
    },
    FamilyOverride {
        pattern: "BT300",
        apply: |caps| {
            caps.has_proximity = true;
            caps.has_mobile_caller_id = true;
            caps.has_mobile_call_state = true;
            caps.has_wearing_sensor = true;
            caps.has_docking = true;
            caps.is_wireless = true;
        },
    },
    FamilyOverride {
        pattern: "SAVI 7",
        apply: |caps| {
            caps.has_wearing_sensor = false;
            caps.has_multiline = true;
            caps.has_mobile_call_state = true;
            caps.has_docking = true;
            caps.is_wireless = true;
        },
    },
];

fn wired_c7xx(caps: &mut DeviceCapabilities) {
    caps.has_proximity = false;
    caps.has_mobile_caller_id = false;
    caps.has_wearing_sensor = true;
    caps.has_docking = false;
    caps.is_wireless = false;
}

/// Behavioural quirks of a product family that apply after resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FamilyQuirks {
    /// No direct docked query; docking is inferred from charge status
    pub docking_from_charge: bool,
    /// Never reports proximity even when registration succeeds
    pub no_proximity: bool,
    /// Never reports mobile caller id even when the mobile status request succeeds
    pub no_caller_id: bool,
}

impl FamilyQuirks {
    pub fn from_name(name: &str) -> Self {
        let name = name.to_uppercase();
        let wired_c7xx = name.contains("C710") || name.contains("C720");
        Self {
            docking_from_charge: name.contains("BT300"),
            no_proximity: wired_c7xx,
            no_caller_id: wired_c7xx || name.contains("BLACKWIRE") || name.contains("SAVI 7"),
        }
    }
}

// ============================================================================
// Capability table
// ============================================================================

/// Capability rows keyed by product id
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    rows: HashMap<u16, DeviceCapabilities>,
}

impl CapabilityTable {
    /// Empty table: every lookup falls through to the name heuristics
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse table contents, skipping comment and malformed rows
    pub fn parse(contents: &str) -> Self {
        let mut rows = HashMap::new();

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') || line.starts_with(',') {
                continue;
            }

            match parse_row(line) {
                Some(caps) => {
                    if let Some(id) = caps.product_id {
                        rows.insert(id, caps);
                    }
                }
                None => {
                    tracing::debug!(line = line_no + 1, "Skipping malformed capability row");
                }
            }
        }

        Self { rows }
    }

    /// Load the table from a file
    ///
    /// A missing file is not an error: it yields an empty table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CapabilityError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Capability table not found, using built-in family heuristics"
            );
            return Ok(Self::new());
        }

        let contents = fs::read_to_string(path).map_err(CapabilityError::IoError)?;
        let table = Self::parse(&contents);

        tracing::info!(
            path = %path.display(),
            devices = table.len(),
            "Capability table loaded"
        );

        Ok(table)
    }

    /// Load the table, logging and degrading to an empty table on error
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "Failed to read capability table, using built-in family heuristics"
                );
                Self::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn lookup(&self, product_id: u16) -> Option<&DeviceCapabilities> {
        self.rows.get(&product_id)
    }

    /// Resolve the capability profile of a device
    ///
    /// Table row if the product id is listed, otherwise the all-false profile
    /// with any matching family overrides applied.
    pub fn resolve(&self, product_id: u16, product_name: &str) -> DeviceCapabilities {
        if let Some(caps) = self.lookup(product_id) {
            tracing::info!(
                product_id = %format!("0x{:04X}", product_id),
                "Device found in capability table"
            );
            return caps.clone();
        }

        tracing::info!(
            product_id = %format!("0x{:04X}", product_id),
            name = product_name,
            "Device not in capability table, applying family heuristics"
        );

        let mut caps = DeviceCapabilities {
            product_id: Some(product_id),
            ..Default::default()
        };

        let name = product_name.to_uppercase();
        for family in FAMILY_OVERRIDES {
            if name.contains(family.pattern) {
                tracing::debug!(family = family.pattern, "Applying family capability override");
                (family.apply)(&mut caps);
            }
        }

        caps
    }
}

fn parse_row(line: &str) -> Option<DeviceCapabilities> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < ROW_FIELDS {
        return None;
    }

    let yes = |field: &str| field.eq_ignore_ascii_case("YES");

    Some(DeviceCapabilities {
        product_id: Some(parse_product_id(fields[0])?),
        has_proximity: yes(fields[2]),
        has_mobile_caller_id: yes(fields[3]),
        has_mobile_call_state: yes(fields[4]),
        has_docking: yes(fields[5]),
        has_wearing_sensor: yes(fields[6]),
        has_multiline: yes(fields[7]),
        is_wireless: yes(fields[8]),
    })
}

/// Parse a hex product id, with or without a `0x` prefix
pub fn parse_product_id(text: &str) -> Option<u16> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

// ============================================================================
// Error Types
// ============================================================================

/// Capability table error type
#[derive(Debug)]
pub enum CapabilityError {
    /// I/O error reading the table file
    IoError(std::io::Error),
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CapabilityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CapabilityError::IoError(e) => Some(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# ProductId,DeviceName,HasProximity,HasMobCallerId,HasMobCallState,HasDocking,HasWearingSensor,HasMultiline,IsWireless
1234,Test Headset,YES,YES,YES,YES,YES,NO,YES
ab1,Lowercase Id,no,yes,NO,NO,NO,NO,yes
,,,,,,,,
0x0415,Savi 740,NO,NO,YES,YES,NO,YES,YES
bogus,Bad Id,YES,YES,YES,YES,YES,YES,YES
C052,Too short,YES
";

    #[test]
    fn test_default_is_minimal() {
        let caps = DeviceCapabilities::default();
        assert!(caps.is_minimal());
        assert_eq!(caps.product_id, None);
    }

    #[test]
    fn test_parse_rows() {
        let table = CapabilityTable::parse(SAMPLE);
        assert_eq!(table.len(), 3);

        let caps = table.lookup(0x1234).unwrap();
        assert!(caps.has_proximity);
        assert!(caps.has_mobile_caller_id);
        assert!(caps.has_mobile_call_state);
        assert!(caps.has_docking);
        assert!(caps.has_wearing_sensor);
        assert!(!caps.has_multiline);
        assert!(caps.is_wireless);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = CapabilityTable::parse(SAMPLE);
        let caps = table.lookup(0x0AB1).unwrap();
        assert!(caps.has_mobile_caller_id);
        assert!(caps.is_wireless);
        assert!(!caps.has_proximity);

        assert!(table.lookup(0x0415).is_some());
    }

    #[test]
    fn test_comment_and_malformed_rows_skipped() {
        let table = CapabilityTable::parse(SAMPLE);
        assert!(table.lookup(0xC052).is_none());
        assert!(!table.is_empty());
    }

    #[test]
    fn test_resolve_table_match_wins_over_heuristics() {
        let table = CapabilityTable::parse(SAMPLE);
        // Name says Savi 7 (multiline), but the table row is authoritative
        let caps = table.resolve(0x1234, "Savi 7xx");
        assert!(!caps.has_multiline);
        assert!(caps.has_wearing_sensor);
        assert_eq!(caps.product_id, Some(0x1234));
    }

    #[test]
    fn test_resolve_family_fallbacks() {
        let table = CapabilityTable::new();

        let caps = table.resolve(0xAA10, "Plantronics BT300");
        assert!(caps.has_docking);
        assert!(caps.is_wireless);
        assert!(caps.has_proximity);
        assert!(!caps.has_multiline);

        let caps = table.resolve(0xC710, "Blackwire C710");
        assert!(!caps.is_wireless);
        assert!(!caps.has_docking);
        assert!(!caps.has_proximity);
        // C710 forces the wearing sensor back on after the Blackwire override
        assert!(caps.has_wearing_sensor);

        let caps = table.resolve(0x0420, "Savi 720");
        assert!(caps.has_multiline);
        assert!(caps.has_docking);
        assert!(!caps.has_wearing_sensor);
    }

    #[test]
    fn test_resolve_unknown_is_minimal() {
        let caps = CapabilityTable::new().resolve(0x9999, "Some Other Headset");
        assert!(caps.is_minimal());
        assert_eq!(caps.product_id, Some(0x9999));
    }

    #[test]
    fn test_set_reports_change() {
        let mut caps = DeviceCapabilities::default();
        assert!(caps.set(Capability::Multiline, true));
        assert!(!caps.set(Capability::Multiline, true));
        assert!(caps.get(Capability::Multiline));
        assert!(caps.set(Capability::Multiline, false));
    }

    #[test]
    fn test_family_quirks() {
        let quirks = FamilyQuirks::from_name("BT300 Legend");
        assert!(quirks.docking_from_charge);
        assert!(!quirks.no_caller_id);

        let quirks = FamilyQuirks::from_name("Blackwire C720");
        assert!(quirks.no_proximity);
        assert!(quirks.no_caller_id);
        assert!(!quirks.docking_from_charge);

        assert_eq!(FamilyQuirks::from_name("Voyager"), FamilyQuirks::default());
    }

    #[test]
    fn test_parse_product_id() {
        assert_eq!(parse_product_id("1234"), Some(0x1234));
        assert_eq!(parse_product_id("0xAB1"), Some(0x0AB1));
        assert_eq!(parse_product_id("0Xab1"), Some(0x0AB1));
        assert_eq!(parse_product_id("0x"), None);
        assert_eq!(parse_product_id("zz"), None);
        assert_eq!(parse_product_id("123456"), None);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = CapabilityTable::load(dir.path().join(CAPABILITIES_FILE)).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let table = CapabilityTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_load_or_empty_on_directory() {
        // Reading a directory as a file fails; the loader degrades instead of erroring
        let dir = tempfile::tempdir().unwrap();
        let table = CapabilityTable::load_or_empty(dir.path());
        assert!(table.is_empty());
    }

    #[test]
    fn test_windows_line_endings() {
        let table = CapabilityTable::parse("1234,Test,YES,NO,NO,NO,NO,NO,YES\r\n");
        assert!(table.lookup(0x1234).unwrap().is_wireless);
    }
}
