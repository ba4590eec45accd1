//! # Innate Primitives
//!
//! Fixed limits and constants of the discovery engine. These mirror the
//! column sizes of the monitoring database and are compiled into the binary.

// =============================================================================
// FIELD LENGTH LIMITS (in Unicode scalar values)
// =============================================================================

/// Maximum item name length.
pub const ITEM_NAME_LEN: usize = 255;

/// Maximum item key length.
pub const ITEM_KEY_LEN: usize = 255;

/// Maximum item units length.
pub const ITEM_UNITS_LEN: usize = 255;

/// Maximum item parameters length (scripts, formulas).
pub const ITEM_PARAM_LEN: usize = 65_535;

/// Maximum IPMI sensor length.
pub const ITEM_IPMI_SENSOR_LEN: usize = 128;

/// Maximum SNMP OID length.
pub const ITEM_SNMP_OID_LEN: usize = 512;

/// Maximum item description length.
pub const ITEM_DESCRIPTION_LEN: usize = 65_535;

/// Maximum application name length.
pub const APPLICATION_NAME_LEN: usize = 255;

// =============================================================================
// SUBSTITUTION
// =============================================================================

/// Characters trimmed from both ends of trimmed fields after substitution.
pub const TRIM_CHARS: &[char] = &[' ', '\t', '\r', '\n'];

/// Item type whose parameters hold a calculated formula.
pub const ITEM_TYPE_CALCULATED: u8 = 15;

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Seconds in a day; lifetimes are configured in days.
pub const SEC_PER_DAY: i64 = 86_400;

/// Largest accepted lifetime (ten years).
pub const MAX_LIFETIME_DAYS: u16 = 3650;

// =============================================================================
// SNAPSHOT FORMAT
// =============================================================================

/// Magic bytes for the catalog snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"LLDS";

/// Current snapshot format version.
pub const FORMAT_VERSION: u8 = 1;
