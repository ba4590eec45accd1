//! # Tracked Fields
//!
//! Every mutable templated field keeps its pre-change value so a rejected
//! change can be undone exactly. `Tracked<T>` holds the current value and,
//! once changed during a cycle, the original one.
//!
//! `ItemField` names every column the engine may rewrite on an item: the
//! seven templated text fields and the scalar configuration columns copied
//! verbatim from the prototype.

use crate::primitives::{
    ITEM_DESCRIPTION_LEN, ITEM_IPMI_SENSOR_LEN, ITEM_KEY_LEN, ITEM_NAME_LEN, ITEM_PARAM_LEN,
    ITEM_SNMP_OID_LEN, ITEM_UNITS_LEN,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// TRACKED VALUE
// =============================================================================

/// A value with an optional pre-change shadow.
///
/// Invariant: `original` is `Some` iff the value was changed during the
/// current cycle, and then it holds the value loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracked<T> {
    current: T,
    original: Option<T>,
}

impl<T: PartialEq> Tracked<T> {
    /// Wrap a value loaded from the store (or freshly synthesized).
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            current: value,
            original: None,
        }
    }

    /// The value as it will be persisted.
    #[must_use]
    pub const fn current(&self) -> &T {
        &self.current
    }

    /// The value loaded from the store, if it was changed since.
    #[must_use]
    pub const fn original(&self) -> Option<&T> {
        self.original.as_ref()
    }

    /// Whether the value differs from the stored one.
    #[must_use]
    pub const fn is_changed(&self) -> bool {
        self.original.is_some()
    }

    /// Assign a new value. Returns `true` if the value changed.
    ///
    /// The first change moves the stored value into the shadow; later
    /// changes keep that shadow so rollback always restores the stored value.
    pub fn set(&mut self, value: T) -> bool {
        if self.current == value {
            return false;
        }
        let previous = std::mem::replace(&mut self.current, value);
        if self.original.is_none() {
            self.original = Some(previous);
        }
        true
    }

    /// Restore the stored value. Returns `true` if anything was undone.
    pub fn rollback(&mut self) -> bool {
        match self.original.take() {
            Some(original) => {
                self.current = original;
                true
            }
            None => false,
        }
    }
}

impl<T> From<T> for Tracked<T> {
    fn from(value: T) -> Self {
        Self {
            current: value,
            original: None,
        }
    }
}

// =============================================================================
// ITEM FIELDS
// =============================================================================

/// A rewritable item column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemField {
    // Templated text fields.
    Name,
    Key,
    Units,
    Params,
    IpmiSensor,
    SnmpOid,
    Description,
    // Scalar configuration copied from the prototype.
    Type,
    ValueType,
    DataType,
    Delay,
    DelayFlex,
    History,
    Trends,
    TrapperHosts,
    Multiplier,
    Delta,
    Formula,
    Logtimefmt,
    ValuemapId,
    SnmpCommunity,
    Port,
    Snmpv3Securityname,
    Snmpv3Securitylevel,
    Snmpv3Authprotocol,
    Snmpv3Authpassphrase,
    Snmpv3Privprotocol,
    Snmpv3Privpassphrase,
    Snmpv3Contextname,
    Authtype,
    Username,
    Password,
    Publickey,
    Privatekey,
    InterfaceId,
}

/// Set of changed item columns.
pub type FieldSet = BTreeSet<ItemField>;

impl ItemField {
    /// Templated fields in validation order.
    pub const TEMPLATED: [Self; 7] = [
        Self::Name,
        Self::Key,
        Self::Units,
        Self::Params,
        Self::IpmiSensor,
        Self::SnmpOid,
        Self::Description,
    ];

    /// Whether the field is rendered from a prototype template.
    #[must_use]
    pub const fn is_templated(self) -> bool {
        matches!(
            self,
            Self::Name
                | Self::Key
                | Self::Units
                | Self::Params
                | Self::IpmiSensor
                | Self::SnmpOid
                | Self::Description
        )
    }

    /// Length limit for templated fields.
    #[must_use]
    pub const fn max_len(self) -> Option<usize> {
        match self {
            Self::Name => Some(ITEM_NAME_LEN),
            Self::Key => Some(ITEM_KEY_LEN),
            Self::Units => Some(ITEM_UNITS_LEN),
            Self::Params => Some(ITEM_PARAM_LEN),
            Self::IpmiSensor => Some(ITEM_IPMI_SENSOR_LEN),
            Self::SnmpOid => Some(ITEM_SNMP_OID_LEN),
            Self::Description => Some(ITEM_DESCRIPTION_LEN),
            _ => None,
        }
    }

    /// Whether rendered values of this field are trimmed.
    #[must_use]
    pub const fn is_trimmed(self) -> bool {
        !matches!(self, Self::Key | Self::IpmiSensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_records_original_once() {
        let mut name = Tracked::new("cpu".to_string());
        assert!(name.set("cpu load".to_string()));
        assert!(name.set("cpu load avg".to_string()));
        assert_eq!(name.current(), "cpu load avg");
        assert_eq!(name.original().map(String::as_str), Some("cpu"));
    }

    #[test]
    fn equal_value_is_not_a_change() {
        let mut units = Tracked::new("B".to_string());
        assert!(!units.set("B".to_string()));
        assert!(!units.is_changed());
    }

    #[test]
    fn rollback_restores_stored_value() {
        let mut key = Tracked::new("fs[/]".to_string());
        key.set("fs[/tmp]".to_string());
        assert!(key.rollback());
        assert_eq!(key.current(), "fs[/]");
        assert!(!key.is_changed());
        assert!(!key.rollback());
    }

    #[test]
    fn templated_fields_have_limits() {
        for field in ItemField::TEMPLATED {
            assert!(field.is_templated());
            assert!(field.max_len().is_some());
        }
        assert!(!ItemField::Delay.is_templated());
        assert_eq!(ItemField::Delay.max_len(), None);
    }

    #[test]
    fn key_and_sensor_are_not_trimmed() {
        assert!(!ItemField::Key.is_trimmed());
        assert!(!ItemField::IpmiSensor.is_trimmed());
        assert!(ItemField::Name.is_trimmed());
    }
}
