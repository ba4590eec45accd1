//! # Entity Model
//!
//! In-memory representation of everything a discovery cycle touches:
//! prototypes (read-only), items and applications (mutated by every stage),
//! and item-application links.
//!
//! Items and applications live in arenas owned by the cycle (`Batch`); they
//! are addressed by `ItemHandle`/`ApplicationHandle` until the store assigns
//! ids.

use crate::field::{FieldSet, ItemField, Tracked};
use crate::types::{
    ApplicationId, ApplicationPrototypeId, ApplicationRef, DiscoveryId, ItemId, ItemRef, LinkId,
    PrototypeId, RowHandle, RuleId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// SCALAR CONFIGURATION
// =============================================================================

/// Scalar item configuration copied verbatim from the prototype.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemConfig {
    pub item_type: u8,
    pub value_type: u8,
    pub data_type: u8,
    pub delay: u32,
    pub delay_flex: String,
    pub history: u32,
    pub trends: u32,
    pub trapper_hosts: String,
    pub multiplier: u8,
    pub delta: u8,
    pub formula: String,
    pub logtimefmt: String,
    pub valuemap_id: u64,
    pub snmp_community: String,
    pub port: String,
    pub snmpv3_securityname: String,
    pub snmpv3_securitylevel: u8,
    pub snmpv3_authprotocol: u8,
    pub snmpv3_authpassphrase: String,
    pub snmpv3_privprotocol: u8,
    pub snmpv3_privpassphrase: String,
    pub snmpv3_contextname: String,
    pub authtype: u8,
    pub username: String,
    pub password: String,
    pub publickey: String,
    pub privatekey: String,
    pub interface_id: u64,
}

impl ItemConfig {
    /// Columns whose value differs between `self` (stored) and `target`.
    #[must_use]
    pub fn diff(&self, target: &Self) -> FieldSet {
        let mut changed = FieldSet::new();
        let mut check = |differs: bool, field: ItemField| {
            if differs {
                changed.insert(field);
            }
        };
        check(self.item_type != target.item_type, ItemField::Type);
        check(self.value_type != target.value_type, ItemField::ValueType);
        check(self.data_type != target.data_type, ItemField::DataType);
        check(self.delay != target.delay, ItemField::Delay);
        check(self.delay_flex != target.delay_flex, ItemField::DelayFlex);
        check(self.history != target.history, ItemField::History);
        check(self.trends != target.trends, ItemField::Trends);
        check(self.trapper_hosts != target.trapper_hosts, ItemField::TrapperHosts);
        check(self.multiplier != target.multiplier, ItemField::Multiplier);
        check(self.delta != target.delta, ItemField::Delta);
        check(self.formula != target.formula, ItemField::Formula);
        check(self.logtimefmt != target.logtimefmt, ItemField::Logtimefmt);
        check(self.valuemap_id != target.valuemap_id, ItemField::ValuemapId);
        check(self.snmp_community != target.snmp_community, ItemField::SnmpCommunity);
        check(self.port != target.port, ItemField::Port);
        check(
            self.snmpv3_securityname != target.snmpv3_securityname,
            ItemField::Snmpv3Securityname,
        );
        check(
            self.snmpv3_securitylevel != target.snmpv3_securitylevel,
            ItemField::Snmpv3Securitylevel,
        );
        check(
            self.snmpv3_authprotocol != target.snmpv3_authprotocol,
            ItemField::Snmpv3Authprotocol,
        );
        check(
            self.snmpv3_authpassphrase != target.snmpv3_authpassphrase,
            ItemField::Snmpv3Authpassphrase,
        );
        check(
            self.snmpv3_privprotocol != target.snmpv3_privprotocol,
            ItemField::Snmpv3Privprotocol,
        );
        check(
            self.snmpv3_privpassphrase != target.snmpv3_privpassphrase,
            ItemField::Snmpv3Privpassphrase,
        );
        check(
            self.snmpv3_contextname != target.snmpv3_contextname,
            ItemField::Snmpv3Contextname,
        );
        check(self.authtype != target.authtype, ItemField::Authtype);
        check(self.username != target.username, ItemField::Username);
        check(self.password != target.password, ItemField::Password);
        check(self.publickey != target.publickey, ItemField::Publickey);
        check(self.privatekey != target.privatekey, ItemField::Privatekey);
        check(self.interface_id != target.interface_id, ItemField::InterfaceId);
        changed
    }

    /// Copy the columns in `fields` from `source` into `self`.
    pub fn apply(&mut self, source: &Self, fields: &FieldSet) {
        for field in fields {
            match field {
                ItemField::Type => self.item_type = source.item_type,
                ItemField::ValueType => self.value_type = source.value_type,
                ItemField::DataType => self.data_type = source.data_type,
                ItemField::Delay => self.delay = source.delay,
                ItemField::DelayFlex => self.delay_flex.clone_from(&source.delay_flex),
                ItemField::History => self.history = source.history,
                ItemField::Trends => self.trends = source.trends,
                ItemField::TrapperHosts => self.trapper_hosts.clone_from(&source.trapper_hosts),
                ItemField::Multiplier => self.multiplier = source.multiplier,
                ItemField::Delta => self.delta = source.delta,
                ItemField::Formula => self.formula.clone_from(&source.formula),
                ItemField::Logtimefmt => self.logtimefmt.clone_from(&source.logtimefmt),
                ItemField::ValuemapId => self.valuemap_id = source.valuemap_id,
                ItemField::SnmpCommunity => self.snmp_community.clone_from(&source.snmp_community),
                ItemField::Port => self.port.clone_from(&source.port),
                ItemField::Snmpv3Securityname => {
                    self.snmpv3_securityname.clone_from(&source.snmpv3_securityname);
                }
                ItemField::Snmpv3Securitylevel => {
                    self.snmpv3_securitylevel = source.snmpv3_securitylevel;
                }
                ItemField::Snmpv3Authprotocol => {
                    self.snmpv3_authprotocol = source.snmpv3_authprotocol;
                }
                ItemField::Snmpv3Authpassphrase => {
                    self.snmpv3_authpassphrase
                        .clone_from(&source.snmpv3_authpassphrase);
                }
                ItemField::Snmpv3Privprotocol => {
                    self.snmpv3_privprotocol = source.snmpv3_privprotocol;
                }
                ItemField::Snmpv3Privpassphrase => {
                    self.snmpv3_privpassphrase
                        .clone_from(&source.snmpv3_privpassphrase);
                }
                ItemField::Snmpv3Contextname => {
                    self.snmpv3_contextname.clone_from(&source.snmpv3_contextname);
                }
                ItemField::Authtype => self.authtype = source.authtype,
                ItemField::Username => self.username.clone_from(&source.username),
                ItemField::Password => self.password.clone_from(&source.password),
                ItemField::Publickey => self.publickey.clone_from(&source.publickey),
                ItemField::Privatekey => self.privatekey.clone_from(&source.privatekey),
                ItemField::InterfaceId => self.interface_id = source.interface_id,
                ItemField::Name
                | ItemField::Key
                | ItemField::Units
                | ItemField::Params
                | ItemField::IpmiSensor
                | ItemField::SnmpOid
                | ItemField::Description => {}
            }
        }
    }
}

// =============================================================================
// PROTOTYPES
// =============================================================================

/// Templated text of an item: either prototype templates or rendered values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemText {
    pub name: String,
    pub key: String,
    pub units: String,
    pub params: String,
    pub ipmi_sensor: String,
    pub snmp_oid: String,
    pub description: String,
}

impl ItemText {
    /// Value of a templated field.
    #[must_use]
    pub fn get(&self, field: ItemField) -> Option<&str> {
        match field {
            ItemField::Name => Some(&self.name),
            ItemField::Key => Some(&self.key),
            ItemField::Units => Some(&self.units),
            ItemField::Params => Some(&self.params),
            ItemField::IpmiSensor => Some(&self.ipmi_sensor),
            ItemField::SnmpOid => Some(&self.snmp_oid),
            ItemField::Description => Some(&self.description),
            _ => None,
        }
    }

    /// Mutable access to a templated field.
    pub fn get_mut(&mut self, field: ItemField) -> Option<&mut String> {
        match field {
            ItemField::Name => Some(&mut self.name),
            ItemField::Key => Some(&mut self.key),
            ItemField::Units => Some(&mut self.units),
            ItemField::Params => Some(&mut self.params),
            ItemField::IpmiSensor => Some(&mut self.ipmi_sensor),
            ItemField::SnmpOid => Some(&mut self.snmp_oid),
            ItemField::Description => Some(&mut self.description),
            _ => None,
        }
    }
}

/// Static template for items, owned by a discovery rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPrototype {
    pub id: PrototypeId,
    pub rule_id: RuleId,
    pub templates: ItemText,
    /// Status given to newly created items.
    pub status: u8,
    pub config: ItemConfig,
}

/// Static template for applications, owned by a discovery rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPrototype {
    pub id: ApplicationPrototypeId,
    pub rule_id: RuleId,
    pub name: String,
}

/// Application membership configured on an item prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApplicationAssociation {
    /// Resolved per row through the application index.
    Prototype(ApplicationPrototypeId),
    /// A fixed, existing application.
    Application(ApplicationId),
}

// =============================================================================
// ITEMS
// =============================================================================

/// A discovered item as loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: ItemId,
    pub prototype_id: PrototypeId,
    /// Key template recorded when the item was created or last re-keyed.
    pub key_template: String,
    pub text: ItemText,
    pub config: ItemConfig,
    pub last_seen: i64,
    pub delete_at: i64,
}

/// An item under reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Zero until persistence assigns an id.
    pub id: ItemId,
    pub prototype_id: PrototypeId,
    /// Stored key template; empty for new items.
    pub key_template: String,
    pub name: Tracked<String>,
    pub key: Tracked<String>,
    pub units: Tracked<String>,
    pub params: Tracked<String>,
    pub ipmi_sensor: Tracked<String>,
    pub snmp_oid: Tracked<String>,
    pub description: Tracked<String>,
    pub last_seen: i64,
    pub delete_at: i64,
    pub discovered: bool,
    /// Columns that differ from the store.
    pub changed: FieldSet,
    /// Templated fields whose rendered bytes were not valid UTF-8.
    pub malformed: FieldSet,
    /// Row that produced the item this cycle.
    pub row: Option<RowHandle>,
}

impl Item {
    /// Wrap an item loaded from the store. Scalar configuration drift
    /// against `prototype` is recorded in the changed set right away.
    #[must_use]
    pub fn from_stored(stored: StoredItem, prototype: &ItemPrototype) -> Self {
        let changed = stored.config.diff(&prototype.config);
        let StoredItem {
            id,
            prototype_id,
            key_template,
            text,
            last_seen,
            delete_at,
            ..
        } = stored;
        Self {
            id,
            prototype_id,
            key_template,
            name: Tracked::new(text.name),
            key: Tracked::new(text.key),
            units: Tracked::new(text.units),
            params: Tracked::new(text.params),
            ipmi_sensor: Tracked::new(text.ipmi_sensor),
            snmp_oid: Tracked::new(text.snmp_oid),
            description: Tracked::new(text.description),
            last_seen,
            delete_at,
            discovered: false,
            changed,
            malformed: FieldSet::new(),
            row: None,
        }
    }

    /// A freshly synthesized item with no values yet.
    #[must_use]
    pub fn new(prototype_id: PrototypeId, row: RowHandle) -> Self {
        Self {
            id: ItemId(0),
            prototype_id,
            key_template: String::new(),
            name: Tracked::default(),
            key: Tracked::default(),
            units: Tracked::default(),
            params: Tracked::default(),
            ipmi_sensor: Tracked::default(),
            snmp_oid: Tracked::default(),
            description: Tracked::default(),
            last_seen: 0,
            delete_at: 0,
            discovered: true,
            changed: FieldSet::new(),
            malformed: FieldSet::new(),
            row: Some(row),
        }
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.id.is_unassigned()
    }

    /// The tracked value of a templated field.
    #[must_use]
    pub const fn field(&self, field: ItemField) -> Option<&Tracked<String>> {
        match field {
            ItemField::Name => Some(&self.name),
            ItemField::Key => Some(&self.key),
            ItemField::Units => Some(&self.units),
            ItemField::Params => Some(&self.params),
            ItemField::IpmiSensor => Some(&self.ipmi_sensor),
            ItemField::SnmpOid => Some(&self.snmp_oid),
            ItemField::Description => Some(&self.description),
            _ => None,
        }
    }

    /// Mutable access to a templated field.
    pub fn field_mut(&mut self, field: ItemField) -> Option<&mut Tracked<String>> {
        match field {
            ItemField::Name => Some(&mut self.name),
            ItemField::Key => Some(&mut self.key),
            ItemField::Units => Some(&mut self.units),
            ItemField::Params => Some(&mut self.params),
            ItemField::IpmiSensor => Some(&mut self.ipmi_sensor),
            ItemField::SnmpOid => Some(&mut self.snmp_oid),
            ItemField::Description => Some(&mut self.description),
            _ => None,
        }
    }

    /// Undo a rejected field change on an existing item.
    pub fn rollback(&mut self, field: ItemField) {
        if let Some(tracked) = self.field_mut(field) {
            tracked.rollback();
        }
        self.changed.remove(&field);
        self.malformed.remove(&field);
    }

    /// Current rendered text, as it will be persisted.
    #[must_use]
    pub fn text(&self) -> ItemText {
        ItemText {
            name: self.name.current().clone(),
            key: self.key.current().clone(),
            units: self.units.current().clone(),
            params: self.params.current().clone(),
            ipmi_sensor: self.ipmi_sensor.current().clone(),
            snmp_oid: self.snmp_oid.current().clone(),
            description: self.description.current().clone(),
        }
    }
}

// =============================================================================
// APPLICATIONS
// =============================================================================

/// Reconciliation state of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApplicationFlag {
    /// Matched to configuration in the current cycle.
    Discovered,
    /// The name is rewritten from the prototype template.
    NameChanged,
    /// A discovery record for this rule must be created.
    AddDiscoveryLink,
    /// Pseudo entry: delete this rule's discovery record.
    RemoveDiscoveryLink,
    /// Pseudo entry: delete the application.
    Remove,
}

/// Closed set of `ApplicationFlag`s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFlags(BTreeSet<ApplicationFlag>);

impl ApplicationFlags {
    pub fn of(flags: &[ApplicationFlag]) -> Self {
        Self(flags.iter().copied().collect())
    }

    #[must_use]
    pub fn contains(&self, flag: ApplicationFlag) -> bool {
        self.0.contains(&flag)
    }

    pub fn insert(&mut self, flag: ApplicationFlag) {
        self.0.insert(flag);
    }

    pub fn remove(&mut self, flag: ApplicationFlag) {
        self.0.remove(&flag);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the entry only carries a removal intent.
    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.contains(ApplicationFlag::Remove) || self.contains(ApplicationFlag::RemoveDiscoveryLink)
    }
}

/// An application discovered by this rule, as loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredApplication {
    pub id: ApplicationId,
    pub prototype_id: ApplicationPrototypeId,
    pub discovery_id: DiscoveryId,
    pub name: String,
    /// Name template recorded on the discovery record.
    pub name_template: String,
    pub last_seen: i64,
    pub delete_at: i64,
}

/// An application under reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: ApplicationId,
    pub prototype_id: ApplicationPrototypeId,
    pub discovery_id: DiscoveryId,
    pub name: Tracked<String>,
    pub name_template: String,
    pub last_seen: i64,
    pub delete_at: i64,
    pub flags: ApplicationFlags,
    /// The rendered name was not valid UTF-8.
    pub malformed: bool,
    pub row: Option<RowHandle>,
}

impl Application {
    #[must_use]
    pub fn from_stored(stored: StoredApplication) -> Self {
        Self {
            id: stored.id,
            prototype_id: stored.prototype_id,
            discovery_id: stored.discovery_id,
            name: Tracked::new(stored.name),
            name_template: stored.name_template,
            last_seen: stored.last_seen,
            delete_at: stored.delete_at,
            flags: ApplicationFlags::default(),
            malformed: false,
            row: None,
        }
    }

    /// A new application that needs both a row and a discovery record.
    #[must_use]
    pub fn new(prototype: &ApplicationPrototype, name: String, row: RowHandle) -> Self {
        Self {
            id: ApplicationId(0),
            prototype_id: prototype.id,
            discovery_id: DiscoveryId(0),
            name: Tracked::new(name),
            name_template: prototype.name.clone(),
            last_seen: 0,
            delete_at: 0,
            flags: ApplicationFlags::of(&[
                ApplicationFlag::AddDiscoveryLink,
                ApplicationFlag::Discovered,
            ]),
            malformed: false,
            row: Some(row),
        }
    }

    /// Pseudo entry deleting the application `id`.
    #[must_use]
    pub fn removal(id: ApplicationId) -> Self {
        Self {
            id,
            prototype_id: ApplicationPrototypeId(0),
            discovery_id: DiscoveryId(0),
            name: Tracked::default(),
            name_template: String::new(),
            last_seen: 0,
            delete_at: 0,
            flags: ApplicationFlags::of(&[ApplicationFlag::Remove]),
            malformed: false,
            row: None,
        }
    }

    /// Pseudo entry deleting this rule's discovery record of a shared application.
    #[must_use]
    pub fn discovery_removal(
        id: ApplicationId,
        prototype_id: ApplicationPrototypeId,
        discovery_id: DiscoveryId,
    ) -> Self {
        Self {
            id,
            prototype_id,
            discovery_id,
            name: Tracked::default(),
            name_template: String::new(),
            last_seen: 0,
            delete_at: 0,
            flags: ApplicationFlags::of(&[ApplicationFlag::RemoveDiscoveryLink]),
            malformed: false,
            row: None,
        }
    }

    #[must_use]
    pub fn is_discovered(&self) -> bool {
        self.flags.contains(ApplicationFlag::Discovered)
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.id.is_unassigned()
    }
}

// =============================================================================
// LINKS
// =============================================================================

/// A persisted item-application membership of this rule's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLink {
    pub id: LinkId,
    pub item_id: ItemId,
    pub application_id: ApplicationId,
}

/// Item-application membership under reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemApplicationLink {
    /// Zero for links created this cycle.
    pub id: LinkId,
    pub item: ItemRef,
    pub application: ApplicationRef,
    pub discovered: bool,
}
