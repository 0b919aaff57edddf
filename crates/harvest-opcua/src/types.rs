// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core value and configuration types for the collection engine.
//!
//! - **NodeId**: numeric and string node identifiers with text parsing
//! - **NodeConfig**: a configured collection point (`ns` + `id` + `label`)
//! - **ValueType** / **Variant** / **DataValue**: typed values as returned by reads
//! - **SecurityMode/Policy**: endpoint selection criteria
//! - **OpcUaConfig**: engine configuration with builder and validation
//!
//! # Examples
//!
//! ```
//! use harvest_opcua::types::{CollectionMode, NodeConfig, OpcUaConfig};
//!
//! let config = OpcUaConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .node(NodeConfig::string(2, "Temp").with_label("boiler.temp"))
//!     .mode(CollectionMode::Polling)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.nodes.len(), 1);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BrowseError, ConfigurationError, OpcUaError, OpcUaResult};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA Node Identifier.
///
/// Only the numeric and string identifier forms are supported. The text form
/// follows the OPC UA convention, omitting the namespace when it is zero.
///
/// # Examples
///
/// ```
/// use harvest_opcua::types::NodeId;
///
/// let parsed: NodeId = "ns=2;s=Boiler.Temp".parse().unwrap();
/// assert_eq!(parsed, NodeId::string(2, "Boiler.Temp"));
/// assert_eq!(NodeId::OBJECTS_FOLDER.to_string(), "i=85");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// The standard Objects folder (`i=85`).
    pub const OBJECTS_FOLDER: NodeId = NodeId::numeric(0, 85);

    /// The standard Views folder (`i=87`).
    pub const VIEWS_FOLDER: NodeId = NodeId::numeric(0, 87);

    /// Creates a numeric node ID.
    #[inline]
    pub const fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Returns `true` for numeric identifiers.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::Numeric(_))
    }

    /// Returns `true` for string identifiers.
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self.identifier, NodeIdentifier::String(_))
    }

    /// Returns the numeric value if this is a namespace 0 numeric node.
    ///
    /// DataType attributes reference standard types this way.
    pub fn standard_numeric(&self) -> Option<u32> {
        match self.identifier {
            NodeIdentifier::Numeric(v) if self.namespace_index == 0 => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses `ns=<n>;i=<u32>`, `ns=<n>;s=<text>`, `i=<u32>` or `s=<text>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| OpcUaError::browse(BrowseError::invalid_node_id(s, reason));

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace"))?;
                let ns: u16 = ns.parse().map_err(|_| invalid("Invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(id.parse().map_err(|_| invalid("Invalid numeric identifier"))?)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("Empty string identifier"));
            }
            NodeIdentifier::String(id.to_string())
        } else {
            return Err(invalid("Unknown identifier type. Expected i= or s="));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// Node identifier forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={v}"),
            Self::String(v) => write!(f, "s={v}"),
        }
    }
}

// =============================================================================
// NodeConfig
// =============================================================================

/// The `id` of a configured node: either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfiguredId {
    /// Numeric identifier in the configured namespace.
    Numeric(u32),
    /// String identifier, or a full node id text such as `ns=2;s=Temp`.
    Text(String),
}

/// A configured collection point.
///
/// ```yaml
/// nodes:
///   - ns: 2
///     id: "Temp"
///     label: "boiler.temp"
///   - id: "ns=3;i=1001"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Namespace index, used when `id` is not a full node id.
    #[serde(default)]
    pub ns: u16,

    /// Node identifier.
    pub id: ConfiguredId,

    /// Human label attached to every record of this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl NodeConfig {
    /// Creates a string-identified node.
    pub fn string(ns: u16, id: impl Into<String>) -> Self {
        Self {
            ns,
            id: ConfiguredId::Text(id.into()),
            label: None,
        }
    }

    /// Creates a numeric node.
    pub fn numeric(ns: u16, id: u32) -> Self {
        Self {
            ns,
            id: ConfiguredId::Numeric(id),
            label: None,
        }
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Resolves the configured identifier into a [`NodeId`].
    ///
    /// A text id that already carries an identifier prefix (`i=`, `s=`, or
    /// `ns=`) is parsed as a full node id and `ns` is ignored.
    pub fn node_id(&self) -> OpcUaResult<NodeId> {
        match &self.id {
            ConfiguredId::Numeric(v) => Ok(NodeId::numeric(self.ns, *v)),
            ConfiguredId::Text(text) => {
                let text = text.trim();
                if text.starts_with("ns=") || text.starts_with("i=") || text.starts_with("s=") {
                    text.parse()
                } else if text.is_empty() {
                    Err(OpcUaError::browse(BrowseError::invalid_node_id(
                        text,
                        "Empty node identifier",
                    )))
                } else {
                    Ok(NodeId::string(self.ns, text))
                }
            }
        }
    }
}

// =============================================================================
// AttributeId
// =============================================================================

/// Node attributes read by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    /// Browse name attribute.
    BrowseName,
    /// Display name attribute.
    DisplayName,
    /// Value attribute.
    Value,
    /// Data type attribute.
    DataType,
}

impl AttributeId {
    /// Returns the OPC UA numeric value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Value => 13,
            Self::DataType => 14,
        }
    }
}

// =============================================================================
// ValueType
// =============================================================================

/// Value type tag inferred from a node's DataType attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    Byte,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// String.
    String,
    /// DateTime or UtcTime.
    Time,
    /// Not a collectible scalar type.
    #[default]
    Unknown,
}

impl ValueType {
    /// Maps a standard DataType node id (namespace 0) to a value type.
    pub fn from_data_type_id(id: u32) -> Self {
        match id {
            1 => Self::Bool,
            2 => Self::Int8,
            3 => Self::Byte,
            4 => Self::Int16,
            5 => Self::UInt16,
            6 => Self::Int32,
            7 => Self::UInt32,
            8 => Self::Int64,
            9 => Self::UInt64,
            10 => Self::Float32,
            11 => Self::Float64,
            12 => Self::String,
            13 | 294 => Self::Time,
            _ => Self::Unknown,
        }
    }

    /// Infers the type from a DataType attribute read result.
    pub fn from_data_type_value(value: &DataValue) -> Self {
        if !value.status.is_good() {
            return Self::Unknown;
        }
        match &value.value {
            Variant::NodeId(node) => node
                .standard_numeric()
                .map(Self::from_data_type_id)
                .unwrap_or(Self::Unknown),
            _ => Self::Unknown,
        }
    }

    /// Returns the tag used in record field names, empty when unknown.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Time => "time",
            Self::Unknown => "",
        }
    }

    /// Returns `true` unless the type is unknown.
    #[inline]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A raw value as delivered by the protocol library.
///
/// Serializes to the natural JSON form of the contained value.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Variant {
    /// No value.
    #[default]
    Empty,
    /// Boolean.
    Boolean(bool),
    /// Signed 8-bit integer.
    SByte(i8),
    /// Unsigned 8-bit integer.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// String or localized text.
    String(String),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// Node id (DataType attribute values).
    NodeId(NodeId),
    /// Array of values.
    Array(Vec<Variant>),
}

impl Variant {
    /// Returns `true` for array values.
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Returns `true` for a scalar NaN float.
    pub fn is_scalar_nan(&self) -> bool {
        match self {
            Self::Double(v) => v.is_nan(),
            Self::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Returns the text of a string value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to a JSON value.
    ///
    /// Non-finite floats have no JSON representation and become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: StatusCode = StatusCode(0);
    /// BadNodeIdUnknown.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// BadNotReadable.
    pub const BAD_NOT_READABLE: StatusCode = StatusCode(0x803B_0000);
    /// BadAttributeIdInvalid.
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    /// BadMonitoredItemFilterInvalid.
    pub const BAD_MONITORED_ITEM_FILTER_INVALID: StatusCode = StatusCode(0x8041_0000);
    /// UncertainLastUsableValue.
    pub const UNCERTAIN_LAST_USABLE_VALUE: StatusCode = StatusCode(0x4090_0000);

    /// Returns `true` if the severity bits are Good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity bits are Bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the symbolic name.
    pub fn name(&self) -> &'static str {
        crate::error::status_code_name(self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// One attribute or value read result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// Status code of the read.
    pub status: StatusCode,
    /// Value, `Empty` on bad status.
    pub value: Variant,
    /// Source timestamp, if the server provided one.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value without timestamp.
    pub fn good(value: impl Into<Variant>) -> Self {
        Self {
            status: StatusCode::GOOD,
            value: value.into(),
            source_timestamp: None,
        }
    }

    /// Creates a value carrying only a bad status.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            status,
            value: Variant::Empty,
            source_timestamp: None,
        }
    }

    /// Sets the source timestamp.
    pub fn with_source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }
}

// =============================================================================
// SecurityMode
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "" | "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                "security_mode",
                format!("unknown security mode '{s}'"),
            ))),
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,

    /// Basic128Rsa15 (deprecated).
    Basic128Rsa15,

    /// Basic256 (deprecated).
    Basic256,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128Sha256RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256Sha256RsaPss",
        }
    }

    /// Creates from URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            s if s.ends_with("#None") => Some(Self::None),
            s if s.ends_with("#Basic128Rsa15") => Some(Self::Basic128Rsa15),
            s if s.ends_with("#Basic256") => Some(Self::Basic256),
            s if s.ends_with("#Basic256Sha256") => Some(Self::Basic256Sha256),
            s if s.contains("Aes128_Sha256_RsaOaep") => Some(Self::Aes128Sha256RsaOaep),
            s if s.contains("Aes256_Sha256_RsaPss") => Some(Self::Aes256Sha256RsaPss),
            _ => Option::None,
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }

        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "" | "none" => Ok(Self::None),
            "basic128rsa15" | "basic128" => Ok(Self::Basic128Rsa15),
            "basic256" => Ok(Self::Basic256),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" | "aes128" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" | "aes256" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                "security_policy",
                format!("unknown security policy '{s}'"),
            ))),
        }
    }
}

// =============================================================================
// CollectionMode
// =============================================================================

/// How values are collected. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    /// One batched read per trigger, bounded by the permit pool.
    Polling,

    /// A standing subscription fills a queue that each trigger drains.
    #[default]
    Streaming,
}

impl fmt::Display for CollectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => write!(f, "polling"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

impl FromStr for CollectionMode {
    type Err = OpcUaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(Self::Polling),
            "streaming" | "subscription" => Ok(Self::Streaming),
            other => Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                "mode",
                format!("unknown collection mode '{other}'"),
            ))),
        }
    }
}

// =============================================================================
// BrowseSettings
// =============================================================================

/// Address-space discovery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseSettings {
    /// Discover nodes by browsing instead of using the node list directly.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum traversal hops from a root. Zero disables the limit.
    #[serde(default)]
    pub max_level: usize,

    /// Maximum children visited per parent. Zero disables the limit.
    #[serde(default)]
    pub max_nodes_per_parent: usize,
}

// =============================================================================
// OutputSettings
// =============================================================================

/// Record shapes emitted for each sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Flat `state`/`created`/`node`/`<type>` fields.
    #[serde(default)]
    pub legacy: bool,

    /// `event.*`, `sensor.*` and `value.*` fields.
    #[serde(default = "default_true")]
    pub structured: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            legacy: false,
            structured: true,
        }
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Streaming subscription parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Sampling interval requested for every monitored item.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Server-side queue size per monitored item.
    #[serde(default = "default_item_queue_size")]
    pub item_queue_size: u32,

    /// Lifetime count.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Keep-alive count.
    #[serde(default = "default_keep_alive_count")]
    pub keep_alive_count: u32,

    /// Maximum notifications per publish (0 = unlimited).
    #[serde(default)]
    pub max_notifications_per_publish: u32,

    /// Subscription priority.
    #[serde(default)]
    pub priority: u8,

    /// Capacity of the pending sample queue drained by each trigger.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_item_queue_size() -> u32 {
    10
}

fn default_lifetime_count() -> u32 {
    60_000
}

fn default_keep_alive_count() -> u32 {
    100
}

fn default_queue_capacity() -> usize {
    50_000
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            sampling_interval: default_publishing_interval(),
            item_queue_size: default_item_queue_size(),
            lifetime_count: default_lifetime_count(),
            keep_alive_count: default_keep_alive_count(),
            max_notifications_per_publish: 0,
            priority: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

// =============================================================================
// OpcUaConfig
// =============================================================================

/// Engine configuration.
///
/// Field names accept the camel-case aliases used by older collector
/// configuration files (`retryOnError`, `maxThreads`, `securityMode`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Server endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Security policy used to select an endpoint.
    #[serde(default, alias = "policy")]
    pub security_policy: SecurityPolicy,

    /// Security mode used to select an endpoint.
    #[serde(default, alias = "securityMode")]
    pub security_mode: SecurityMode,

    /// Username for authentication. Anonymous when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for authentication.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Client certificate path.
    #[serde(default, alias = "clientCert", skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<String>,

    /// Client private key path.
    #[serde(default, alias = "clientKey", skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,

    /// Application name sent to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI. Derived from the name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    /// PKI directory holding own and trusted certificates.
    #[serde(default = "default_pki_dir")]
    pub pki_dir: String,

    /// Accept any server certificate. Use only against test servers.
    #[serde(default)]
    pub trust_server_certs: bool,

    /// Configured collection points.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Address-space discovery.
    #[serde(default)]
    pub browse: BrowseSettings,

    /// Polling or streaming.
    #[serde(default)]
    pub mode: CollectionMode,

    /// Maximum concurrent polling cycles.
    #[serde(default = "default_max_concurrent_cycles", alias = "maxThreads")]
    pub max_concurrent_cycles: usize,

    /// Connect attempts on the reconnect path.
    #[serde(default = "default_retry_on_error", alias = "retryOnError")]
    pub retry_on_error: u32,

    /// Connect attempts at startup.
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,

    /// Delay between connect attempts.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Delay before the reconnect path starts retrying.
    #[serde(default = "default_reconnect_backoff", with = "humantime_serde")]
    pub reconnect_backoff: Duration,

    /// Consecutive empty batches tolerated before a forced reconnect.
    #[serde(default = "default_stall_budget")]
    pub stall_budget: u32,

    /// Maximum age of cached values accepted by batched reads.
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,

    /// Streaming subscription parameters.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Record shapes.
    #[serde(default)]
    pub output: OutputSettings,
}

fn default_endpoint() -> String {
    "opc.tcp://localhost:4840".to_string()
}

fn default_application_name() -> String {
    "Harvest OPC UA Collector".to_string()
}

fn default_pki_dir() -> String {
    "pki".to_string()
}

fn default_max_concurrent_cycles() -> usize {
    50
}

fn default_retry_on_error() -> u32 {
    5
}

fn default_startup_attempts() -> u32 {
    1
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_reconnect_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_stall_budget() -> u32 {
    5
}

fn default_max_age() -> Duration {
    Duration::from_millis(2000)
}

impl OpcUaConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> OpcUaConfigBuilder {
        OpcUaConfigBuilder::default()
    }

    /// Creates a configuration with defaults and the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> OpcUaResult<()> {
        let invalid = |field: &str, reason: &str| {
            Err(OpcUaError::configuration(ConfigurationError::invalid_value(
                field, reason,
            )))
        };

        if self.endpoint.trim().is_empty() {
            return Err(OpcUaError::configuration(ConfigurationError::missing_field(
                "endpoint",
            )));
        }
        if !self.endpoint.starts_with("opc.tcp://") {
            return invalid("endpoint", "Endpoint must start with opc.tcp://");
        }
        if self.max_concurrent_cycles == 0 {
            return invalid("max_concurrent_cycles", "must be greater than 0");
        }
        if self.retry_on_error == 0 {
            return invalid("retry_on_error", "must be greater than 0");
        }
        if self.startup_attempts == 0 {
            return invalid("startup_attempts", "must be greater than 0");
        }
        if self.stall_budget == 0 {
            return invalid("stall_budget", "must be greater than 0");
        }
        if self.subscription.queue_capacity == 0 {
            return invalid("subscription.queue_capacity", "must be greater than 0");
        }
        if !self.browse.enabled && self.nodes.is_empty() {
            return Err(OpcUaError::configuration(ConfigurationError::conflict(
                "no nodes configured and browsing is disabled",
            )));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(OpcUaError::configuration(ConfigurationError::conflict(
                "password is set without a username",
            )));
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(OpcUaError::configuration(ConfigurationError::conflict(
                "client_cert and client_key must be set together",
            )));
        }
        if !self.output.legacy && !self.output.structured {
            return Err(OpcUaError::configuration(ConfigurationError::conflict(
                "at least one output shape must be enabled",
            )));
        }
        for node in &self.nodes {
            node.node_id()?;
        }

        Ok(())
    }

    /// Returns the effective application URI.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri.clone().unwrap_or_else(|| {
            format!(
                "urn:harvest:opcua:{}",
                self.application_name.replace(' ', "")
            )
        })
    }
}

impl Default for OpcUaConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            security_policy: SecurityPolicy::default(),
            security_mode: SecurityMode::default(),
            username: None,
            password: None,
            client_cert: None,
            client_key: None,
            application_name: default_application_name(),
            application_uri: None,
            pki_dir: default_pki_dir(),
            trust_server_certs: false,
            nodes: Vec::new(),
            browse: BrowseSettings::default(),
            mode: CollectionMode::default(),
            max_concurrent_cycles: default_max_concurrent_cycles(),
            retry_on_error: default_retry_on_error(),
            startup_attempts: default_startup_attempts(),
            retry_delay: default_retry_delay(),
            reconnect_backoff: default_reconnect_backoff(),
            stall_budget: default_stall_budget(),
            max_age: default_max_age(),
            subscription: SubscriptionSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

// =============================================================================
// OpcUaConfigBuilder
// =============================================================================

/// Builder for [`OpcUaConfig`].
#[derive(Debug, Default)]
pub struct OpcUaConfigBuilder {
    config: OpcUaConfig,
}

impl OpcUaConfigBuilder {
    /// Sets the server endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Sets the security policy and mode.
    pub fn security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        self.config.security_policy = policy;
        self.config.security_mode = mode;
        self
    }

    /// Sets username/password authentication.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Sets the client certificate and key paths.
    pub fn client_certificate(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.client_cert = Some(cert.into());
        self.config.client_key = Some(key.into());
        self
    }

    /// Adds a configured node.
    pub fn node(mut self, node: NodeConfig) -> Self {
        self.config.nodes.push(node);
        self
    }

    /// Sets the collection mode.
    pub fn mode(mut self, mode: CollectionMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Enables browsing with the given limits.
    pub fn browse(mut self, max_level: usize, max_nodes_per_parent: usize) -> Self {
        self.config.browse = BrowseSettings {
            enabled: true,
            max_level,
            max_nodes_per_parent,
        };
        self
    }

    /// Sets the maximum concurrent polling cycles.
    pub fn max_concurrent_cycles(mut self, max: usize) -> Self {
        self.config.max_concurrent_cycles = max;
        self
    }

    /// Sets the reconnect retry budget.
    pub fn retry_on_error(mut self, attempts: u32) -> Self {
        self.config.retry_on_error = attempts;
        self
    }

    /// Sets the startup connect attempts.
    pub fn startup_attempts(mut self, attempts: u32) -> Self {
        self.config.startup_attempts = attempts;
        self
    }

    /// Sets the delay between connect attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Sets the reconnect backoff.
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.config.reconnect_backoff = backoff;
        self
    }

    /// Sets the stall budget.
    pub fn stall_budget(mut self, budget: u32) -> Self {
        self.config.stall_budget = budget;
        self
    }

    /// Sets the output shapes.
    pub fn output(mut self, legacy: bool, structured: bool) -> Self {
        self.config.output = OutputSettings { legacy, structured };
        self
    }

    /// Sets the subscription parameters.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> OpcUaResult<OpcUaConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// humantime_serde helper
// =============================================================================

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
