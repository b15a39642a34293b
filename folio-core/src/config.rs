//! Configuration types
//!
//! Settings are read once at startup. Every field has a default so an empty
//! TOML document yields a working configuration.
//!
//! ```toml
//! max_payload_bytes = 16777216
//!
//! [serializers]
//! document = "messagepack"
//! media = "messagepack"
//! member = "json"
//!
//! [compression]
//! compressed_editors = ["Umbraco.RichText", "Umbraco.BlockList"]
//!
//! [hybrid]
//! local_capacity = 10000
//! local_ttl_secs = 300
//! distributed_path = "/var/cache/folio"
//! distributed_max_size_mb = 1024
//! ```

use crate::{ConfigError, EntityKind, SerializerEntityType, SerializerKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_LOCAL_CAPACITY: usize = 10_000;
const DEFAULT_LOCAL_TTL_SECS: u64 = 300;
const DEFAULT_DISTRIBUTED_MAX_SIZE_MB: usize = 1024;
const DEFAULT_COMPRESSION_THRESHOLD: usize = 64;

/// Wire format per entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerSettings {
    pub document: SerializerKind,
    pub media: SerializerKind,
    pub member: SerializerKind,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            document: SerializerKind::MessagePack,
            media: SerializerKind::MessagePack,
            member: SerializerKind::MessagePack,
        }
    }
}

impl SerializerSettings {
    /// Every entity kind uses the same format.
    pub fn uniform(kind: SerializerKind) -> Self {
        Self {
            document: kind,
            media: kind,
            member: kind,
        }
    }

    /// Format configured for a single entity kind.
    pub fn kind_for(&self, kind: EntityKind) -> SerializerKind {
        match kind {
            EntityKind::Document => self.document,
            EntityKind::Media => self.media,
            EntityKind::Member => self.member,
        }
    }

    /// Resolve the single format serving every kind in `types`.
    ///
    /// Fails when `types` is empty or when its members disagree.
    pub fn resolve(&self, types: SerializerEntityType) -> Result<SerializerKind, ConfigError> {
        let mut resolved: Option<(EntityKind, SerializerKind)> = None;
        for kind in types.kinds() {
            let format = self.kind_for(kind);
            match resolved {
                None => resolved = Some((kind, format)),
                Some((first_kind, first_format)) if first_format != format => {
                    return Err(ConfigError::IncompatibleOptions {
                        option_a: format!("serializers.{first_kind} = {first_format:?}"),
                        option_b: format!("serializers.{kind} = {format:?}"),
                    });
                }
                Some(_) => {}
            }
        }
        resolved
            .map(|(_, format)| format)
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "serializer entity type".to_string(),
            })
    }
}

/// Per-property compression of stored values (binary format only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Property editor aliases whose text values are stored compressed.
    pub compressed_editors: Vec<String>,
    /// Text shorter than this is never compressed.
    pub min_value_bytes: usize,
    /// Payloads shorter than this are stored without block compression.
    pub envelope_threshold_bytes: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            compressed_editors: Vec::new(),
            min_value_bytes: DEFAULT_COMPRESSION_THRESHOLD,
            envelope_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

/// Two-tier cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridCacheSettings {
    /// Maximum entries kept in the in-process tier.
    pub local_capacity: usize,
    /// Seconds an in-process entry stays valid before it is re-read from the
    /// distributed tier.
    pub local_ttl_secs: u64,
    /// Directory of the LMDB distributed tier. `None` keeps it in memory.
    pub distributed_path: Option<PathBuf>,
    pub distributed_max_size_mb: usize,
}

impl Default for HybridCacheSettings {
    fn default() -> Self {
        Self {
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            local_ttl_secs: DEFAULT_LOCAL_TTL_SECS,
            distributed_path: None,
            distributed_max_size_mb: DEFAULT_DISTRIBUTED_MAX_SIZE_MB,
        }
    }
}

impl HybridCacheSettings {
    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_secs)
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub serializers: SerializerSettings,
    pub compression: CompressionSettings,
    pub hybrid: HybridCacheSettings,
    /// Largest decompressed payload a decoder will inflate.
    pub max_payload_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            serializers: SerializerSettings::default(),
            compression: CompressionSettings::default(),
            hybrid: HybridCacheSettings::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl CacheSettings {
    /// Parse and validate settings from a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let settings: CacheSettings = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_bytes".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.max_payload_bytes > u32::MAX as usize {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_bytes".to_string(),
                value: self.max_payload_bytes.to_string(),
                reason: "must fit the 32-bit envelope length".to_string(),
            });
        }
        if self.hybrid.local_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hybrid.local_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.hybrid.distributed_path.is_some() && self.hybrid.distributed_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hybrid.distributed_max_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be positive when distributed_path is set".to_string(),
            });
        }
        if !self.compression.compressed_editors.is_empty()
            && [
                self.serializers.document,
                self.serializers.media,
                self.serializers.member,
            ]
            .iter()
            .all(|kind| *kind == SerializerKind::Json)
        {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "compression.compressed_editors".to_string(),
                option_b: "serializers = json".to_string(),
            });
        }
        Ok(())
    }
}
