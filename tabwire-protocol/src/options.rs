//! Write options and the format option resolver.
//!
//! Resolution order, evaluated once when a writer is built:
//!
//! 1. explicit options together with a legacy flag is an error
//! 2. explicit options are validated and used as given
//! 3. otherwise framing comes from the legacy flag, falling back to the
//!    configured default, and the metadata version is V4 when configured
//!    for legacy metadata, V5 otherwise
//!
//! [`FormatConfig`] carries the deployment-wide defaults. It is normally
//! built from the environment, but the resolver only ever sees the value.

use crate::error::UsageError;
use crate::frame::FramingEpoch;
use crate::message::MetadataVersion;

/// Environment variable selecting legacy framing by default.
pub const LEGACY_FORMAT_ENV: &str = "ARROW_PRE_0_15_IPC_FORMAT";

/// Environment variable selecting V4 metadata by default.
pub const LEGACY_METADATA_ENV: &str = "ARROW_PRE_1_0_METADATA_VERSION";

/// Options fixed for the lifetime of one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub legacy_framing: bool,
    pub metadata_version: MetadataVersion,
    /// Send extended dictionaries as deltas instead of replacements.
    pub emit_dictionary_deltas: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            legacy_framing: false,
            metadata_version: MetadataVersion::V5,
            emit_dictionary_deltas: true,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_legacy_framing(mut self, legacy: bool) -> Self {
        self.legacy_framing = legacy;
        self
    }

    pub fn with_metadata_version(mut self, version: MetadataVersion) -> Self {
        self.metadata_version = version;
        self
    }

    pub fn with_dictionary_deltas(mut self, emit: bool) -> Self {
        self.emit_dictionary_deltas = emit;
        self
    }

    /// Rejects metadata versions this implementation cannot write.
    pub fn validate(&self) -> Result<(), UsageError> {
        if !self.metadata_version.is_supported() {
            return Err(UsageError::UnsupportedWriteVersion(self.metadata_version));
        }
        Ok(())
    }

    pub fn epoch(&self) -> FramingEpoch {
        if self.legacy_framing {
            FramingEpoch::Legacy
        } else {
            FramingEpoch::Current
        }
    }
}

/// Deployment-wide format defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatConfig {
    pub legacy_framing: bool,
    pub legacy_metadata_version: bool,
}

impl FormatConfig {
    /// Reads the defaults from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the defaults through `lookup`. Only the value `"1"` enables a
    /// setting.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = |key: &str| lookup(key).map(|v| v == "1").unwrap_or(false);
        Self {
            legacy_framing: enabled(LEGACY_FORMAT_ENV),
            legacy_metadata_version: enabled(LEGACY_METADATA_ENV),
        }
    }
}

/// Resolves the options for one writer.
pub fn resolve_write_options(
    options: Option<WriteOptions>,
    use_legacy_format: Option<bool>,
    config: &FormatConfig,
) -> Result<WriteOptions, UsageError> {
    match (options, use_legacy_format) {
        (Some(_), Some(_)) => Err(UsageError::ConflictingOptions),
        (Some(options), None) => {
            options.validate()?;
            Ok(options)
        }
        (None, legacy) => {
            let metadata_version = if config.legacy_metadata_version {
                MetadataVersion::V4
            } else {
                MetadataVersion::V5
            };
            Ok(WriteOptions {
                legacy_framing: legacy.unwrap_or(config.legacy_framing),
                metadata_version,
                ..WriteOptions::default()
            })
        }
    }
}
