//! Engine configuration
//!
//! `EngineConfig::default()` targets the host with verification on.
//! `EngineConfig::from_env()` applies `SHARECALL_TARGET` (a preset name or a
//! `.toml` / `.json` target file) and `SHARECALL_VERIFY` on top of it.

use std::env;
use std::path::{Path, PathBuf};

use sharecall_abi::{PlacementError, TargetDesc};

/// Target override variable
pub const TARGET_ENV: &str = "SHARECALL_TARGET";
/// Verification override variable
pub const VERIFY_ENV: &str = "SHARECALL_VERIFY";

/// Error loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No preset has this name
    #[error("Unknown target preset '{0}'")]
    UnknownTarget(String),

    /// A target description file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML target description failed to parse
    #[error("Invalid TOML target description: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON target description failed to parse
    #[error("Invalid JSON target description: {0}")]
    Json(#[from] serde_json::Error),

    /// An environment variable holds an unusable value
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Rejected value
        value: String,
    },

    /// The description parsed but is not a usable target
    #[error(transparent)]
    Target(#[from] PlacementError),
}

/// Configuration for the adapter engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target whose conventions are bridged (default: host)
    pub target: TargetDesc,
    /// Verify every program before publishing it (default: true)
    pub verify_programs: bool,
    /// Maximum number of cached programs (default: 4096)
    pub max_programs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            target: TargetDesc::host(),
            verify_programs: true,
            max_programs: 4096,
        }
    }
}

impl EngineConfig {
    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let target = env::var(TARGET_ENV).ok();
        let verify = env::var(VERIFY_ENV).ok();
        apply_env_overrides(Self::default(), target.as_deref(), verify.as_deref())
    }

    /// Replace the target
    pub fn with_target(self, target: TargetDesc) -> Self {
        EngineConfig { target, ..self }
    }
}

/// Resolve a target given as a preset name or a path to a description file
pub fn resolve_target(spec: &str) -> Result<TargetDesc, ConfigError> {
    if let Some(preset) = TargetDesc::preset(spec) {
        return Ok(preset);
    }
    let path = Path::new(spec);
    if path.extension().is_some() {
        return load_target(path);
    }
    Err(ConfigError::UnknownTarget(spec.to_string()))
}

/// Load a target description from a `.json` file, or TOML otherwise
pub fn load_target(path: &Path) -> Result<TargetDesc, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    parse_target(&text, path.extension().and_then(|e| e.to_str()) == Some("json"))
}

/// Parse and validate a target description
pub fn parse_target(text: &str, json: bool) -> Result<TargetDesc, ConfigError> {
    let target: TargetDesc = if json { serde_json::from_str(text)? } else { toml::from_str(text)? };
    target.validate()?;
    Ok(target)
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value: value.to_string() }),
    }
}

fn apply_env_overrides(
    mut config: EngineConfig,
    target: Option<&str>,
    verify: Option<&str>,
) -> Result<EngineConfig, ConfigError> {
    if let Some(spec) = target.filter(|s| !s.is_empty()) {
        config.target = resolve_target(spec)?;
    }
    if let Some(value) = verify.filter(|s| !s.is_empty()) {
        config.verify_programs = parse_bool(VERIFY_ENV, value)?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharecall_abi::StackPacking;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.verify_programs);
        assert_eq!(config.max_programs, 4096);
        assert_eq!(config.target, TargetDesc::host());
    }

    #[test]
    fn test_env_overrides() {
        let config = apply_env_overrides(EngineConfig::default(), Some("apple-arm64"), Some("off")).unwrap();
        assert_eq!(config.target.stack_packing, StackPacking::Natural);
        assert!(!config.verify_programs);

        let config = apply_env_overrides(EngineConfig::default(), Some(""), None).unwrap();
        assert_eq!(config.target, TargetDesc::host());
    }

    #[test]
    fn test_bad_env_values() {
        assert!(matches!(
            apply_env_overrides(EngineConfig::default(), Some("vax"), None),
            Err(ConfigError::UnknownTarget(_))
        ));
        assert!(matches!(
            apply_env_overrides(EngineConfig::default(), None, Some("maybe")),
            Err(ConfigError::InvalidValue { var: VERIFY_ENV, .. })
        ));
    }

    #[test]
    fn test_parse_target_json_round_trip() {
        let text = serde_json::to_string(&TargetDesc::big_endian_64()).unwrap();
        assert_eq!(parse_target(&text, true).unwrap(), TargetDesc::big_endian_64());
    }

    #[test]
    fn test_parse_target_toml() {
        let text = r#"
            name = "apple-arm64"
            int_arg_regs = 8
            float_arg_regs = 8
            int_ret_regs = 2
            float_ret_regs = 4
            max_register_aggregate = 16
            max_register_return = 16
            max_hfa_elements = 4
            return_buffer = { kind = "dedicated_register", index = 8 }
            stack_packing = "natural"
            sub_slot = "low_address"
            frame_alignment = 16
        "#;
        assert_eq!(parse_target(text, false).unwrap(), TargetDesc::apple_arm64());
        assert!(matches!(parse_target("name = 1", false), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_parse_target_rejects_zero_frame_alignment() {
        let text = r#"
            name = "unaligned"
            int_arg_regs = 8
            float_arg_regs = 8
            int_ret_regs = 2
            float_ret_regs = 4
            max_register_aggregate = 16
            max_register_return = 16
            max_hfa_elements = 4
            return_buffer = { kind = "dedicated_register", index = 8 }
            stack_packing = "full_slots"
            sub_slot = "low_address"
            frame_alignment = 0
        "#;
        assert!(matches!(
            parse_target(text, false),
            Err(ConfigError::Target(PlacementError::InvalidTarget { .. }))
        ));
    }
}
