//! Subcommand implementations and the inputs they share.

pub mod info;
pub mod placement;
pub mod plan;
pub mod targets;

use std::path::Path;

use anyhow::Context;
use sharecall_abi::{Signature, TargetDesc};
use sharecall_engine::config::{load_target, resolve_target};
use sharecall_engine::EngineConfig;

/// Read a signature from a JSON file
pub fn load_signature(path: &Path) -> anyhow::Result<Signature> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let signature: Signature =
        serde_json::from_str(&text).with_context(|| format!("Invalid signature in {}", path.display()))?;
    signature
        .validate()
        .with_context(|| format!("Invalid signature in {}", path.display()))?;
    Ok(signature)
}

/// Target to classify for.
///
/// `--target-file` wins over `--target`, which wins over `SHARECALL_TARGET`;
/// the host preset is the fallback.
pub fn select_target(target_file: Option<&Path>, target: Option<&str>) -> anyhow::Result<TargetDesc> {
    if let Some(path) = target_file {
        return load_target(path).with_context(|| format!("Failed to load target file {}", path.display()));
    }
    if let Some(spec) = target {
        return resolve_target(spec).context("Failed to resolve --target");
    }
    Ok(EngineConfig::from_env()?.target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_target_wins_over_host() {
        let target = select_target(None, Some("generic64")).unwrap();
        assert_eq!(target.name, "generic64");
        assert!(select_target(None, Some("no-such-target")).is_err());
    }

    #[test]
    fn test_target_file_wins_over_name() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("signatures/arm-custom.toml");
        let target = select_target(Some(&path), Some("generic64")).unwrap();
        assert_eq!(target.name, "arm-custom");
        assert_eq!(target.int_arg_regs, 4);
    }

    #[test]
    fn test_bundled_signatures_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("signatures");
        for name in ["identity_u8.json", "sum_struct24.json", "virtual_method.json", "hfa_return.json"] {
            let signature = load_signature(&dir.join(name)).unwrap();
            assert!(signature.params.iter().any(|p| p.variable) || signature.ret.variable || signature.has_this);
        }
    }
}
