//! `sharecall placement`: classify a signature under one convention.

use std::path::Path;

use clap::ValueEnum;
use sharecall_abi::{CallPlacement, Classifier, ConventionTag};

use crate::output::StyledOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConventionArg {
    Normal,
    Shared,
}

impl From<ConventionArg> for ConventionTag {
    fn from(arg: ConventionArg) -> Self {
        match arg {
            ConventionArg::Normal => ConventionTag::Normal,
            ConventionArg::Shared => ConventionTag::Shared,
        }
    }
}

pub struct PlacementOptions<'a> {
    pub signature: &'a Path,
    pub convention: ConventionArg,
    pub target: Option<&'a str>,
    pub target_file: Option<&'a Path>,
    pub json: bool,
}

pub fn execute(options: PlacementOptions<'_>, out: &mut StyledOutput) -> anyhow::Result<()> {
    let signature = super::load_signature(options.signature)?;
    let target = super::select_target(options.target_file, options.target)?;
    let convention = ConventionTag::from(options.convention);
    tracing::debug!(target_name = %target.name, %convention, "classifying signature");

    let info = Classifier::new(target.clone()).compute_call_info(&signature, convention)?;

    if options.json {
        out.plain(&serde_json::to_string_pretty(&info)?);
        out.newline();
    } else {
        out.field("Target:", &target.name);
        out.field("Signature:", &options.signature.display().to_string());
        out.newline();
        out.block(&info.to_string());
    }
    out.flush();
    Ok(())
}
