//! `sharecall plan`: build and print the adapter program for a crossing.

use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use sharecall_engine::{AdapterEngine, AdapterKey, CallTarget, Direction, EngineConfig, FrameInvoker};

use crate::output::StyledOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    /// Shared-convention caller, normal-convention callee
    NormalToShared,
    /// Normal-convention caller, shared-convention callee
    SharedToNormal,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::NormalToShared => Direction::NormalToShared,
            DirectionArg::SharedToNormal => Direction::SharedToNormal,
        }
    }
}

pub struct PlanOptions<'a> {
    pub signature: &'a Path,
    pub direction: DirectionArg,
    pub target: Option<&'a str>,
    pub target_file: Option<&'a Path>,
    pub virtual_offset: Option<i32>,
    pub delegate_offset: Option<i32>,
    pub indirect: bool,
    pub both: bool,
}

impl PlanOptions<'_> {
    fn call_target(&self) -> CallTarget {
        if let Some(offset) = self.virtual_offset {
            CallTarget::Virtual { offset }
        } else if let Some(offset) = self.delegate_offset {
            CallTarget::DelegateInvoke { offset }
        } else if self.indirect {
            CallTarget::Indirect
        } else {
            // Placeholder address; programs are printed, never run
            CallTarget::Direct(0)
        }
    }
}

pub fn execute(options: PlanOptions<'_>, out: &mut StyledOutput) -> anyhow::Result<()> {
    let signature = super::load_signature(options.signature)?;
    let target = super::select_target(options.target_file, options.target)?;
    let engine = AdapterEngine::with_config(EngineConfig::from_env()?.with_target(target), Arc::new(FrameInvoker));

    let first = Direction::from(options.direction);
    let directions = if options.both { vec![first, first.reverse()] } else { vec![first] };

    out.field("Target:", &engine.config().target.name);
    out.field("Signature:", &options.signature.display().to_string());

    for direction in directions {
        let key = AdapterKey { signature: signature.clone(), direction, target: options.call_target() };
        let (caller, callee) = engine.call_infos(&key.signature, direction)?;

        out.newline();
        out.heading(&format!("Caller ({})", caller.convention));
        out.block(&caller.to_string());
        out.heading(&format!("Callee ({})", callee.convention));
        out.block(&callee.to_string());
        out.newline();

        let program = engine.build(&key)?;
        out.block(&program.to_string());
        if program.moves.is_empty() && program.return_area.is_none() {
            out.dim("  (no moves)");
            out.newline();
        }
        if engine.config().verify_programs {
            out.success("verified");
        } else {
            out.warning("not verified (SHARECALL_VERIFY=0)");
        }
        out.newline();
    }
    out.flush();
    Ok(())
}
