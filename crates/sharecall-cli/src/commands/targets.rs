//! `sharecall targets`: list target presets.

use sharecall_abi::{ReturnBufferPlacement, StackPacking, SubSlotPlacement, TargetDesc};

use crate::output::StyledOutput;

pub fn execute(json: bool, out: &mut StyledOutput) -> anyhow::Result<()> {
    let presets = TargetDesc::presets();
    if json {
        out.plain(&serde_json::to_string_pretty(&presets)?);
        out.newline();
        out.flush();
        return Ok(());
    }

    let host = TargetDesc::host();
    for target in &presets {
        out.success(&format!("{:<16}", target.name));
        out.plain(&summary(target));
        if target.name == host.name {
            out.dim("  (host)");
        }
        out.newline();
    }
    out.flush();
    Ok(())
}

fn summary(target: &TargetDesc) -> String {
    let retbuf = match target.return_buffer {
        ReturnBufferPlacement::DedicatedRegister { index } => format!("r{}", index),
        ReturnBufferPlacement::FirstArgument => "arg0".to_string(),
    };
    let packing = match target.stack_packing {
        StackPacking::FullSlots => "full",
        StackPacking::Natural => "natural",
    };
    let sub_slot = match target.sub_slot {
        SubSlotPlacement::LowAddress => "low",
        SubSlotPlacement::HighAddress => "high",
    };
    format!(
        "int {}/{}  float {}/{}  hfa {}  retbuf {}  stack {}  sub-slot {}",
        target.int_arg_regs,
        target.int_ret_regs,
        target.float_arg_regs,
        target.float_ret_regs,
        target.max_hfa_elements,
        retbuf,
        packing,
        sub_slot
    )
}
