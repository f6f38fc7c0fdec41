//! `sharecall info`: build and environment details.

use sharecall_abi::TargetDesc;
use sharecall_engine::config::{TARGET_ENV, VERIFY_ENV};

use crate::logging::LOG_ENV;
use crate::output::StyledOutput;

pub fn execute(out: &mut StyledOutput) -> anyhow::Result<()> {
    out.heading(&format!("sharecall v{}", env!("CARGO_PKG_VERSION")));
    out.newline();
    out.field("Platform:", &format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH));
    out.field("Host target:", &TargetDesc::host().name);
    out.field("Native stubs:", native_stubs());
    out.newline();

    out.heading("Environment:");
    for var in [TARGET_ENV, VERIFY_ENV, LOG_ENV] {
        let value = std::env::var(var).unwrap_or_else(|_| "(not set)".to_string());
        out.field(&format!("  {}", var), &value);
    }
    out.flush();
    Ok(())
}

#[cfg(feature = "jit")]
fn native_stubs() -> &'static str {
    match sharecall_engine::jit::host_isa() {
        Ok(_) => "available (Cranelift)",
        Err(_) => "unsupported host",
    }
}

#[cfg(not(feature = "jit"))]
fn native_stubs() -> &'static str {
    "disabled (build with --features jit)"
}
