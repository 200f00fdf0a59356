pub mod calls;
pub mod check;
pub mod lower;

use std::path::Path;
use std::process;

use clap::Args;
use gpulower::config::{parse_bitwidth, LoweringOptions};

/// Flags shared by every command that runs the lowering.
#[derive(Args, Debug, Clone)]
pub struct LoweringArgs {
    /// Pass ranked kernel buffers as bare data pointers
    #[arg(long = "bare-ptr")]
    pub bare_ptr: bool,
    /// Kernel-module attribute holding the compiled binary
    #[arg(long, value_name = "NAME")]
    pub binary_annotation: Option<String>,
    /// Bit width of `index` and runtime size arguments (32 or 64)
    #[arg(long, value_name = "BITS", value_parser = parse_bitwidth)]
    pub index_bitwidth: Option<u32>,
    /// Pass options as `key=value` pairs, applied after the flags above
    #[arg(long, value_name = "OPTIONS")]
    pub pass_options: Option<String>,
}

/// Build lowering options from the command line.
pub fn resolve_options(args: &LoweringArgs) -> LoweringOptions {
    let mut options = LoweringOptions::default().with_bare_ptr_call_conv(args.bare_ptr);
    if let Some(name) = &args.binary_annotation {
        options = options.with_gpu_binary_annotation(name.clone());
    }
    if let Some(bits) = args.index_bitwidth {
        options = options.with_index_bitwidth(bits);
    }
    if let Some(text) = &args.pass_options {
        options = match options.apply(text) {
            Ok(options) => options,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        };
    }
    if let Err(e) = options.validate() {
        eprintln!("error: {}", e);
        process::exit(1);
    }
    options
}

/// Read an input file or exit with an error.
pub fn read_input(input: &Path) -> String {
    match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    }
}

/// Display name used in rendered diagnostics.
pub fn display_name(input: &Path) -> String {
    input.display().to_string()
}
