use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{display_name, read_input, resolve_options, LoweringArgs};

#[derive(Args)]
pub struct CheckArgs {
    /// Input IR file
    pub input: PathBuf,
    #[command(flatten)]
    pub lowering: LoweringArgs,
}

/// Parse the input and list the operations the lowering would rewrite.
pub fn cmd_check(args: CheckArgs) {
    let options = resolve_options(&args.lowering);
    let source = read_input(&args.input);
    let filename = display_name(&args.input);

    let module = match gpulower::parse_source(&source, &filename) {
        Ok(module) => module,
        Err(_) => process::exit(1),
    };

    let pending = gpulower::pending_conversions(&module, &options);
    for op in &pending {
        let line = source[..(op.span.start as usize).min(source.len())]
            .matches('\n')
            .count()
            + 1;
        println!("{}:{}: {}", filename, line, op.kind.name());
    }
    eprintln!("OK: {} ({} ops to convert)", filename, pending.len());
}
