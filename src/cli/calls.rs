use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{display_name, read_input, resolve_options, LoweringArgs};

#[derive(Args)]
pub struct CallsArgs {
    /// Input IR file
    pub input: PathBuf,
    /// Only show this function
    #[arg(long, value_name = "NAME")]
    pub func: Option<String>,
    #[command(flatten)]
    pub lowering: LoweringArgs,
}

/// Print the runtime calls each function makes after lowering.
pub fn cmd_calls(args: CallsArgs) {
    let options = resolve_options(&args.lowering);
    let source = read_input(&args.input);
    let filename = display_name(&args.input);

    let (module, _) = match gpulower::lower_file_source(&source, &filename, &options) {
        Ok(lowered) => lowered,
        Err(_) => process::exit(1),
    };

    let funcs: Vec<&str> = match &args.func {
        Some(name) => {
            if module.func(name).is_none() {
                eprintln!("error: no function '@{}' in '{}'", name, filename);
                process::exit(1);
            }
            vec![name.as_str()]
        }
        None => module.funcs.iter().map(|f| f.name.as_str()).collect(),
    };
    for name in funcs {
        println!("@{}:", name);
        for callee in module.call_trace(name) {
            println!("  {}", callee);
        }
    }
}
