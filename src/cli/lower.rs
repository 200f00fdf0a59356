use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{display_name, read_input, resolve_options, LoweringArgs};

#[derive(Args)]
pub struct LowerArgs {
    /// Input IR file
    pub input: PathBuf,
    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub lowering: LoweringArgs,
}

pub fn cmd_lower(args: LowerArgs) {
    let options = resolve_options(&args.lowering);
    let source = read_input(&args.input);
    let filename = display_name(&args.input);

    let (module, stats) = match gpulower::lower_file_source(&source, &filename, &options) {
        Ok(lowered) => lowered,
        Err(_) => process::exit(1),
    };
    tracing::debug!(
        sweeps = stats.sweeps,
        converted = stats.converted,
        "lowered {}",
        filename
    );

    let text = module.to_string();
    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!(
                "Lowered {} -> {} ({} ops converted)",
                filename,
                path.display(),
                stats.converted
            );
        }
        None => print!("{}", text),
    }
}
