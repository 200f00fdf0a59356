pub mod config;
pub mod diagnostic;
pub mod ir;
pub mod lower;
pub mod span;
pub mod syntax;

pub use config::{ConfigError, LoweringOptions};
pub use diagnostic::{render_diagnostics, Diagnostic};
pub use ir::Module;
pub use lower::{lower_module, pending_conversions, LoweringError, LoweringStats};

/// Parse textual IR, rendering any errors to stderr.
pub fn parse_source(source: &str, filename: &str) -> Result<Module, Vec<Diagnostic>> {
    match syntax::parse_module(source) {
        Ok(module) => Ok(module),
        Err(errors) => {
            render_diagnostics(&errors, filename, source);
            Err(errors)
        }
    }
}

/// Parse and lower textual IR without rendering anything.
pub fn lower_source(source: &str, options: &LoweringOptions) -> Result<Module, Vec<Diagnostic>> {
    let module = syntax::parse_module(source)?;
    lower_module(module, options).map_err(|err| err.diagnostics())
}

/// Parse and lower textual IR, rendering any errors to stderr.
pub fn lower_file_source(
    source: &str,
    filename: &str,
    options: &LoweringOptions,
) -> Result<(Module, LoweringStats), Vec<Diagnostic>> {
    let module = parse_source(source, filename)?;
    match lower::lower_module_with_stats(module, options) {
        Ok(lowered) => Ok(lowered),
        Err(err) => {
            let diagnostics = err.diagnostics();
            render_diagnostics(&diagnostics, filename, source);
            Err(diagnostics)
        }
    }
}
