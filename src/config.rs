//! Lowering options.
//!
//! Options come from the CLI flags or from a pass-option string of
//! whitespace-separated `key=value` pairs:
//!
//! ```text
//! use-bare-pointers-for-kernels=true gpu-binary-annotation=nvvm.cubin index-bitwidth=32
//! ```

/// Default name of the kernel-module attribute holding the compiled blob.
pub const DEFAULT_GPU_BINARY_ANNOTATION: &str = "gpu.binary";

/// Index bit widths a runtime build can be configured for.
pub const SUPPORTED_INDEX_BITWIDTHS: [u32; 2] = [32, 64];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed pass option `{text}`: expected `key=value`")]
    Malformed { text: String },
    #[error("unknown pass option `{key}`")]
    UnknownKey { key: String },
    #[error("invalid boolean `{value}` for `{key}`: expected `true` or `false`")]
    InvalidBool { key: String, value: String },
    #[error("unsupported index bit width `{value}`: expected 32 or 64")]
    UnsupportedBitwidth { value: String },
    #[error("`gpu-binary-annotation` must not be empty")]
    EmptyAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweringOptions {
    /// Pass ranked kernel buffers as their bare aligned data pointer
    /// instead of the unpacked descriptor.
    pub kernel_bare_ptr_call_conv: bool,
    /// Attribute on `gpu.module` that holds the compiled kernel binary.
    pub gpu_binary_annotation: String,
    /// Width of `index` and of every size argument of the runtime ABI.
    pub index_bitwidth: u32,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            kernel_bare_ptr_call_conv: false,
            gpu_binary_annotation: DEFAULT_GPU_BINARY_ANNOTATION.to_string(),
            index_bitwidth: 64,
        }
    }
}

impl LoweringOptions {
    pub fn with_bare_ptr_call_conv(mut self, enabled: bool) -> Self {
        self.kernel_bare_ptr_call_conv = enabled;
        self
    }

    pub fn with_gpu_binary_annotation(mut self, name: impl Into<String>) -> Self {
        self.gpu_binary_annotation = name.into();
        self
    }

    pub fn with_index_bitwidth(mut self, bits: u32) -> Self {
        self.index_bitwidth = bits;
        self
    }

    /// Parse a pass-option string on top of the defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::default().apply(text)
    }

    /// Apply a pass-option string on top of `self`. Later keys win.
    pub fn apply(mut self, text: &str) -> Result<Self, ConfigError> {
        for pair in text.split_whitespace() {
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::Malformed {
                text: pair.to_string(),
            })?;
            if key.is_empty() || value.is_empty() {
                return Err(ConfigError::Malformed {
                    text: pair.to_string(),
                });
            }
            match key {
                "use-bare-pointers-for-kernels" => {
                    self.kernel_bare_ptr_call_conv = parse_bool(key, value)?;
                }
                "gpu-binary-annotation" => {
                    self.gpu_binary_annotation = value.trim_matches('"').to_string();
                    if self.gpu_binary_annotation.is_empty() {
                        return Err(ConfigError::EmptyAnnotation);
                    }
                }
                "index-bitwidth" => self.index_bitwidth = parse_bitwidth(value)?,
                _ => {
                    return Err(ConfigError::UnknownKey {
                        key: key.to_string(),
                    })
                }
            }
        }
        Ok(self)
    }

    /// Check values set through the builders.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_INDEX_BITWIDTHS.contains(&self.index_bitwidth) {
            return Err(ConfigError::UnsupportedBitwidth {
                value: self.index_bitwidth.to_string(),
            });
        }
        if self.gpu_binary_annotation.is_empty() {
            return Err(ConfigError::EmptyAnnotation);
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

pub fn parse_bitwidth(value: &str) -> Result<u32, ConfigError> {
    value
        .parse::<u32>()
        .ok()
        .filter(|bits| SUPPORTED_INDEX_BITWIDTHS.contains(bits))
        .ok_or_else(|| ConfigError::UnsupportedBitwidth {
            value: value.to_string(),
        })
}
