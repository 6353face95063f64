use std::path::{Path, PathBuf};

use crate::array::ErrorMode;
use crate::diagnostic::{Diagnostic, ErrorCode};
use crate::infer::InferOptions;
use crate::kernel::{KernelBuffer, DEFAULT_PARALLEL_THRESHOLD};
use crate::syntax::parse_type;

pub const CONFIG_FILE: &str = "strata.toml";

/// Settings from strata.toml.
#[derive(Clone, Debug)]
pub struct Config {
    pub infer: InferOptions,
    /// Error mode for conversions requested without one.
    pub error_mode: ErrorMode,
    /// Loops and reductions at least this long run in parallel.
    pub parallel_threshold: usize,
    /// File the settings came from, if any.
    pub source: Option<PathBuf>,
    /// Unknown sections and keys.
    pub warnings: Vec<Diagnostic>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            infer: InferOptions::default(),
            error_mode: ErrorMode::default(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            source: None,
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Load settings from a strata.toml file.
    pub fn load(path: &Path) -> Result<Config, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                ErrorCode::Config,
                format!("cannot read '{}': {}", path.display(), e),
            )
        })?;
        let mut config = Config::parse(&content).map_err(|e| e.with_note(format!("in {}", path.display())))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse the section-aware subset of TOML strata.toml uses.
    pub fn parse(content: &str) -> Result<Config, Diagnostic> {
        let mut config = Config::default();
        let mut section = String::new();

        for (index, line) in content.lines().enumerate() {
            let lineno = index + 1;
            let trimmed = strip_comment(line).trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                if section != "infer" && section != "kernel" {
                    config.warnings.push(Diagnostic::warning(
                        ErrorCode::Config,
                        format!("line {}: unknown section [{}]", lineno, section),
                    ));
                }
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(Diagnostic::error(
                    ErrorCode::Config,
                    format!("line {}: expected `key = value`", lineno),
                ));
            };
            let key = key.trim().trim_matches('"');
            let value = value.trim();
            let at_line = |e: Diagnostic| e.with_note(format!("line {}", lineno));

            match (section.as_str(), key) {
                ("infer", "empty_dtype") => {
                    let name = string_value(value, key).map_err(at_line)?;
                    config.infer.empty_dtype = parse_type(&name).map_err(|diags| {
                        let reason = diags
                            .first()
                            .map_or_else(|| "not a type".to_string(), |d| d.message.clone());
                        at_line(Diagnostic::error(
                            ErrorCode::Config,
                            format!("empty_dtype: {}", reason),
                        ))
                    })?;
                }
                ("infer", "allow_broadcast") => {
                    config.infer.allow_broadcast = bool_value(value, key).map_err(at_line)?;
                }
                ("kernel", "error_mode") => {
                    let name = string_value(value, key).map_err(at_line)?;
                    config.error_mode = ErrorMode::parse(&name).map_err(at_line)?;
                }
                ("kernel", "parallel_threshold") => {
                    let n: usize = value.replace('_', "").parse().map_err(|_| {
                        at_line(Diagnostic::error(
                            ErrorCode::Config,
                            format!("parallel_threshold must be a positive integer, got {}", value),
                        ))
                    })?;
                    config.parallel_threshold = n.max(1);
                }
                ("infer", _) | ("kernel", _) => config.warnings.push(Diagnostic::warning(
                    ErrorCode::Config,
                    format!("line {}: unknown key '{}' in [{}]", lineno, key, section),
                )),
                _ => {}
            }
        }
        Ok(config)
    }

    /// Find strata.toml in `start_dir` or its ancestors.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// An empty kernel buffer using the configured parallel threshold.
    pub fn kernel_buffer(&self) -> KernelBuffer {
        KernelBuffer::with_parallel_threshold(self.parallel_threshold)
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn string_value(value: &str, key: &str) -> Result<String, Diagnostic> {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| {
            Diagnostic::error(
                ErrorCode::Config,
                format!("{} must be a quoted string, got {}", key, value),
            )
        })
}

fn bool_value(value: &str, key: &str) -> Result<bool, Diagnostic> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Diagnostic::error(
            ErrorCode::Config,
            format!("{} must be true or false, got {}", key, value),
        )),
    }
}
