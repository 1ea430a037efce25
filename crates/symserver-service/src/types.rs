//! The request and response model shared by both API versions.
//!
//! Incoming payloads are validated against the rules of the symbolication
//! protocol rather than deserialized structurally, so that rejections carry
//! one of the enumerated reasons (`bad_json`, `invalid_jobs`,
//! `invalid_modules`, `invalid_stacks`, `too_many_jobs`).

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// A reference to one loaded module, the canonical cache key material.
///
/// The debug id is normalized to uppercase; the debug filename is kept as
/// provided by the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleRef {
    pub debug_file: String,
    pub debug_id: String,
}

impl ModuleRef {
    /// Creates a module reference, or `None` when either part is empty.
    ///
    /// Empty parts pass request validation but can never be looked up, so they
    /// are filtered here.
    pub fn new(debug_file: &str, debug_id: &str) -> Option<Self> {
        if debug_file.is_empty() || debug_id.is_empty() {
            return None;
        }

        Some(ModuleRef {
            debug_file: debug_file.to_owned(),
            debug_id: debug_id.to_ascii_uppercase(),
        })
    }

    /// The name of the symbol file for this module.
    ///
    /// `.sym` replaces a trailing `.pdb`, and is appended for everything else.
    pub fn sym_filename(&self) -> String {
        match self.debug_file.strip_suffix(".pdb") {
            Some(stem) => format!("{stem}.sym"),
            None => format!("{}.sym", self.debug_file),
        }
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.debug_file, self.debug_id)
    }
}

/// One frame of a requested stack: `(module_index, module_offset)`.
///
/// A `module_index` of `-1` marks an address that is not attributable to any
/// module in the memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRequest {
    pub module_index: i64,
    pub module_offset: u64,
}

/// A validated symbolication job.
#[derive(Debug, Clone)]
pub struct SymbolicationJob {
    /// Module pairs exactly as provided, indexed by stack frames.
    pub memory_map: Vec<(String, String)>,
    pub stacks: Vec<Vec<FrameRequest>>,
}

impl SymbolicationJob {
    /// Resolves the module reference a frame points at, if any.
    pub fn module_for(&self, frame: &FrameRequest) -> Option<&(String, String)> {
        usize::try_from(frame.module_index)
            .ok()
            .and_then(|index| self.memory_map.get(index))
    }
}

/// A rejected payload, with the reason used for both the error body and the
/// `symbolicate.request_error` counter tag.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub reason: &'static str,
    pub message: String,
}

impl ValidationError {
    fn invalid_jobs(message: impl Into<String>) -> Self {
        ValidationError {
            reason: "invalid_jobs",
            message: message.into(),
        }
    }

    fn invalid_modules(index: usize, message: impl fmt::Display) -> Self {
        ValidationError {
            reason: "invalid_modules",
            message: format!("job {index} has invalid modules: {message}"),
        }
    }

    fn invalid_stacks(index: usize, message: impl fmt::Display) -> Self {
        ValidationError {
            reason: "invalid_stacks",
            message: format!("job {index} has invalid stacks: {message}"),
        }
    }
}

/// A debug filename consists of alphanumeric characters, some punctuation, and
/// spaces. Empty names are accepted and later skipped during symbolication.
fn is_valid_debug_file(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || "_.+{}@<> ~-".contains(c))
}

/// A debug id is zero or more hex characters.
fn is_valid_debug_id(id: &str) -> bool {
    id.chars().all(|c| c.is_ascii_hexdigit())
}

fn validate_modules(job_index: usize, modules: &Value) -> Result<Vec<(String, String)>, ValidationError> {
    let modules = modules
        .as_array()
        .ok_or_else(|| ValidationError::invalid_modules(job_index, "memoryMap must be a list"))?;

    let mut memory_map = Vec::with_capacity(modules.len());
    for (i, entry) in modules.iter().enumerate() {
        let pair = entry.as_array().filter(|pair| pair.len() == 2).ok_or_else(|| {
            ValidationError::invalid_modules(
                job_index,
                format!("module index {i} does not have a debug_filename and debug_id"),
            )
        })?;

        let debug_file = pair[0].as_str().filter(|s| is_valid_debug_file(s)).ok_or_else(|| {
            ValidationError::invalid_modules(
                job_index,
                format!("module index {i} has an invalid debug_filename"),
            )
        })?;

        let debug_id = pair[1].as_str().filter(|s| is_valid_debug_id(s)).ok_or_else(|| {
            ValidationError::invalid_modules(
                job_index,
                format!("module index {i} has an invalid debug_id"),
            )
        })?;

        memory_map.push((debug_file.to_owned(), debug_id.to_owned()));
    }

    Ok(memory_map)
}

fn validate_stacks(
    job_index: usize,
    stacks: &Value,
    num_modules: usize,
) -> Result<Vec<Vec<FrameRequest>>, ValidationError> {
    let stacks = stacks
        .as_array()
        .ok_or_else(|| ValidationError::invalid_stacks(job_index, "stacks must be a list of lists"))?;

    if stacks.is_empty() {
        return Err(ValidationError::invalid_stacks(job_index, "no stacks specified"));
    }

    let mut validated = Vec::with_capacity(stacks.len());
    for (i, stack) in stacks.iter().enumerate() {
        let stack = stack
            .as_array()
            .ok_or_else(|| ValidationError::invalid_stacks(job_index, format!("stack {i} is not a list")))?;

        let mut frames = Vec::with_capacity(stack.len());
        for (frame_i, frame) in stack.iter().enumerate() {
            let pair = frame.as_array().filter(|pair| pair.len() == 2).ok_or_else(|| {
                ValidationError::invalid_stacks(
                    job_index,
                    format!("stack {i} frame {frame_i} is not a list of two items"),
                )
            })?;

            let module_index = pair[0].as_i64().ok_or_else(|| {
                ValidationError::invalid_stacks(
                    job_index,
                    format!("stack {i} frame {frame_i} has an invalid module_index"),
                )
            })?;

            // -1 marks an address that is not in any module
            if module_index < -1 || module_index >= num_modules as i64 {
                return Err(ValidationError::invalid_stacks(
                    job_index,
                    format!("stack {i} frame {frame_i} has a module_index that isn't in memoryMap"),
                ));
            }

            let module_offset = pair[1].as_u64().ok_or_else(|| {
                ValidationError::invalid_stacks(
                    job_index,
                    format!("stack {i} frame {frame_i} has an invalid module_offset"),
                )
            })?;

            frames.push(FrameRequest {
                module_index,
                module_offset,
            });
        }

        validated.push(frames);
    }

    Ok(validated)
}

impl SymbolicationJob {
    /// Validates a single job object against the wire schema.
    pub fn from_value(job_index: usize, value: &Value) -> Result<Self, ValidationError> {
        let job = value
            .as_object()
            .ok_or_else(|| ValidationError::invalid_jobs(format!("job {job_index} is invalid")))?;

        let modules = job.get("memoryMap").ok_or_else(|| {
            ValidationError::invalid_jobs(format!("job {job_index} is invalid: no memoryMap specified"))
        })?;
        let stacks = job.get("stacks").ok_or_else(|| {
            ValidationError::invalid_jobs(format!("job {job_index} is invalid: no stacks specified"))
        })?;

        let memory_map = validate_modules(job_index, modules)?;
        let stacks = validate_stacks(job_index, stacks, memory_map.len())?;

        Ok(SymbolicationJob { memory_map, stacks })
    }
}

/// One inline expansion entry of a symbolicated frame, innermost first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineFrameInfo {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

/// One symbolicated frame as it appears in a v5 response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FrameInfo {
    /// Index of the frame within its stack.
    pub frame: usize,
    /// Module filename, or `"<unknown>"`.
    pub module: String,
    /// The requested offset, as a 0x-prefixed hex string.
    pub module_offset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inlines: Option<Vec<InlineFrameInfo>>,
}

impl FrameInfo {
    pub fn unresolved(frame: usize, module: String, module_offset: u64) -> Self {
        FrameInfo {
            frame,
            module,
            module_offset: format!("{module_offset:#x}"),
            function: None,
            function_offset: None,
            file: None,
            line: None,
            inlines: None,
        }
    }
}

/// The result of one symbolication job.
///
/// `found_modules` maps `"debug_filename/debug_id"` to `true` (symcache
/// obtained), `false` (lookup attempted and failed) or `null` (never looked
/// up).
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub stacks: Vec<Vec<FrameInfo>>,
    pub found_modules: BTreeMap<String, Option<bool>>,
}
