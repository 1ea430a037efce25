//! A streaming parser for Breakpad text symbol files.
//!
//! The format is line oriented. A file starts with a `MODULE` header, followed
//! by `INFO`, `FILE`, `INLINE_ORIGIN`, `FUNC` (with indented line records and
//! `INLINE` records), `PUBLIC` and `STACK` records. `STACK` records and
//! unknown directives are skipped.
//!
//! Addresses, sizes and parameter sizes are hex without a `0x` prefix; record
//! ids, line numbers and inline nesting levels are decimal.

use std::collections::HashMap;
use std::io::BufRead;

use thiserror::Error;

/// Placeholder for records without a name.
const UNKNOWN_NAME: &str = "<unknown>";

/// An error from parsing a sym file.
///
/// [`reason`](Self::reason) yields the tag value used for the
/// `symbolicate.parse_sym_file.error` counter.
#[derive(Debug, Error)]
pub enum SymFileError {
    /// The `MODULE` header names a different debug id than the request.
    #[error("sym file debug id {found} does not match requested {expected}")]
    BadDebugId { expected: String, found: String },

    /// A recognized record failed to parse.
    #[error("malformed sym file on line {line}: {detail}")]
    Malformed { line: usize, detail: &'static str },

    #[error("failed to read sym file")]
    Io(#[from] std::io::Error),
}

impl SymFileError {
    pub fn reason(&self) -> &'static str {
        match self {
            SymFileError::BadDebugId { .. } => "bad_debug_id",
            _ => "malformed",
        }
    }

    fn malformed(line: usize, detail: &'static str) -> Self {
        SymFileError::Malformed { line, detail }
    }
}

/// A line record belonging to a [`FuncRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRecord {
    pub address: u64,
    pub size: u64,
    pub line: u64,
    pub file_id: u64,
}

/// An `INLINE` record belonging to a [`FuncRecord`].
///
/// `call_line` and `call_file_id` describe where the inlined function was
/// called from; the call covers one or more `(address, size)` ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRecord {
    pub depth: u64,
    pub call_line: u64,
    pub call_file_id: u64,
    pub origin_id: u64,
    pub ranges: Vec<(u64, u64)>,
}

/// A `FUNC` record with its associated line and inline records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncRecord {
    /// Whether this function was referenced multiple times.
    pub multiple: bool,
    pub address: u64,
    pub size: u64,
    pub parameter_size: u64,
    pub name: String,
    pub lines: Vec<LineRecord>,
    pub inlines: Vec<InlineRecord>,
}

/// A `PUBLIC` record, the fallback for regions without function records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicRecord {
    pub multiple: bool,
    pub address: u64,
    pub parameter_size: u64,
    pub name: String,
}

/// The parsed model of one sym file.
#[derive(Debug, Default)]
pub struct SymFile {
    pub os: String,
    pub arch: String,
    pub debug_id: String,
    /// The module name from the `MODULE` header.
    pub name: String,
    /// The code filename from `INFO CODE_ID`, when present. On Windows this
    /// carries the PE filename that differs from the PDB name.
    pub code_file: Option<String>,
    pub files: HashMap<u64, String>,
    pub inline_origins: HashMap<u64, String>,
    pub functions: Vec<FuncRecord>,
    pub publics: Vec<PublicRecord>,
}

fn parse_hex(token: &str, line: usize) -> Result<u64, SymFileError> {
    u64::from_str_radix(token, 16).map_err(|_| SymFileError::malformed(line, "expected hex integer"))
}

fn parse_dec(token: &str, line: usize) -> Result<u64, SymFileError> {
    token
        .parse()
        .map_err(|_| SymFileError::malformed(line, "expected decimal integer"))
}

/// Line numbers are signed in the wild; negative values mean "no line".
fn parse_line_number(token: &str, line: usize) -> Result<u64, SymFileError> {
    let value: i64 = token
        .parse()
        .map_err(|_| SymFileError::malformed(line, "expected line number"))?;
    Ok(value.max(0) as u64)
}

/// Splits off the next whitespace-delimited field.
fn take_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        *rest = trimmed;
        return None;
    }

    match trimmed.split_once(char::is_whitespace) {
        Some((field, tail)) => {
            *rest = tail;
            Some(field)
        }
        None => {
            *rest = "";
            Some(trimmed)
        }
    }
}

fn expect_field<'a>(rest: &mut &'a str, line: usize) -> Result<&'a str, SymFileError> {
    take_field(rest).ok_or_else(|| SymFileError::malformed(line, "record is missing fields"))
}

/// Consumes an optional `m` marker ("referenced multiple times").
fn take_multiple(rest: &mut &str) -> bool {
    let trimmed = rest.trim_start();
    if let Some(tail) = trimmed.strip_prefix("m ") {
        *rest = tail;
        true
    } else {
        false
    }
}

/// Parses a sym file from a buffered reader.
///
/// `expected_debug_id` is the (uppercase) debug id of the request; a `MODULE`
/// header naming a different id fails with [`SymFileError::BadDebugId`]. The
/// input is consumed line by line, only the growing model is kept in memory.
pub fn parse(expected_debug_id: &str, mut reader: impl BufRead) -> Result<SymFile, SymFileError> {
    let mut sym = SymFile::default();
    let mut saw_module = false;
    let mut buffer = Vec::new();
    let mut line_no = 0usize;

    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        line_no += 1;

        let text = String::from_utf8_lossy(&buffer);
        let line = text.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        if !saw_module {
            let mut rest = line
                .strip_prefix("MODULE ")
                .ok_or_else(|| SymFileError::malformed(line_no, "missing MODULE header"))?;
            sym.os = expect_field(&mut rest, line_no)?.to_owned();
            sym.arch = expect_field(&mut rest, line_no)?.to_owned();
            sym.debug_id = expect_field(&mut rest, line_no)?.to_ascii_uppercase();
            sym.name = rest.trim().to_owned();

            if sym.debug_id != expected_debug_id.to_ascii_uppercase() {
                return Err(SymFileError::BadDebugId {
                    expected: expected_debug_id.to_owned(),
                    found: sym.debug_id,
                });
            }

            saw_module = true;
            continue;
        }

        if let Some(mut rest) = line.strip_prefix("FILE ") {
            let id = parse_dec(expect_field(&mut rest, line_no)?, line_no)?;
            sym.files.insert(id, rest.trim().to_owned());
        } else if let Some(mut rest) = line.strip_prefix("INLINE_ORIGIN ") {
            let id = parse_dec(expect_field(&mut rest, line_no)?, line_no)?;
            let name = rest.trim();
            let name = if name.is_empty() { UNKNOWN_NAME } else { name };
            sym.inline_origins.insert(id, name.to_owned());
        } else if let Some(mut rest) = line.strip_prefix("FUNC ") {
            let multiple = take_multiple(&mut rest);
            let address = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let size = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let parameter_size = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let name = rest.trim();
            let name = if name.is_empty() { UNKNOWN_NAME } else { name };

            sym.functions.push(FuncRecord {
                multiple,
                address,
                size,
                parameter_size,
                name: name.to_owned(),
                lines: Vec::new(),
                inlines: Vec::new(),
            });
        } else if let Some(mut rest) = line.strip_prefix("INLINE ") {
            let Some(func) = sym.functions.last_mut() else {
                continue;
            };

            let depth = parse_dec(expect_field(&mut rest, line_no)?, line_no)?;
            let call_line = parse_line_number(expect_field(&mut rest, line_no)?, line_no)?;
            let call_file_id = parse_dec(expect_field(&mut rest, line_no)?, line_no)?;
            let origin_id = parse_dec(expect_field(&mut rest, line_no)?, line_no)?;

            let mut ranges = Vec::new();
            while let Some(addr) = take_field(&mut rest) {
                let addr = parse_hex(addr, line_no)?;
                let size = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
                if size > 0 {
                    ranges.push((addr, size));
                }
            }
            if ranges.is_empty() {
                continue;
            }

            func.inlines.push(InlineRecord {
                depth,
                call_line,
                call_file_id,
                origin_id,
                ranges,
            });
        } else if let Some(mut rest) = line.strip_prefix("PUBLIC ") {
            let multiple = take_multiple(&mut rest);
            let address = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let parameter_size = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let name = rest.trim();
            let name = if name.is_empty() { UNKNOWN_NAME } else { name };

            sym.publics.push(PublicRecord {
                multiple,
                address,
                parameter_size,
                name: name.to_owned(),
            });
        } else if let Some(mut rest) = line.strip_prefix("INFO CODE_ID ") {
            let _code_id = take_field(&mut rest);
            let code_file = rest.trim();
            if !code_file.is_empty() {
                sym.code_file = Some(code_file.to_owned());
            }
        } else if line.starts_with("STACK ")
            || line.starts_with("INFO ")
            || line.starts_with("MODULE ")
        {
            // opaque records
        } else if line.starts_with(|c: char| c.is_ascii_hexdigit()) {
            // a line record belonging to the preceding FUNC
            let Some(func) = sym.functions.last_mut() else {
                continue;
            };

            let mut rest = line;
            let address = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let size = parse_hex(expect_field(&mut rest, line_no)?, line_no)?;
            let line_number = parse_line_number(expect_field(&mut rest, line_no)?, line_no)?;
            let file_id = parse_dec(expect_field(&mut rest, line_no)?, line_no)?;

            // Line records for empty ranges carry no information.
            if size > 0 {
                func.lines.push(LineRecord {
                    address,
                    size,
                    line: line_number,
                    file_id,
                });
            }
        }
        // anything else is an unknown directive and skipped silently
    }

    if !saw_module {
        return Err(SymFileError::malformed(line_no, "missing MODULE header"));
    }

    Ok(sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBUG_ID: &str = "44E4EC8C2F41492B9369D6B9A059577C2";

    fn parse_str(input: &str) -> Result<SymFile, SymFileError> {
        parse(DEBUG_ID, input.as_bytes())
    }

    #[test]
    fn test_full_file() {
        let sym = parse_str(
            "MODULE windows x86_64 44E4EC8C2F41492B9369D6B9A059577C2 xul.pdb\n\
             INFO CODE_ID 58E275E89000 xul.dll\n\
             FILE 7 src/foo.cpp\n\
             FILE 8 src/bar.cpp\n\
             INLINE_ORIGIN 0 inlined_helper()\n\
             FUNC 1200 100 0 foo\n\
             INLINE 0 21 8 0 1210 10\n\
             1200 10 41 7\n\
             1210 10 42 7\n\
             PUBLIC m 2000 0 entry_point\n\
             STACK CFI INIT 1200 100 .cfa: $rsp 8 + .ra: .cfa -8 + ^\n",
        )
        .unwrap();

        assert_eq!(sym.os, "windows");
        assert_eq!(sym.arch, "x86_64");
        assert_eq!(sym.debug_id, DEBUG_ID);
        assert_eq!(sym.name, "xul.pdb");
        assert_eq!(sym.code_file.as_deref(), Some("xul.dll"));

        assert_eq!(sym.files[&7], "src/foo.cpp");
        assert_eq!(sym.inline_origins[&0], "inlined_helper()");

        let func = &sym.functions[0];
        assert_eq!(func.address, 0x1200);
        assert_eq!(func.size, 0x100);
        assert_eq!(func.name, "foo");
        assert_eq!(func.lines.len(), 2);
        assert_eq!(func.lines[1].line, 42);
        assert_eq!(func.lines[1].file_id, 7);
        assert_eq!(func.inlines[0].ranges, vec![(0x1210, 0x10)]);
        assert_eq!(func.inlines[0].call_line, 21);

        let public = &sym.publics[0];
        assert!(public.multiple);
        assert_eq!(public.address, 0x2000);
        assert_eq!(public.name, "entry_point");
    }

    #[test]
    fn test_module_header_must_come_first() {
        let err = parse_str("FUNC 1000 10 0 foo\n").unwrap_err();
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn test_empty_input() {
        let err = parse_str("").unwrap_err();
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn test_bad_debug_id() {
        let err = parse_str("MODULE linux x86_64 AABBCCDD0 libxul.so\n").unwrap_err();
        assert_eq!(err.reason(), "bad_debug_id");
        assert!(matches!(err, SymFileError::BadDebugId { .. }));
    }

    #[test]
    fn test_debug_id_case_insensitive() {
        let input = format!(
            "MODULE linux x86_64 {} libxul.so\n",
            DEBUG_ID.to_ascii_lowercase()
        );
        let sym = parse_str(&input).unwrap();
        assert_eq!(sym.debug_id, DEBUG_ID);
    }

    #[test]
    fn test_malformed_integer() {
        let input = format!("MODULE linux x86_64 {DEBUG_ID} libxul.so\nFUNC xyz 10 0 foo\n");
        let err = parse_str(&input).unwrap_err();
        assert_eq!(err.reason(), "malformed");
        assert!(matches!(err, SymFileError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_unknown_directives_skipped() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             FANCY_NEW_RECORD 1 2 3\n\
             FUNC 1000 10 0 foo\n"
        );
        let sym = parse_str(&input).unwrap();
        assert_eq!(sym.functions.len(), 1);
    }

    #[test]
    fn test_multi_range_inline() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             INLINE_ORIGIN 1 helper\n\
             FUNC 1000 100 0 outer\n\
             INLINE 0 10 2 1 1000 8 1020 4\n"
        );
        let sym = parse_str(&input).unwrap();
        let inline = &sym.functions[0].inlines[0];
        assert_eq!(inline.ranges, vec![(0x1000, 8), (0x1020, 4)]);
        assert_eq!(inline.origin_id, 1);
    }

    #[test]
    fn test_inline_with_odd_range_tokens() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             FUNC 1000 100 0 outer\n\
             INLINE 0 10 2 1 1000\n"
        );
        let err = parse_str(&input).unwrap_err();
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn test_line_records_without_func_skipped() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             1000 10 42 7\n"
        );
        let sym = parse_str(&input).unwrap();
        assert!(sym.functions.is_empty());
    }

    #[test]
    fn test_func_multiple_flag_and_spaces_in_name() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             FUNC m 1000 10 8 operator delete(void*, unsigned long)\n"
        );
        let sym = parse_str(&input).unwrap();
        let func = &sym.functions[0];
        assert!(func.multiple);
        assert_eq!(func.parameter_size, 8);
        assert_eq!(func.name, "operator delete(void*, unsigned long)");
    }

    #[test]
    fn test_negative_line_number_clamped() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             FUNC 1000 10 0 foo\n\
             1000 10 -1 7\n"
        );
        let sym = parse_str(&input).unwrap();
        assert_eq!(sym.functions[0].lines[0].line, 0);
    }

    #[test]
    fn test_zero_size_line_record_skipped() {
        let input = format!(
            "MODULE linux x86_64 {DEBUG_ID} libxul.so\n\
             FUNC 1000 10 0 foo\n\
             1000 0 42 7\n"
        );
        let sym = parse_str(&input).unwrap();
        assert!(sym.functions[0].lines.is_empty());
    }
}
