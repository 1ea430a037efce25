//! The compiled address-lookup structure derived from a parsed sym file.
//!
//! A symcache stores the module's functions sorted by start address, their
//! line records, the flattened inline ranges grouped by nesting depth, and the
//! public symbols used as fallback for regions without function records.
//! Lookups binary-search these tables and return source locations innermost
//! first, the outer function last.
//!
//! The persisted form is a little-endian binary blob starting with a 4-byte
//! magic and a 4-byte format version. Loaders reject blobs with a different
//! version, which the cache layer treats as a cold miss.

use std::io::Write;

use symbolic::common::Name;
use symbolic::demangle::{Demangle, DemangleOptions};
use thiserror::Error;

use crate::symfile::SymFile;
use crate::types::ModuleRef;

pub const SYMCACHE_MAGIC: [u8; 4] = *b"SYMC";
pub const SYMCACHE_VERSION: u32 = 1;

/// File index marking "no file known".
const NO_FILE: u32 = u32::MAX;

/// Options for demangling all symbols.
const DEMANGLE_OPTIONS: DemangleOptions = DemangleOptions::complete().return_type(false);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymCacheError {
    #[error("not a symcache blob")]
    BadMagic,
    #[error("unsupported symcache version {0}")]
    UnsupportedVersion(u32),
    #[error("truncated or corrupt symcache")]
    Corrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LineEntry {
    address: u64,
    size: u64,
    line: u64,
    file: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InlineEntry {
    depth: u32,
    address: u64,
    size: u64,
    call_line: u64,
    call_file: u32,
    name: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Function {
    address: u64,
    size: u64,
    name: String,
    /// Sorted by address.
    lines: Vec<LineEntry>,
    /// Sorted by (depth, address), overlap-free within one depth.
    inlines: Vec<InlineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PublicSymbol {
    address: u64,
    name: String,
}

/// One resolved frame of a lookup, see [`SymCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub function: String,
    /// Start address of the symbol this frame belongs to.
    pub sym_addr: u64,
    pub file: Option<String>,
    /// The source line, `None` when unknown.
    pub line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymCache {
    module_name: String,
    files: Vec<String>,
    inline_origins: Vec<String>,
    functions: Vec<Function>,
    publics: Vec<PublicSymbol>,
}

/// Demangles a symbol if it carries a known mangling prefix.
///
/// Breakpad sym files mostly contain demangled names already; raw mangled
/// names slip through for some toolchains. Failures keep the mangled name.
fn maybe_demangle(name: &str) -> String {
    let is_mangled = name.starts_with("_Z")
        || name.starts_with("__Z")
        || name.starts_with("___Z")
        || name.starts_with("_R")
        || name.starts_with('?');

    if !is_mangled {
        return name.to_owned();
    }

    Name::from(name)
        .demangle(DEMANGLE_OPTIONS)
        .unwrap_or_else(|| name.to_owned())
}

/// Drops records shadowed by a later record with the same start address.
///
/// `ranges` must be stable-sorted by start address so that records sharing a
/// start keep their original order; the last one wins. Partially overlapping
/// ranges are left in place: lookups always pick the latest range starting at
/// or before the offset, which makes the later record win the overlapping
/// region.
fn coalesce_last_wins<T, F>(ranges: &mut Vec<T>, start_of: F)
where
    F: Fn(&T) -> u64,
{
    let mut result: Vec<T> = Vec::with_capacity(ranges.len());
    for entry in ranges.drain(..) {
        if let Some(prev) = result.last() {
            if start_of(prev) == start_of(&entry) {
                result.pop();
            }
        }
        result.push(entry);
    }
    *ranges = result;
}

impl SymCache {
    /// The module filename reported in responses.
    ///
    /// This is the PE filename from `INFO CODE_ID` when the sym file carries
    /// one, else the requested debug filename.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Compiles a parsed sym file into a lookup structure.
    pub fn build(module: &ModuleRef, sym: SymFile) -> Self {
        let mut files = Vec::with_capacity(sym.files.len());
        let mut file_indexes = std::collections::HashMap::with_capacity(sym.files.len());
        let mut file_ids: Vec<_> = sym.files.iter().collect();
        file_ids.sort_by_key(|(id, _)| **id);
        for (id, path) in file_ids {
            file_indexes.insert(*id, files.len() as u32);
            files.push(path.clone());
        }

        let mut inline_origins = Vec::with_capacity(sym.inline_origins.len());
        let mut origin_indexes = std::collections::HashMap::with_capacity(sym.inline_origins.len());
        let mut origin_ids: Vec<_> = sym.inline_origins.iter().collect();
        origin_ids.sort_by_key(|(id, _)| **id);
        for (id, name) in origin_ids {
            origin_indexes.insert(*id, inline_origins.len() as u32);
            inline_origins.push(maybe_demangle(name));
        }

        let file_index = |id: u64| file_indexes.get(&id).copied().unwrap_or(NO_FILE);

        let mut functions: Vec<Function> = sym
            .functions
            .into_iter()
            .map(|func| {
                let mut lines: Vec<LineEntry> = func
                    .lines
                    .into_iter()
                    .map(|record| LineEntry {
                        address: record.address,
                        size: record.size,
                        line: record.line,
                        file: file_index(record.file_id),
                    })
                    .collect();
                lines.sort_by_key(|line| line.address);
                coalesce_last_wins(&mut lines, |line| line.address);

                let mut inlines: Vec<InlineEntry> = Vec::new();
                for record in func.inlines {
                    let Some(&name) = origin_indexes.get(&record.origin_id) else {
                        continue;
                    };
                    for (address, size) in record.ranges {
                        inlines.push(InlineEntry {
                            depth: record.depth.min(u32::MAX as u64) as u32,
                            address,
                            size,
                            call_line: record.call_line,
                            call_file: file_index(record.call_file_id),
                            name,
                        });
                    }
                }
                inlines.sort_by_key(|inline| (inline.depth, inline.address));
                // resolve same-depth overlaps with the same last-wins rule as
                // for functions
                let mut resolved = Vec::with_capacity(inlines.len());
                let mut iter = inlines.into_iter().peekable();
                while let Some(inline) = iter.next() {
                    let depth = inline.depth;
                    let mut group = vec![inline];
                    while iter.peek().is_some_and(|next| next.depth == depth) {
                        group.push(iter.next().unwrap());
                    }
                    coalesce_last_wins(&mut group, |entry| entry.address);
                    resolved.extend(group);
                }

                Function {
                    address: func.address,
                    size: func.size,
                    name: maybe_demangle(&func.name),
                    lines,
                    inlines: resolved,
                }
            })
            .collect();

        functions.sort_by_key(|func| func.address);
        coalesce_last_wins(&mut functions, |func| func.address);

        let mut publics: Vec<PublicSymbol> = sym
            .publics
            .into_iter()
            .map(|public| PublicSymbol {
                address: public.address,
                name: maybe_demangle(&public.name),
            })
            .collect();
        publics.sort_by_key(|public| public.address);
        publics.dedup_by(|later, earlier| {
            if earlier.address == later.address {
                // last record wins
                std::mem::swap(earlier, later);
                true
            } else {
                false
            }
        });

        SymCache {
            module_name: sym
                .code_file
                .unwrap_or_else(|| module.debug_file.clone()),
            files,
            inline_origins,
            functions,
            publics,
        }
    }

    fn file_name(&self, index: u32) -> Option<String> {
        self.files.get(index as usize).cloned()
    }

    /// Looks up all frames for `offset`, innermost first.
    ///
    /// An empty result means the offset is covered by neither a function nor a
    /// public symbol. Otherwise the last entry is the outer function (or
    /// public symbol); any inline frames precede it, deepest first. The
    /// innermost frame carries the file/line of the covering line record,
    /// enclosing frames carry the call site of their callee.
    pub fn lookup(&self, offset: u64) -> Vec<SourceLocation> {
        let index = self.functions.partition_point(|func| func.address <= offset);
        if index > 0 {
            let func = &self.functions[index - 1];
            if offset < func.address.saturating_add(func.size) {
                return self.lookup_function(func, offset);
            }
        }

        self.lookup_public(offset)
    }

    fn lookup_function(&self, func: &Function, offset: u64) -> Vec<SourceLocation> {
        // the chain of inline calls covering this offset, outermost first
        let mut chain: Vec<&InlineEntry> = Vec::new();
        for depth in 0u32.. {
            let group_start = func.inlines.partition_point(|inline| inline.depth < depth);
            let group = func.inlines[group_start..]
                .iter()
                .take_while(|inline| inline.depth == depth);

            let mut hit = None;
            for inline in group {
                if inline.address > offset {
                    break;
                }
                if offset < inline.address.saturating_add(inline.size) {
                    hit = Some(inline);
                }
            }

            match hit {
                Some(inline) => chain.push(inline),
                None => break,
            }
        }

        // the line record covering the innermost code at this offset
        let line_index = func.lines.partition_point(|line| line.address <= offset);
        let line_record = line_index
            .checked_sub(1)
            .map(|i| &func.lines[i])
            .filter(|line| offset < line.address.saturating_add(line.size));
        let record_location = |record: Option<&LineEntry>| match record {
            Some(record) => (
                self.file_name(record.file),
                (record.line > 0).then_some(record.line),
            ),
            None => (None, None),
        };

        let mut frames = Vec::with_capacity(chain.len() + 1);

        for (position, inline) in chain.iter().enumerate().rev() {
            let (file, line) = match chain.get(position + 1) {
                // an enclosing frame is located at its callee's call site
                Some(callee) => (
                    self.file_name(callee.call_file),
                    (callee.call_line > 0).then_some(callee.call_line),
                ),
                None => record_location(line_record),
            };

            frames.push(SourceLocation {
                function: self
                    .inline_origins
                    .get(inline.name as usize)
                    .cloned()
                    .unwrap_or_else(|| "<unknown>".to_owned()),
                sym_addr: inline.address,
                file,
                line,
            });
        }

        let (file, line) = match chain.first() {
            Some(innermost_call) => (
                self.file_name(innermost_call.call_file),
                (innermost_call.call_line > 0).then_some(innermost_call.call_line),
            ),
            None => record_location(line_record),
        };

        frames.push(SourceLocation {
            function: func.name.clone(),
            sym_addr: func.address,
            file,
            line,
        });

        frames
    }

    fn lookup_public(&self, offset: u64) -> Vec<SourceLocation> {
        let index = self.publics.partition_point(|public| public.address <= offset);
        let Some(public) = index.checked_sub(1).map(|i| &self.publics[i]) else {
            return Vec::new();
        };

        // a public symbol covers addresses up to the next known symbol
        let next_public = self.publics.get(index).map(|next| next.address);
        let next_func_index = self
            .functions
            .partition_point(|func| func.address <= public.address);
        let next_func = self.functions.get(next_func_index).map(|func| func.address);
        let end = next_public
            .into_iter()
            .chain(next_func)
            .min()
            .unwrap_or(u64::MAX);

        if offset >= end {
            return Vec::new();
        }

        vec![SourceLocation {
            function: public.name.clone(),
            sym_addr: public.address,
            file: None,
            line: None,
        }]
    }

    /// Serializes the symcache into its persisted blob form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_all(&SYMCACHE_MAGIC).unwrap();
        write_u32(&mut out, SYMCACHE_VERSION);

        write_str(&mut out, &self.module_name);

        write_u32(&mut out, self.files.len() as u32);
        for file in &self.files {
            write_str(&mut out, file);
        }

        write_u32(&mut out, self.inline_origins.len() as u32);
        for origin in &self.inline_origins {
            write_str(&mut out, origin);
        }

        write_u32(&mut out, self.publics.len() as u32);
        for public in &self.publics {
            write_u64(&mut out, public.address);
            write_str(&mut out, &public.name);
        }

        write_u32(&mut out, self.functions.len() as u32);
        for func in &self.functions {
            write_u64(&mut out, func.address);
            write_u64(&mut out, func.size);
            write_str(&mut out, &func.name);

            write_u32(&mut out, func.lines.len() as u32);
            for line in &func.lines {
                write_u64(&mut out, line.address);
                write_u64(&mut out, line.size);
                write_u64(&mut out, line.line);
                write_u32(&mut out, line.file);
            }

            write_u32(&mut out, func.inlines.len() as u32);
            for inline in &func.inlines {
                write_u32(&mut out, inline.depth);
                write_u64(&mut out, inline.address);
                write_u64(&mut out, inline.size);
                write_u64(&mut out, inline.call_line);
                write_u32(&mut out, inline.call_file);
                write_u32(&mut out, inline.name);
            }
        }

        out
    }

    /// Loads a symcache from its persisted blob form.
    pub fn parse(data: &[u8]) -> Result<Self, SymCacheError> {
        let mut reader = Reader { data, pos: 0 };

        let magic = reader.bytes(4)?;
        if magic != SYMCACHE_MAGIC {
            return Err(SymCacheError::BadMagic);
        }

        let version = reader.u32()?;
        if version != SYMCACHE_VERSION {
            return Err(SymCacheError::UnsupportedVersion(version));
        }

        let module_name = reader.str()?;

        let files = reader.vec(|r| r.str())?;
        let inline_origins = reader.vec(|r| r.str())?;

        let publics = reader.vec(|r| {
            Ok(PublicSymbol {
                address: r.u64()?,
                name: r.str()?,
            })
        })?;

        let functions = reader.vec(|r| {
            let address = r.u64()?;
            let size = r.u64()?;
            let name = r.str()?;
            let lines = r.vec(|r| {
                Ok(LineEntry {
                    address: r.u64()?,
                    size: r.u64()?,
                    line: r.u64()?,
                    file: r.u32()?,
                })
            })?;
            let inlines = r.vec(|r| {
                Ok(InlineEntry {
                    depth: r.u32()?,
                    address: r.u64()?,
                    size: r.u64()?,
                    call_line: r.u64()?,
                    call_file: r.u32()?,
                    name: r.u32()?,
                })
            })?;

            Ok(Function {
                address,
                size,
                name,
                lines,
                inlines,
            })
        })?;

        if !reader.is_empty() {
            return Err(SymCacheError::Corrupt);
        }

        Ok(SymCache {
            module_name,
            files,
            inline_origins,
            functions,
            publics,
        })
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

struct Reader<'d> {
    data: &'d [u8],
    pos: usize,
}

impl<'d> Reader<'d> {
    fn bytes(&mut self, len: usize) -> Result<&'d [u8], SymCacheError> {
        let end = self.pos.checked_add(len).ok_or(SymCacheError::Corrupt)?;
        let slice = self.data.get(self.pos..end).ok_or(SymCacheError::Corrupt)?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, SymCacheError> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, SymCacheError> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String, SymCacheError> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SymCacheError::Corrupt)
    }

    fn vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, SymCacheError>,
    ) -> Result<Vec<T>, SymCacheError> {
        let len = self.u32()? as usize;
        // sanity bound so corrupt counts do not allocate unbounded memory
        if len > self.data.len() {
            return Err(SymCacheError::Corrupt);
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symfile;

    const DEBUG_ID: &str = "44E4EC8C2F41492B9369D6B9A059577C2";

    fn build(input: &str) -> SymCache {
        let module = ModuleRef::new("xul.pdb", DEBUG_ID).unwrap();
        let sym = symfile::parse(DEBUG_ID, input.as_bytes()).unwrap();
        SymCache::build(&module, sym)
    }

    fn header() -> String {
        format!("MODULE windows x86_64 {DEBUG_ID} xul.pdb\n")
    }

    #[test]
    fn test_basic_lookup() {
        let cache = build(&format!(
            "{}FILE 7 src/foo.cpp\n\
             FUNC 1200 100 0 foo\n\
             1234 8 42 7\n",
            header()
        ));

        let frames = cache.lookup(0x1234);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function, "foo");
        assert_eq!(frames[0].sym_addr, 0x1200);
        assert_eq!(frames[0].file.as_deref(), Some("src/foo.cpp"));
        assert_eq!(frames[0].line, Some(42));
    }

    #[test]
    fn test_lookup_outside_any_range() {
        let cache = build(&format!("{}FUNC 1200 100 0 foo\n", header()));
        assert!(cache.lookup(0x100).is_empty());
        assert!(cache.lookup(0x1300).is_empty());
    }

    #[test]
    fn test_function_without_line_records() {
        let cache = build(&format!("{}FUNC 1200 100 0 foo\n", header()));
        let frames = cache.lookup(0x1250);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function, "foo");
        assert_eq!(frames[0].file, None);
        assert_eq!(frames[0].line, None);
    }

    #[test]
    fn test_inline_chain_innermost_first() {
        // outer (line 42) calls mid at line 21, mid calls leaf at line 33
        let cache = build(&format!(
            "{}FILE 1 outer.cpp\n\
             FILE 2 mid.cpp\n\
             FILE 3 leaf.cpp\n\
             INLINE_ORIGIN 0 mid\n\
             INLINE_ORIGIN 1 leaf\n\
             FUNC 1000 100 0 outer\n\
             INLINE 0 21 1 0 1010 20\n\
             INLINE 1 33 2 1 1010 8\n\
             1010 8 7 3\n",
            header()
        ));

        let frames = cache.lookup(0x1012);
        assert_eq!(frames.len(), 3);

        // innermost: the leaf body, located by the line record
        assert_eq!(frames[0].function, "leaf");
        assert_eq!(frames[0].file.as_deref(), Some("leaf.cpp"));
        assert_eq!(frames[0].line, Some(7));

        // the mid frame is located at the call site of leaf
        assert_eq!(frames[1].function, "mid");
        assert_eq!(frames[1].file.as_deref(), Some("mid.cpp"));
        assert_eq!(frames[1].line, Some(33));

        // the outer function is located at the call site of mid
        assert_eq!(frames[2].function, "outer");
        assert_eq!(frames[2].file.as_deref(), Some("outer.cpp"));
        assert_eq!(frames[2].line, Some(21));
    }

    #[test]
    fn test_inline_range_not_covering_offset() {
        let cache = build(&format!(
            "{}FILE 1 outer.cpp\n\
             INLINE_ORIGIN 0 helper\n\
             FUNC 1000 100 0 outer\n\
             INLINE 0 21 1 0 1010 8\n\
             1040 8 50 1\n",
            header()
        ));

        let frames = cache.lookup(0x1044);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function, "outer");
        assert_eq!(frames[0].line, Some(50));
    }

    #[test]
    fn test_public_fallback() {
        let cache = build(&format!(
            "{}FUNC 1000 10 0 foo\n\
             PUBLIC 2000 0 entry_point\n",
            header()
        ));

        let frames = cache.lookup(0x2034);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].function, "entry_point");
        assert_eq!(frames[0].sym_addr, 0x2000);
        assert_eq!(frames[0].file, None);
        assert_eq!(frames[0].line, None);
    }

    #[test]
    fn test_public_clamped_by_next_symbol() {
        let cache = build(&format!(
            "{}PUBLIC 1000 0 first\n\
             PUBLIC 2000 0 second\n\
             FUNC 1800 10 0 func\n",
            header()
        ));

        assert_eq!(cache.lookup(0x1400)[0].function, "first");
        // the function at 0x1800 ends the coverage of `first`
        assert!(cache.lookup(0x1900).is_empty());
        assert_eq!(cache.lookup(0x2400)[0].function, "second");
    }

    #[test]
    fn test_overlapping_functions_last_wins() {
        let cache = build(&format!(
            "{}FUNC 1000 100 0 first\n\
             FUNC 1050 100 0 second\n",
            header()
        ));

        assert_eq!(cache.lookup(0x1020)[0].function, "first");
        assert_eq!(cache.lookup(0x1060)[0].function, "second");

        let cache = build(&format!(
            "{}FUNC 1000 100 0 first\n\
             FUNC 1000 80 0 second\n",
            header()
        ));
        assert_eq!(cache.lookup(0x1010)[0].function, "second");
    }

    #[test]
    fn test_same_depth_overlapping_inlines_last_wins() {
        let cache = build(&format!(
            "{}INLINE_ORIGIN 0 first\n\
             INLINE_ORIGIN 1 second\n\
             FUNC 1000 100 0 outer\n\
             INLINE 0 10 0 0 1000 40\n\
             INLINE 0 20 0 1 1000 40\n",
            header()
        ));

        let frames = cache.lookup(0x1010);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].function, "second");
    }

    #[test]
    fn test_module_name_from_code_id() {
        let cache = build(&format!(
            "{}INFO CODE_ID 58E275E89000 xul.dll\nFUNC 1000 10 0 foo\n",
            header()
        ));
        assert_eq!(cache.module_name(), "xul.dll");

        let cache = build(&format!("{}FUNC 1000 10 0 foo\n", header()));
        assert_eq!(cache.module_name(), "xul.pdb");
    }

    #[test]
    fn test_demangles_mangled_names() {
        let cache = build(&format!("{}FUNC 1000 10 0 _ZN3foo3barEv\n", header()));
        assert_eq!(cache.lookup(0x1000)[0].function, "foo::bar");
    }

    #[test]
    fn test_plain_names_left_alone() {
        let cache = build(&format!("{}FUNC 1000 10 0 main\n", header()));
        assert_eq!(cache.lookup(0x1000)[0].function, "main");
    }

    #[test]
    fn test_blob_round_trip() {
        let cache = build(&format!(
            "{}FILE 7 src/foo.cpp\n\
             INLINE_ORIGIN 0 helper\n\
             FUNC 1200 100 0 foo\n\
             INLINE 0 21 7 0 1210 10\n\
             1234 8 42 7\n\
             PUBLIC 2000 0 entry_point\n",
            header()
        ));

        let blob = cache.to_bytes();
        assert_eq!(&blob[..4], &SYMCACHE_MAGIC);

        let restored = SymCache::parse(&blob).unwrap();
        assert_eq!(restored, cache);
        assert_eq!(restored.lookup(0x1234), cache.lookup(0x1234));
    }

    #[test]
    fn test_blob_rejects_bad_magic() {
        assert_eq!(
            SymCache::parse(b"NOPE\x01\x00\x00\x00"),
            Err(SymCacheError::BadMagic)
        );
    }

    #[test]
    fn test_blob_rejects_other_version() {
        let cache = build(&format!("{}FUNC 1000 10 0 foo\n", header()));
        let mut blob = cache.to_bytes();
        blob[4..8].copy_from_slice(&(SYMCACHE_VERSION + 1).to_le_bytes());

        assert_eq!(
            SymCache::parse(&blob),
            Err(SymCacheError::UnsupportedVersion(SYMCACHE_VERSION + 1))
        );
    }

    #[test]
    fn test_blob_rejects_truncation() {
        let cache = build(&format!("{}FUNC 1000 10 0 foo\n", header()));
        let blob = cache.to_bytes();
        assert_eq!(
            SymCache::parse(&blob[..blob.len() - 1]),
            Err(SymCacheError::Corrupt)
        );
    }
}
