//! Shared helpers for integration tests: a small ELF image writer.
//!
//! Images are laid out as header, program headers, section contents,
//! `.symtab`/`.strtab`, `.shstrtab` and finally the section header table.

#![allow(dead_code)]

use std::io::Write;

use object::elf;

/// Writes integers in the image's byte order.
#[derive(Debug, Clone, Copy)]
pub struct Layout
{
    pub is_64: bool,
    pub big_endian: bool,
}

impl Layout
{
    pub fn u16(self, out: &mut Vec<u8>, value: u16)
    {
        out.extend_from_slice(&if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() });
    }

    pub fn u32(self, out: &mut Vec<u8>, value: u32)
    {
        out.extend_from_slice(&if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() });
    }

    pub fn u64(self, out: &mut Vec<u8>, value: u64)
    {
        out.extend_from_slice(&if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() });
    }

    /// A 4- or 8-byte address-sized field.
    pub fn word(self, out: &mut Vec<u8>, value: u64)
    {
        if self.is_64 {
            self.u64(out, value);
        } else {
            self.u32(out, u32::try_from(value).expect("value fits ELF32 word"));
        }
    }
}

#[derive(Debug, Clone)]
struct Section
{
    name: String,
    kind: u32,
    flags: u64,
    address: u64,
    data: Vec<u8>,
    /// Size recorded for `SHT_NOBITS` sections
    size: Option<u64>,
}

#[derive(Debug, Clone)]
struct Symbol
{
    name: String,
    value: u64,
    size: u64,
    kind: u8,
    shndx: u16,
}

/// Builder for test ELF images.
#[derive(Debug, Clone)]
pub struct ElfBuilder
{
    layout: Layout,
    machine: u16,
    flags: u32,
    sections: Vec<Section>,
    symbols: Vec<Symbol>,
    dynamic: bool,
    loads: Vec<(u64, u64)>,
    overflow: bool,
}

impl ElfBuilder
{
    pub fn new(is_64: bool, big_endian: bool) -> Self
    {
        Self {
            layout: Layout { is_64, big_endian },
            machine: if is_64 { elf::EM_X86_64 } else { elf::EM_386 },
            flags: 0,
            sections: Vec::new(),
            symbols: Vec::new(),
            dynamic: false,
            loads: Vec::new(),
            overflow: false,
        }
    }

    /// 64-bit little-endian, the common case.
    pub fn elf64() -> Self
    {
        Self::new(true, false)
    }

    pub fn layout(&self) -> Layout
    {
        self.layout
    }

    pub fn machine(mut self, machine: u16, flags: u32) -> Self
    {
        self.machine = machine;
        self.flags = flags;
        self
    }

    pub fn section(mut self, name: &str, kind: u32, data: impl Into<Vec<u8>>) -> Self
    {
        self.sections.push(Section {
            name: name.to_string(),
            kind,
            flags: 0,
            address: 0,
            data: data.into(),
            size: None,
        });
        self
    }

    pub fn section_at(mut self, name: &str, kind: u32, address: u64, data: impl Into<Vec<u8>>) -> Self
    {
        self = self.section(name, kind, data);
        if let Some(last) = self.sections.last_mut() {
            last.address = address;
        }
        self
    }

    pub fn nobits(mut self, name: &str, size: u64) -> Self
    {
        self.sections.push(Section {
            name: name.to_string(),
            kind: elf::SHT_NOBITS,
            flags: 0,
            address: 0,
            data: Vec::new(),
            size: Some(size),
        });
        self
    }

    pub fn function(self, name: &str, value: u64, size: u64) -> Self
    {
        self.symbol(name, value, size, elf::STT_FUNC, 1)
    }

    pub fn symbol(mut self, name: &str, value: u64, size: u64, kind: u8, shndx: u16) -> Self
    {
        self.symbols.push(Symbol {
            name: name.to_string(),
            value,
            size,
            kind,
            shndx,
        });
        self
    }

    /// Emit the symbols as `.dynsym`/`.dynstr` instead of `.symtab`/`.strtab`.
    pub fn dynamic_symbols(mut self) -> Self
    {
        self.dynamic = true;
        self
    }

    pub fn load(mut self, vaddr: u64, memsz: u64) -> Self
    {
        self.loads.push((vaddr, memsz));
        self
    }

    /// Store the section count and string table index in section 0.
    pub fn overflow_encoding(mut self) -> Self
    {
        self.overflow = true;
        self
    }

    pub fn build_id(self, id: &[u8]) -> Self
    {
        let note = self.note(elf::NT_GNU_BUILD_ID, b"GNU\0", id);
        self.section(".note.gnu.build-id", elf::SHT_NOTE, note)
    }

    pub fn note(&self, kind: u32, name: &[u8], desc: &[u8]) -> Vec<u8>
    {
        let mut out = Vec::new();
        self.layout.u32(&mut out, name.len() as u32);
        self.layout.u32(&mut out, desc.len() as u32);
        self.layout.u32(&mut out, kind);
        out.extend_from_slice(name);
        pad(&mut out, 4);
        out.extend_from_slice(desc);
        pad(&mut out, 4);
        out
    }

    /// `.gnu_debuglink` naming `name`; `crc` of `None` leaves the CRC out.
    pub fn debug_link(self, name: &str, crc: Option<u32>) -> Self
    {
        let mut data = name.as_bytes().to_vec();
        data.push(0);
        if let Some(crc) = crc {
            pad(&mut data, 4);
            self.layout.u32(&mut data, crc);
        }
        self.section(".gnu_debuglink", elf::SHT_PROGBITS, data)
    }

    pub fn alt_link(self, path: &str, build_id: &[u8]) -> Self
    {
        let mut data = path.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(build_id);
        self.section(".gnu_debugaltlink", elf::SHT_PROGBITS, data)
    }

    /// An `SHF_COMPRESSED` section with a `Chdr` of type `kind`.
    pub fn compressed(self, name: &str, kind: u32, size: u64, payload: &[u8]) -> Self
    {
        let mut data = Vec::new();
        self.layout.u32(&mut data, kind);
        if self.layout.is_64 {
            self.layout.u32(&mut data, 0);
            self.layout.u64(&mut data, size);
            self.layout.u64(&mut data, 1);
        } else {
            self.layout.u32(&mut data, size as u32);
            self.layout.u32(&mut data, 1);
        }
        data.extend_from_slice(payload);
        self.section(name, elf::SHT_PROGBITS, data)
            .flags(u64::from(elf::SHF_COMPRESSED))
    }

    /// Set `sh_flags` of the section added last.
    pub fn flags(mut self, flags: u64) -> Self
    {
        if let Some(last) = self.sections.last_mut() {
            last.flags = flags;
        }
        self
    }

    pub fn build(&self) -> Vec<u8>
    {
        let l = self.layout;
        let header_size: usize = if l.is_64 { 64 } else { 52 };
        let ph_size: usize = if l.is_64 { 56 } else { 32 };
        let sh_size: usize = if l.is_64 { 64 } else { 40 };
        let sym_size: usize = if l.is_64 { 24 } else { 16 };

        let mut sections = self.sections.clone();
        let mut links = vec![0u32; sections.len()];

        if !self.symbols.is_empty() {
            let mut strings = vec![0u8];
            let mut table = vec![0u8; sym_size];
            for sym in &self.symbols {
                let name = strings.len() as u32;
                strings.extend_from_slice(sym.name.as_bytes());
                strings.push(0);
                let info = (elf::STB_GLOBAL << 4) | sym.kind;
                if l.is_64 {
                    l.u32(&mut table, name);
                    table.push(info);
                    table.push(0);
                    l.u16(&mut table, sym.shndx);
                    l.u64(&mut table, sym.value);
                    l.u64(&mut table, sym.size);
                } else {
                    l.u32(&mut table, name);
                    l.u32(&mut table, sym.value as u32);
                    l.u32(&mut table, sym.size as u32);
                    table.push(info);
                    table.push(0);
                    l.u16(&mut table, sym.shndx);
                }
            }
            let (symtab, strtab, kind) = if self.dynamic {
                (".dynsym", ".dynstr", elf::SHT_DYNSYM)
            } else {
                (".symtab", ".strtab", elf::SHT_SYMTAB)
            };
            // Indexes count the null section.
            let strtab_index = sections.len() as u32 + 2;
            sections.push(Section {
                name: symtab.into(),
                kind,
                flags: 0,
                address: 0,
                data: table,
                size: None,
            });
            links.push(strtab_index);
            sections.push(Section {
                name: strtab.into(),
                kind: elf::SHT_STRTAB,
                flags: 0,
                address: 0,
                data: strings,
                size: None,
            });
            links.push(0);
        }

        let mut names = vec![0u8];
        let mut name_offsets = Vec::new();
        for section in &sections {
            name_offsets.push(names.len() as u32);
            names.extend_from_slice(section.name.as_bytes());
            names.push(0);
        }
        let shstrtab_name = names.len() as u32;
        names.extend_from_slice(b".shstrtab\0");
        name_offsets.push(shstrtab_name);
        sections.push(Section {
            name: ".shstrtab".into(),
            kind: elf::SHT_STRTAB,
            flags: 0,
            address: 0,
            data: names,
            size: None,
        });
        links.push(0);

        let count = sections.len() + 1;
        let shstrndx = sections.len() as u32;

        // Contents
        let phoff = if self.loads.is_empty() { 0 } else { header_size };
        let mut body = Vec::new();
        let mut offsets = Vec::new();
        let content_start = header_size + ph_size * self.loads.len();
        for section in &sections {
            while (content_start + body.len()) % 8 != 0 {
                body.push(0);
            }
            offsets.push((content_start + body.len()) as u64);
            body.extend_from_slice(&section.data);
        }
        while (content_start + body.len()) % 8 != 0 {
            body.push(0);
        }
        let shoff = content_start + body.len();

        let mut out = Vec::new();
        out.extend_from_slice(&elf::ELFMAG);
        out.push(if l.is_64 { elf::ELFCLASS64 } else { elf::ELFCLASS32 });
        out.push(if l.big_endian { elf::ELFDATA2MSB } else { elf::ELFDATA2LSB });
        out.push(elf::EV_CURRENT);
        out.resize(16, 0);
        l.u16(&mut out, elf::ET_DYN);
        l.u16(&mut out, self.machine);
        l.u32(&mut out, u32::from(elf::EV_CURRENT));
        l.word(&mut out, 0);
        l.word(&mut out, phoff as u64);
        l.word(&mut out, shoff as u64);
        l.u32(&mut out, self.flags);
        l.u16(&mut out, header_size as u16);
        l.u16(&mut out, ph_size as u16);
        l.u16(&mut out, self.loads.len() as u16);
        l.u16(&mut out, sh_size as u16);
        if self.overflow {
            l.u16(&mut out, 0);
            l.u16(&mut out, elf::SHN_XINDEX);
        } else {
            l.u16(&mut out, count as u16);
            l.u16(&mut out, shstrndx as u16);
        }
        assert_eq!(out.len(), header_size);

        for &(vaddr, memsz) in &self.loads {
            if l.is_64 {
                l.u32(&mut out, elf::PT_LOAD);
                l.u32(&mut out, elf::PF_R | elf::PF_X);
                l.u64(&mut out, 0);
                l.u64(&mut out, vaddr);
                l.u64(&mut out, vaddr);
                l.u64(&mut out, 0);
                l.u64(&mut out, memsz);
                l.u64(&mut out, 0x1000);
            } else {
                l.u32(&mut out, elf::PT_LOAD);
                l.u32(&mut out, 0);
                l.u32(&mut out, vaddr as u32);
                l.u32(&mut out, vaddr as u32);
                l.u32(&mut out, 0);
                l.u32(&mut out, memsz as u32);
                l.u32(&mut out, elf::PF_R | elf::PF_X);
                l.u32(&mut out, 0x1000);
            }
        }
        out.extend_from_slice(&body);

        // Section 0 carries the overflow fields when requested.
        let (count0, link0) = if self.overflow { (count as u64, shstrndx) } else { (0, 0) };
        write_section_header(l, &mut out, 0, 0, 0, 0, 0, count0, link0, 0);
        for (i, section) in sections.iter().enumerate() {
            let entsize = match section.kind {
                elf::SHT_SYMTAB | elf::SHT_DYNSYM => sym_size as u64,
                _ => 0,
            };
            let size = section.size.unwrap_or(section.data.len() as u64);
            let offset = if section.kind == elf::SHT_NOBITS { 0 } else { offsets[i] };
            write_section_header(
                l,
                &mut out,
                name_offsets[i],
                section.kind,
                section.flags,
                section.address,
                offset,
                size,
                links[i],
                entsize,
            );
        }
        out
    }
}

#[allow(clippy::too_many_arguments)]
fn write_section_header(
    l: Layout,
    out: &mut Vec<u8>,
    name: u32,
    kind: u32,
    flags: u64,
    address: u64,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
)
{
    l.u32(out, name);
    l.u32(out, kind);
    l.word(out, flags);
    l.word(out, address);
    l.word(out, offset);
    l.word(out, size);
    l.u32(out, link);
    l.u32(out, 0);
    l.word(out, 1);
    l.word(out, entsize);
}

fn pad(out: &mut Vec<u8>, align: usize)
{
    while out.len() % align != 0 {
        out.push(0);
    }
}

/// zlib stream of `data` from an independent encoder.
pub fn zlib(data: &[u8]) -> Vec<u8>
{
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Legacy `.zdebug` payload: `"ZLIB"`, big-endian length, zlib stream.
pub fn zdebug(data: &[u8]) -> Vec<u8>
{
    let mut out = b"ZLIB".to_vec();
    out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    out.extend_from_slice(&zlib(data));
    out
}

pub fn zstd(data: &[u8]) -> Vec<u8>
{
    zstd::stream::encode_all(data, 3).unwrap()
}

/// XZ stream with the given integrity check.
pub fn xz(data: &[u8], check: xz2::stream::Check) -> Vec<u8>
{
    let stream = xz2::stream::Stream::new_easy_encoder(6, check).unwrap();
    let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// The two-function image used throughout: `foo@0x1000+0x20`, `bar@0x1050+0x10`.
pub fn foo_bar() -> ElfBuilder
{
    ElfBuilder::elf64()
        .nobits(".text", 0x100)
        .function("foo", 0x1000, 0x20)
        .function("bar", 0x1050, 0x10)
        .load(0x1000, 0x100)
}

/// What a [`RecordingLoader`] was asked to load.
#[derive(Debug, Clone)]
pub struct Recorded
{
    pub base_address: u64,
    pub info: Vec<u8>,
    pub supplementary_str: Option<Vec<u8>>,
}

/// DWARF loader that records requests and answers with one fixed frame.
#[derive(Debug, Clone, Default)]
pub struct RecordingLoader
{
    pub requests: std::sync::Arc<std::sync::Mutex<Vec<Recorded>>>,
}

impl RecordingLoader
{
    pub fn recorded(&self) -> Vec<Recorded>
    {
        self.requests.lock().unwrap().clone()
    }
}

impl symtrace_core::dwarf::DwarfLoader for RecordingLoader
{
    fn load(
        &self,
        request: symtrace_core::dwarf::DwarfRequest<'_>,
    ) -> symtrace_core::Result<Box<dyn symtrace_core::dwarf::LineResolver>>
    {
        use symtrace_core::dwarf::DebugSection;

        self.requests.lock().unwrap().push(Recorded {
            base_address: request.base_address,
            info: request.sections.get(DebugSection::Info).unwrap_or_default().to_vec(),
            supplementary_str: request
                .supplementary
                .and_then(|sup| sup.get(DebugSection::Str))
                .map(<[u8]>::to_vec),
        });
        Ok(Box::new(FixedResolver {
            base_address: request.base_address,
        }))
    }
}

/// Reports `inlined` at `src/lib.rs:7` inside `foo` for link-time 0x1000..0x1020.
pub struct FixedResolver
{
    base_address: u64,
}

impl symtrace_core::dwarf::LineResolver for FixedResolver
{
    fn find_frames(&self, address: u64) -> symtrace_core::SourceFrames
    {
        use symtrace_core::types::{SourceFrame, SourceLocation, SymbolLanguage, SymbolName};

        let mut frames = symtrace_core::SourceFrames::new();
        let probe = address.wrapping_sub(self.base_address);
        if (0x1000..0x1020).contains(&probe) {
            frames.push(SourceFrame {
                function: Some(SymbolName::new("inlined".into(), None, SymbolLanguage::C)),
                location: Some(SourceLocation {
                    file: "src/lib.rs".into(),
                    line: Some(7),
                    column: None,
                }),
            });
            frames.push(SourceFrame {
                function: Some(SymbolName::new("foo".into(), None, SymbolLanguage::C)),
                location: None,
            });
        }
        frames
    }
}

/// Write `bytes` to `dir/name`, creating parent directories.
pub fn write_file(dir: &std::path::Path, name: &str, bytes: &[u8]) -> std::path::PathBuf
{
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, bytes).unwrap();
    path
}
