/* raplink ELF reader
 *
 * Thin wrapper over the goblin parser. An elf::File is the session attached
 * to an open object: the header, section table, raw symbol entries and the
 * retained string-table bytes, lifted out of the object's bytes so the rest
 * of the linker never touches goblin types directly.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashMap;

use goblin::elf::header::{ EI_CLASS, EI_DATA, ET_EXEC, ET_REL };

pub use goblin::elf::section_header::{ SHT_NOBITS, SHT_PROGBITS, SHT_REL, SHT_STRTAB, SHT_SYMTAB };
pub use goblin::elf::section_header::{ SHF_ALLOC, SHF_EXECINSTR, SHF_MERGE, SHF_WRITE };
pub use goblin::elf::sym::{ STB_GLOBAL, STB_LOCAL, STB_WEAK };
pub use goblin::elf::sym::{ STT_FUNC, STT_NOTYPE, STT_OBJECT };

use crate::error::{ Error, Result };
use crate::symbols::Symbol;

/* the section index of an undefined symbol */
pub const SHN_UNDEF: usize = 0;

/* the parts of the ELF header the linker needs after the session closes */
#[derive(Clone)]
pub struct Header
{
    pub machine: u16,    /* e_machine */
    pub data: u8,        /* e_ident data encoding: LSB or MSB */
    pub class: u8,       /* e_ident class: 32 or 64 bit */
    pub shnum: usize,    /* e_shnum */
    pub shstrndx: usize  /* e_shstrndx */
}

/* one section header, with its name resolved */
#[derive(Clone)]
pub struct Section
{
    pub index: usize,
    pub name: String,
    pub section_type: u32,
    pub flags: u64,
    pub offset: u64,
    pub size: u64,
    pub alignment: u32,
    pub link: usize,
    pub entsize: u64
}

/* one raw symbol table entry. the name stays an offset into the linked
   string table until classification resolves it */
struct RawSymbol
{
    name_offset: usize,
    strings: usize,      /* section index of the linked string table */
    value: u64,
    size: u64,
    info: u8,
    shndx: usize
}

/* symbols classified out of one object's symbol table */
pub struct SymbolLoad
{
    pub exported: Vec<Symbol>,
    pub unresolved: Vec<Symbol>
}

pub struct File
{
    header: Header,
    sections: Vec<Section>,
    symbols: Vec<RawSymbol>,
    strings: HashMap<usize, Vec<u8>>  /* SHT_STRTAB contents by section index */
}

impl File
{
    /* parse the bytes of a relocatable or executable ELF into a session.
       => name = input name for error reporting
          bytes = the whole object file */
    pub fn parse(name: &str, bytes: &[u8]) -> Result<File>
    {
        let elf = goblin::elf::Elf::parse(bytes)
            .map_err(|e| Error::Elf(format!("{}: {}", name, e)))?;

        if elf.header.e_type != ET_REL && elf.header.e_type != ET_EXEC
        {
            return Err(Error::Elf(format!("{}: not a relocatable or executable ELF", name)));
        }

        let header = Header
        {
            machine: elf.header.e_machine,
            data: elf.header.e_ident[EI_DATA],
            class: elf.header.e_ident[EI_CLASS],
            shnum: elf.header.e_shnum as usize,
            shstrndx: elf.header.e_shstrndx as usize
        };

        let mut sections = Vec::new();
        let mut strings = HashMap::new();
        let mut symtab_link = None;

        for (index, sh) in elf.section_headers.iter().enumerate()
        {
            let section_name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("");

            sections.push(Section
            {
                index,
                name: String::from(section_name),
                section_type: sh.sh_type,
                flags: sh.sh_flags,
                offset: sh.sh_offset,
                size: sh.sh_size,
                alignment: sh.sh_addralign as u32,
                link: sh.sh_link as usize,
                entsize: sh.sh_entsize
            });

            if sh.sh_type == SHT_STRTAB
            {
                let start = sh.sh_offset as usize;
                let end = start + sh.sh_size as usize;
                if end > bytes.len()
                {
                    return Err(Error::Elf(format!("{}: string table outside file", name)));
                }
                strings.insert(index, Vec::from(&bytes[start..end]));
            }

            if sh.sh_type == SHT_SYMTAB && symtab_link.is_none()
            {
                symtab_link = Some(sh.sh_link as usize);
            }
        }

        let strtab = symtab_link.unwrap_or(0);
        let symbols = elf.syms.iter().map(|sym| RawSymbol
        {
            name_offset: sym.st_name,
            strings: strtab,
            value: sym.st_value,
            size: sym.st_size,
            info: sym.st_info,
            shndx: sym.st_shndx
        }).collect();

        Ok(File { header, sections, symbols, strings })
    }

    pub fn header(&self) -> &Header
    {
        &self.header
    }

    pub fn sections(&self) -> &[Section]
    {
        &self.sections
    }

    /* select sections by type plus required and excluded flag masks */
    pub fn sections_matching(&self, section_type: u32, required: u64, excluded: u64) -> Vec<Section>
    {
        self.sections.iter()
            .filter(|s| s.section_type == section_type)
            .filter(|s| (s.flags & required) == required)
            .filter(|s| (s.flags & excluded) == 0)
            .cloned()
            .collect()
    }

    pub fn sections_of_type(&self, section_type: u32) -> Vec<Section>
    {
        self.sections.iter()
            .filter(|s| s.section_type == section_type)
            .cloned()
            .collect()
    }

    pub fn sections_named(&self, name: &str) -> Vec<Section>
    {
        self.sections.iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /* read a NUL-terminated string out of a retained string table section */
    pub fn get_string(&self, section: usize, offset: usize) -> Result<String>
    {
        let table = self.strings.get(&section)
            .ok_or_else(|| Error::Elf(format!("section {} is not a string table", section)))?;

        if offset >= table.len()
        {
            return Err(Error::Elf(format!("string offset {} outside table {}", offset, section)));
        }

        let terminated = &table[offset..];
        let end = terminated.iter().position(|&b| b == 0).unwrap_or(terminated.len());
        Ok(String::from_utf8_lossy(&terminated[..end]).into_owned())
    }

    /* walk the symbol table sorting symbols into exported and unresolved.
       undefined no-type symbols are unresolved. data, function and no-type
       symbols are exported when their binding is enabled by the flags.
       => object = full name of the owning object, recorded on each export */
    pub fn collect_symbols(&self, object: &str, local: bool, weak: bool, global: bool) -> Result<SymbolLoad>
    {
        let mut load = SymbolLoad { exported: Vec::new(), unresolved: Vec::new() };

        for sym in &self.symbols
        {
            let name = self.get_string(sym.strings, sym.name_offset)?;
            if name.is_empty()
            {
                continue;
            }

            let stype = sym.info & 0xf;
            let sbind = sym.info >> 4;

            if stype == STT_NOTYPE && sym.shndx == SHN_UNDEF
            {
                load.unresolved.push(Symbol::unresolved(&name, sym.info));
            }
            else if (stype == STT_NOTYPE || stype == STT_OBJECT || stype == STT_FUNC) &&
                    ((local && sbind == STB_LOCAL) ||
                     (weak && sbind == STB_WEAK) ||
                     (global && sbind == STB_GLOBAL))
            {
                load.exported.push(Symbol::new(&name, object, sym.value, sym.size,
                                               sym.info, sym.shndx));
            }
        }

        Ok(load)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::testelf;

    fn sample() -> Vec<u8>
    {
        testelf::build(
            testelf::EM_386,
            &[
                testelf::section(".text", SHT_PROGBITS, (SHF_ALLOC | SHF_EXECINSTR) as u64, 2, vec![0x90; 4]),
                testelf::section(".data", SHT_PROGBITS, (SHF_ALLOC | SHF_WRITE) as u64, 4, vec![1, 2, 3, 4])
            ],
            &[
                testelf::symbol("foo", 0, (STB_GLOBAL << 4) | STT_FUNC, 1),
                testelf::symbol("bar", 0, (STB_LOCAL << 4) | STT_OBJECT, 2),
                testelf::symbol("missing", 0, STT_NOTYPE, SHN_UNDEF)
            ])
    }

    #[test]
    fn header_fields_survive_parsing()
    {
        let file = File::parse("sample.o", &sample()).unwrap();
        let header = file.header();
        assert_eq!(header.machine, testelf::EM_386);
        assert_eq!(header.class, 1);  /* ELFCLASS32 */
        assert_eq!(header.data, 1);   /* ELFDATA2LSB */
        assert!(header.shnum >= 5);
    }

    #[test]
    fn sections_select_by_flags_and_name()
    {
        let file = File::parse("sample.o", &sample()).unwrap();

        let text = file.sections_matching(SHT_PROGBITS, (SHF_ALLOC | SHF_EXECINSTR) as u64, 0);
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].name, ".text");
        assert_eq!(text[0].size, 4);
        assert_eq!(text[0].alignment, 2);

        let writable = file.sections_matching(SHT_PROGBITS, (SHF_ALLOC | SHF_WRITE) as u64, 0);
        assert_eq!(writable.len(), 1);
        assert_eq!(writable[0].name, ".data");

        /* excluding the write flag must reject .data */
        let none = file.sections_matching(SHT_PROGBITS,
                                          (SHF_ALLOC | SHF_WRITE) as u64,
                                          SHF_WRITE as u64);
        assert!(none.is_empty());

        assert_eq!(file.sections_named(".strtab").len(), 1);
        assert_eq!(file.sections_of_type(SHT_SYMTAB).len(), 1);
    }

    #[test]
    fn symbols_classify_by_type_and_binding()
    {
        let file = File::parse("sample.o", &sample()).unwrap();

        let load = file.collect_symbols("sample.o", false, true, true).unwrap();
        let exported: Vec<&str> = load.exported.iter().map(|s| s.name()).collect();
        assert_eq!(exported, vec!["foo"]);
        assert_eq!(load.exported[0].object(), "sample.o");

        let unresolved: Vec<&str> = load.unresolved.iter().map(|s| s.name()).collect();
        assert_eq!(unresolved, vec!["missing"]);

        /* asking for locals pulls in bar too */
        let load = file.collect_symbols("sample.o", true, true, true).unwrap();
        let exported: Vec<&str> = load.exported.iter().map(|s| s.name()).collect();
        assert_eq!(exported, vec!["foo", "bar"]);
    }

    #[test]
    fn strings_read_to_the_nul()
    {
        let file = File::parse("sample.o", &sample()).unwrap();
        let symtab = &file.sections_of_type(SHT_SYMTAB)[0];
        assert_eq!(file.get_string(symtab.link, 1).unwrap(), "foo");
    }

    #[test]
    fn truncated_input_is_rejected()
    {
        let bytes = sample();
        assert!(File::parse("cut.o", &bytes[..20]).is_err());
        assert!(File::parse("junk.o", b"not an elf at all").is_err());
    }
}
