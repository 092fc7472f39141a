/* raplink test-only ELF assembler
 *
 * Builds minimal 32-bit little-endian relocatable ELF files byte by byte so
 * the tests can exercise parsing, cataloging and packaging against known
 * inputs without shipping binary fixtures.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

pub const EM_386: u16 = 3;

const EHDR_SIZE: usize = 52;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;

pub struct TestSection
{
    pub name: String,
    pub section_type: u32,
    pub flags: u64,
    pub alignment: u32,
    pub data: Vec<u8>   /* for SHT_NOBITS only the length is used */
}

pub struct TestSymbol
{
    pub name: String,
    pub value: u32,
    pub info: u8,
    pub shndx: usize   /* 1-based index among the supplied sections */
}

pub fn section(name: &str, section_type: u32, flags: u64, alignment: u32, data: Vec<u8>) -> TestSection
{
    TestSection { name: String::from(name), section_type, flags, alignment, data }
}

pub fn symbol(name: &str, value: u32, info: u8, shndx: usize) -> TestSymbol
{
    TestSymbol { name: String::from(name), value, info, shndx }
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) { bytes.extend_from_slice(&value.to_le_bytes()); }
fn push_u32(bytes: &mut Vec<u8>, value: u32) { bytes.extend_from_slice(&value.to_le_bytes()); }

/* append a string to a string table, returning its offset */
fn intern(table: &mut Vec<u8>, name: &str) -> u32
{
    let offset = table.len() as u32;
    table.extend_from_slice(name.as_bytes());
    table.push(0);
    offset
}

struct ShdrEntry
{
    name: u32,
    section_type: u32,
    flags: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    alignment: u32,
    entsize: u32
}

/* assemble an ET_REL ELF32 LSB image from the given sections and symbols.
   section layout: null, the supplied sections in order, .symtab, .strtab,
   .shstrtab, then the section header table */
pub fn build(machine: u16, sections: &[TestSection], symbols: &[TestSymbol]) -> Vec<u8>
{
    let strtab_index = sections.len() + 2;
    let shstrtab_index = sections.len() + 3;
    let section_count = sections.len() + 4;

    /* string tables start with a NUL so offset zero is the empty name */
    let mut strtab = vec![0u8];
    let mut shstrtab = vec![0u8];

    /* the symbol table leads with the mandatory null entry */
    let mut symtab = vec![0u8; SYM_SIZE];
    for sym in symbols
    {
        let name = intern(&mut strtab, &sym.name);
        push_u32(&mut symtab, name);
        push_u32(&mut symtab, sym.value);
        push_u32(&mut symtab, 0);
        symtab.push(sym.info);
        symtab.push(0);
        push_u16(&mut symtab, sym.shndx as u16);
    }

    let mut headers = vec![ShdrEntry
    {
        name: 0, section_type: 0, flags: 0, offset: 0, size: 0,
        link: 0, info: 0, alignment: 0, entsize: 0
    }];

    let mut body: Vec<u8> = Vec::new();
    let mut offset = EHDR_SIZE as u32;

    for sec in sections
    {
        let name = intern(&mut shstrtab, &sec.name);
        let size = sec.data.len() as u32;

        headers.push(ShdrEntry
        {
            name,
            section_type: sec.section_type,
            flags: sec.flags as u32,
            offset,
            size,
            link: 0,
            info: 0,
            alignment: sec.alignment,
            entsize: 0
        });

        /* nobits sections occupy no file bytes */
        if sec.section_type != super::elf::SHT_NOBITS
        {
            body.extend_from_slice(&sec.data);
            offset += size;
        }
    }

    let symtab_name = intern(&mut shstrtab, ".symtab");
    let strtab_name = intern(&mut shstrtab, ".strtab");
    let shstrtab_name = intern(&mut shstrtab, ".shstrtab");

    headers.push(ShdrEntry
    {
        name: symtab_name,
        section_type: super::elf::SHT_SYMTAB,
        flags: 0,
        offset,
        size: symtab.len() as u32,
        link: strtab_index as u32,
        info: 1,
        alignment: 4,
        entsize: SYM_SIZE as u32
    });
    body.extend_from_slice(&symtab);
    offset += symtab.len() as u32;

    headers.push(ShdrEntry
    {
        name: strtab_name,
        section_type: super::elf::SHT_STRTAB,
        flags: 0,
        offset,
        size: strtab.len() as u32,
        link: 0,
        info: 0,
        alignment: 1,
        entsize: 0
    });
    body.extend_from_slice(&strtab);
    offset += strtab.len() as u32;

    headers.push(ShdrEntry
    {
        name: shstrtab_name,
        section_type: super::elf::SHT_STRTAB,
        flags: 0,
        offset,
        size: shstrtab.len() as u32,
        link: 0,
        info: 0,
        alignment: 1,
        entsize: 0
    });
    body.extend_from_slice(&shstrtab);
    offset += shstrtab.len() as u32;

    let shoff = offset;

    let mut image = Vec::with_capacity(EHDR_SIZE + body.len() + headers.len() * SHDR_SIZE);

    /* e_ident: magic, ELFCLASS32, ELFDATA2LSB, EV_CURRENT */
    image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    image.extend_from_slice(&[0u8; 8]);

    push_u16(&mut image, 1);        /* e_type = ET_REL */
    push_u16(&mut image, machine);
    push_u32(&mut image, 1);        /* e_version */
    push_u32(&mut image, 0);        /* e_entry */
    push_u32(&mut image, 0);        /* e_phoff */
    push_u32(&mut image, shoff);
    push_u32(&mut image, 0);        /* e_flags */
    push_u16(&mut image, EHDR_SIZE as u16);
    push_u16(&mut image, 0);        /* e_phentsize */
    push_u16(&mut image, 0);        /* e_phnum */
    push_u16(&mut image, SHDR_SIZE as u16);
    push_u16(&mut image, section_count as u16);
    push_u16(&mut image, shstrtab_index as u16);

    image.extend_from_slice(&body);

    for hdr in &headers
    {
        push_u32(&mut image, hdr.name);
        push_u32(&mut image, hdr.section_type);
        push_u32(&mut image, hdr.flags);
        push_u32(&mut image, 0);    /* sh_addr */
        push_u32(&mut image, hdr.offset);
        push_u32(&mut image, hdr.size);
        push_u32(&mut image, hdr.link);
        push_u32(&mut image, hdr.info);
        push_u32(&mut image, hdr.alignment);
        push_u32(&mut image, hdr.entsize);
    }

    image
}
