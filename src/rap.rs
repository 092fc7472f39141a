/* raplink RAP application image builder
 *
 * Classifies each input object's ELF sections into the six canonical groups
 * (text, const, ctor, dtor, data, bss), folds the per-object group metrics
 * into image-wide totals, collects the externally visible symbols into a
 * symbol and string table, and streams the lot through the compressor into
 * the output file.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use crate::compress::Compressor;
use crate::elf;
use crate::elf::{ SHF_ALLOC, SHF_EXECINSTR, SHF_MERGE, SHF_WRITE };
use crate::elf::{ SHT_NOBITS, SHT_PROGBITS, SHT_SYMTAB };
use crate::elf::{ STB_GLOBAL, STB_WEAK, STT_FUNC, STT_OBJECT };
use crate::error::{ Error, Result };
use crate::files::Image;
use crate::object::Object;
use crate::symbols::Symbol;

/* the six section groups of a RAP file, in serialization order */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SectionGroup
{
    Text = 0,
    Const = 1,
    Ctor = 2,
    Dtor = 3,
    Data = 4,
    Bss = 5
}

pub const GROUP_COUNT: usize = 6;

pub const GROUP_NAMES: [&str; GROUP_COUNT] =
[
    ".text",
    ".const",
    ".ctor",
    ".dtor",
    ".data",
    ".bss"
];

/* bss carries no bytes in the package body */
const BODY_GROUPS: [SectionGroup; 5] =
[
    SectionGroup::Text,
    SectionGroup::Const,
    SectionGroup::Ctor,
    SectionGroup::Dtor,
    SectionGroup::Data
];

/* serialized size of one external symbol record */
const EXTERNAL_SIZE: u32 = 12;

/* size, alignment and offset of one group, per object or image-wide */
#[derive(Clone)]
pub struct GroupRecord
{
    pub name: &'static str,
    pub size: u32,
    pub offset: u32,
    pub align: u32
}

impl GroupRecord
{
    fn new(name: &'static str) -> GroupRecord
    {
        GroupRecord { name, size: 0, offset: 0, align: 0 }
    }

    /* seed this record from an object's contributing sections: total size,
       alignment of the first member */
    fn update(&mut self, secs: &[elf::Section])
    {
        if !secs.is_empty()
        {
            self.align = secs[0].alignment;
            self.size = secs.iter().map(|s| s.size as u32).sum();
        }
    }

    /* fold one object's group record into the running image record. all
       contributors must agree on alignment. the offset rounding treats the
       alignment as a log-plus-one exponent: the mask is 2^(align-1)-1 and
       the bump is 2^align. this matches the on-target loader */
    pub fn merge(&mut self, sec: &GroupRecord) -> Result<()>
    {
        if sec.size != 0
        {
            if self.align == 0
            {
                self.align = sec.align;
            }
            else if self.align != sec.align
            {
                return Err(Error::AlignmentMismatch(self.name));
            }

            if self.size != 0 && self.align == 0
            {
                return Err(Error::InvalidAlignment(self.name));
            }

            self.size += sec.size;
            self.offset = sec.offset + sec.size;

            if self.align > 0
            {
                let mask = (1u32 << (self.align - 1)) - 1;
                if self.offset & mask != 0
                {
                    self.offset = (self.offset & !mask) + (1 << self.align);
                }
            }
        }

        Ok(())
    }
}

fn group_records() -> [GroupRecord; GROUP_COUNT]
{
    [
        GroupRecord::new(GROUP_NAMES[0]),
        GroupRecord::new(GROUP_NAMES[1]),
        GroupRecord::new(GROUP_NAMES[2]),
        GroupRecord::new(GROUP_NAMES[3]),
        GroupRecord::new(GROUP_NAMES[4]),
        GroupRecord::new(GROUP_NAMES[5])
    ]
}

/* the section-group breakdown of a single input object */
pub struct RapObject<'a>
{
    pub obj: &'a Object,
    text: Vec<elf::Section>,
    const_data: Vec<elf::Section>,
    ctor: Vec<elf::Section>,
    dtor: Vec<elf::Section>,
    data: Vec<elf::Section>,
    bss: Vec<elf::Section>,
    relocs: Vec<elf::Section>,
    symtab: Vec<elf::Section>,
    strtab: Vec<elf::Section>,
    pub groups: [GroupRecord; GROUP_COUNT],
    pub relocs_size: u32,
    pub symtab_size: u32,
    pub strtab_size: u32
}

impl<'a> RapObject<'a>
{
    /* classify the object's sections. the object is opened and its ELF
       session round-tripped; the section metadata outlives both */
    pub fn new(obj: &'a Object) -> Result<RapObject<'a>>
    {
        obj.open()?;
        let result = (||
        {
            obj.begin()?;
            let gathered = RapObject::gather(obj);
            obj.end();
            gathered
        })();
        obj.close();
        result
    }

    fn gather(obj: &'a Object) -> Result<RapObject<'a>>
    {
        let session = obj.session()?;

        let text = session.sections_matching(SHT_PROGBITS,
                                             (SHF_ALLOC | SHF_EXECINSTR) as u64, 0);
        let const_data = session.sections_matching(SHT_PROGBITS,
                                                   (SHF_ALLOC | SHF_MERGE) as u64,
                                                   (SHF_WRITE | SHF_EXECINSTR) as u64);
        let ctor = session.sections_named(".ctors");
        let dtor = session.sections_named(".dtors");

        /* constructor and destructor tables carry alloc+write flags too;
           they must not land in the data group as well */
        let data: Vec<elf::Section> = session.sections_matching(SHT_PROGBITS,
                                                                (SHF_ALLOC | SHF_WRITE) as u64, 0)
            .into_iter()
            .filter(|s| s.name != ".ctors" && s.name != ".dtors")
            .collect();

        let bss = session.sections_matching(SHT_NOBITS,
                                            (SHF_ALLOC | SHF_WRITE) as u64, 0);
        let symtab = session.sections_of_type(SHT_SYMTAB);
        let strtab = session.sections_named(".strtab");

        /* relocations that patch the executable sections */
        let mut relocs = Vec::new();
        for sec in &text
        {
            relocs.extend(session.sections_named(&format!(".rel{}", sec.name)));
            relocs.extend(session.sections_named(&format!(".rela{}", sec.name)));
        }

        drop(session);

        let mut groups = group_records();
        groups[SectionGroup::Text as usize].update(&text);
        groups[SectionGroup::Const as usize].update(&const_data);
        groups[SectionGroup::Ctor as usize].update(&ctor);
        groups[SectionGroup::Dtor as usize].update(&dtor);
        groups[SectionGroup::Data as usize].update(&data);
        groups[SectionGroup::Bss as usize].update(&bss);

        let relocs_size = relocs.iter().map(|s| s.size as u32).sum();
        let symtab_size = symtab.iter().map(|s| s.size as u32).sum();
        let strtab_size = strtab.iter().map(|s| s.size as u32).sum();

        Ok(RapObject
        {
            obj,
            text, const_data, ctor, dtor, data, bss, relocs, symtab, strtab,
            groups,
            relocs_size, symtab_size, strtab_size
        })
    }

    /* which group does a section index belong to? */
    pub fn find(&self, index: usize) -> Result<SectionGroup>
    {
        let lists: [(&[elf::Section], SectionGroup); GROUP_COUNT] =
        [
            (self.text.as_slice(), SectionGroup::Text),
            (self.const_data.as_slice(), SectionGroup::Const),
            (self.ctor.as_slice(), SectionGroup::Ctor),
            (self.dtor.as_slice(), SectionGroup::Dtor),
            (self.data.as_slice(), SectionGroup::Data),
            (self.bss.as_slice(), SectionGroup::Bss)
        ];

        for (list, group) in lists
        {
            if list.iter().any(|s| s.index == index)
            {
                return Ok(group);
            }
        }

        Err(Error::SectionNotFound { object: self.obj.name().full(), index })
    }

    fn group_sections(&self, group: SectionGroup) -> &[elf::Section]
    {
        match group
        {
            SectionGroup::Text => &self.text,
            SectionGroup::Const => &self.const_data,
            SectionGroup::Ctor => &self.ctor,
            SectionGroup::Dtor => &self.dtor,
            SectionGroup::Data => &self.data,
            SectionGroup::Bss => &self.bss
        }
    }
}

/* one entry of the package's symbol table */
pub struct External
{
    pub name: u32,          /* offset of the name in the string table */
    pub sec: SectionGroup,
    pub value: u32,
    pub data: u8            /* the ELF st_info byte */
}

/* the whole output image: per-object breakdowns, image-wide group records,
   the external symbols and their string table */
pub struct RapImage<'a>
{
    init: String,
    fini: String,
    init_offset: u32,
    fini_offset: u32,
    objs: Vec<RapObject<'a>>,
    groups: [GroupRecord; GROUP_COUNT],
    externs: Vec<External>,
    symtab_size: u32,
    strtab: Vec<u8>,
    relocs_size: u32,
    machine: u16,
    encoding: u8,
    class: u8
}

impl<'a> RapImage<'a>
{
    /* the entry point names go in first: the string table always leads with
       init NUL fini NUL, and every symbol name lands after them */
    pub fn new(init: &str, fini: &str) -> RapImage<'a>
    {
        let mut image = RapImage
        {
            init: String::from(init),
            fini: String::from(fini),
            init_offset: 0,
            fini_offset: 0,
            objs: Vec::new(),
            groups: group_records(),
            externs: Vec::new(),
            symtab_size: 0,
            strtab: Vec::new(),
            relocs_size: 0,
            machine: 0,
            encoding: 0,
            class: 0
        };
        image.seed_strtab();
        image
    }

    fn seed_strtab(&mut self)
    {
        self.strtab.clear();
        self.init_offset = self.strtab.len() as u32;
        self.strtab.extend_from_slice(self.init.as_bytes());
        self.strtab.push(0);
        self.fini_offset = self.strtab.len() as u32;
        self.strtab.extend_from_slice(self.fini.as_bytes());
        self.strtab.push(0);
    }

    fn clear(&mut self)
    {
        self.objs.clear();
        self.groups = group_records();
        self.externs.clear();
        self.symtab_size = 0;
        self.relocs_size = 0;
        self.machine = 0;
        self.encoding = 0;
        self.class = 0;
        self.seed_strtab();
    }

    /* build the per-object breakdowns and fold them, in input order, into
       the image-wide group records, symbol table and string table */
    pub fn layout(&mut self, app_objects: &[&'a Object]) -> Result<()>
    {
        self.clear();

        for obj in app_objects
        {
            self.objs.push(RapObject::new(obj)?);
        }

        for index in 0..self.objs.len()
        {
            self.check_target(index)?;

            for group in 0..GROUP_COUNT
            {
                let record = self.objs[index].groups[group].clone();
                self.groups[group].merge(&record)?;
            }

            self.collect_symbols(index)?;

            self.relocs_size += self.objs[index].relocs_size;
        }

        log::info!("rap layout: text:{} const:{} ctor:{} dtor:{} data:{} bss:{} symbols:{} ({}) strings:{} relocs:{}",
                   self.groups[0].size, self.groups[1].size, self.groups[2].size,
                   self.groups[3].size, self.groups[4].size, self.groups[5].size,
                   self.symtab_size, self.externs.len(), self.strtab.len(), self.relocs_size);

        Ok(())
    }

    /* all inputs must share one machine type, data encoding and class. the
       first object decides, the rest have to agree */
    fn check_target(&mut self, index: usize) -> Result<()>
    {
        let header = self.objs[index].obj.header()?;

        if self.machine == 0
        {
            self.machine = header.machine;
            self.encoding = header.data;
            self.class = header.class;
        }
        else if self.machine != header.machine ||
                self.encoding != header.data ||
                self.class != header.class
        {
            return Err(Error::Elf(format!("{}: mixed machine, class or data encoding",
                                          self.objs[index].obj.name().full())));
        }

        Ok(())
    }

    /* pick out the object's defined data and function symbols with global or
       weak binding. each accepted symbol appends its name to the string
       table and grows the symbol table by one fixed-size record */
    fn collect_symbols(&mut self, index: usize) -> Result<()>
    {
        let externals: Vec<Symbol> = self.objs[index].obj.external_symbols().clone();

        for sym in externals
        {
            let stype = sym.symbol_type();
            let sbind = sym.binding();

            if stype != STT_OBJECT && stype != STT_FUNC
            {
                continue;
            }
            if sbind != STB_GLOBAL && sbind != STB_WEAK
            {
                continue;
            }

            let sec = self.objs[index].find(sym.section_index())?;

            self.externs.push(External
            {
                name: self.strtab.len() as u32,
                sec,
                value: sym.value() as u32,
                data: sym.info()
            });

            self.strtab.extend_from_slice(sym.name().as_bytes());
            self.strtab.push(0);
            self.symtab_size += EXTERNAL_SIZE;
        }

        Ok(())
    }

    /* serialize the image through the compressor: the fixed header, the six
       group records, the section bodies in group order, the string table,
       then the external symbol records */
    pub fn write(&self, comp: &mut Compressor) -> Result<()>
    {
        comp.put_u32(self.machine as u32)?;
        comp.put_u32(self.encoding as u32)?;
        comp.put_u32(self.class as u32)?;

        comp.put_u32(self.init_offset)?;
        comp.put_u32(self.fini_offset)?;

        comp.put_u32(self.symtab_size)?;
        comp.put_u32(self.strtab.len() as u32)?;
        comp.put_u32(0)?;

        for group in &self.groups
        {
            comp.put_u32(group.size)?;
            comp.put_u32(group.align)?;
            comp.put_u32(group.offset)?;
        }

        /* bss is absent: the loader zero-fills it */
        for group in BODY_GROUPS
        {
            for obj in &self.objs
            {
                RapImage::write_sections(comp, obj.obj, obj.group_sections(group))?;
            }
        }

        comp.write(&self.strtab)?;

        for ext in &self.externs
        {
            comp.put_u32(((ext.sec as u32) << 16) | ext.data as u32)?;
            comp.put_u32(ext.name)?;
            comp.put_u32(ext.value)?;
        }

        Ok(())
    }

    /* stream one object's sections for one group, pulling the bytes straight
       from the object file through its (possibly shared) descriptor */
    fn write_sections(comp: &mut Compressor, obj: &Object, secs: &[elf::Section]) -> Result<()>
    {
        if secs.is_empty()
        {
            return Ok(());
        }

        obj.open()?;
        let result = (||
        {
            obj.begin()?;
            let written = (||
            {
                for sec in secs
                {
                    comp.write_stream(obj, sec.offset, sec.size)?;
                }
                Ok(())
            })();
            obj.end();
            written
        })();
        obj.close();
        result
    }

    pub fn group(&self, group: SectionGroup) -> &GroupRecord
    {
        &self.groups[group as usize]
    }

    pub fn externals(&self) -> &[External]
    {
        &self.externs
    }

    pub fn relocations_size(&self) -> u32
    {
        self.relocs_size
    }
}

/* package the application objects into the output image: lay the groups
   out, then stream everything through a compressor with a 2 KiB block */
pub fn write(app: &Image, init: &str, fini: &str, app_objects: &[&Object]) -> Result<()>
{
    let mut comp = Compressor::new(app, 2 * 1024);
    let mut rap = RapImage::new(init, fini);

    rap.layout(app_objects)?;
    rap.write(&mut comp)?;
    comp.flush()?;

    if comp.transferred() > 0
    {
        let pcent = (comp.compressed() * 100) / comp.transferred();
        let premand = ((comp.compressed() * 1000 + 500) / comp.transferred()) % 10;
        log::info!("rap: objects: {}, size: {}, compression: {}.{}%",
                   app_objects.len(), comp.compressed(), pcent, premand);
    }

    Ok(())
}
