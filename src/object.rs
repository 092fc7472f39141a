/* raplink object file handling
 *
 * An Object is an ELF-bearing image, either standalone or a member of an
 * archive. Members delegate open/close to the owning archive's image so all
 * siblings share one descriptor, with the archive's reference count tracking
 * every user. The archive handle is non-owning: the cache keeps archives
 * alive until after the objects are gone.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::cell::{ Ref, RefCell };
use std::rc::{ Rc, Weak };

use crate::archive::Archive;
use crate::elf;
use crate::error::{ Error, Result };
use crate::files::{ FileName, Image, Stream };
use crate::symbols::{ Symbol, SymbolTable };

pub struct Object
{
    image: Image,
    archive: Option<Weak<Archive>>,
    elf: RefCell<Option<elf::File>>,        /* the active ELF session */
    header: RefCell<Option<elf::Header>>,   /* cached at begin, outlives the session */
    unresolved: RefCell<SymbolTable>,
    externals: RefCell<Vec<Symbol>>
}

impl Object
{
    /* a standalone object file on disk */
    pub fn new(path: &str) -> Result<Object>
    {
        let image = Image::from_path(path, true);
        if !image.name().is_valid()
        {
            return Err(Error::NameInvalid("an object"));
        }
        Ok(Object::wrap(image, None))
    }

    /* an object held inside an archive */
    pub fn from_member(archive: &Rc<Archive>, name: FileName) -> Result<Object>
    {
        let image = Image::new(name);
        if !image.name().is_valid()
        {
            return Err(Error::NameInvalid("an object"));
        }
        Ok(Object::wrap(image, Some(Rc::downgrade(archive))))
    }

    fn wrap(image: Image, archive: Option<Weak<Archive>>) -> Object
    {
        Object
        {
            image,
            archive,
            elf: RefCell::new(None),
            header: RefCell::new(None),
            unresolved: RefCell::new(SymbolTable::new()),
            externals: RefCell::new(Vec::new())
        }
    }

    /* run a closure against the image that owns the descriptor: the archive's
       for members, our own otherwise */
    fn backing<R>(&self, action: impl FnOnce(&Image) -> Result<R>) -> Result<R>
    {
        match &self.archive
        {
            Some(weak) =>
            {
                let archive = weak.upgrade()
                    .ok_or_else(|| Error::Internal(format!("archive gone for {}", self.name().full())))?;
                action(archive.image())
            },
            None => action(&self.image)
        }
    }

    pub fn open(&self) -> Result<()>
    {
        log::trace!("object open: {}", self.name().full());
        self.backing(|image| image.open(false))
    }

    pub fn close(&self)
    {
        log::trace!("object close: {}", self.name().full());
        let _ = self.backing(|image| { image.close(); Ok(()) });
    }

    pub fn is_open(&self) -> bool
    {
        self.backing(|image| Ok(image.is_open())).unwrap_or(false)
    }

    pub fn references(&self) -> u32
    {
        self.backing(|image| Ok(image.references())).unwrap_or(0)
    }

    /* position the shared descriptor within this object's virtual stream */
    pub fn seek(&self, offset: u64) -> Result<()>
    {
        let biased = self.image.name().offset() + offset;
        self.backing(|image| image.seek_to(biased))
    }

    pub fn read(&self, buffer: &mut [u8]) -> Result<usize>
    {
        self.backing(|image| image.read(buffer))
    }

    pub fn write(&self, buffer: &[u8]) -> Result<usize>
    {
        self.backing(|image| image.write(buffer))
    }

    pub fn seek_read(&self, offset: u64, buffer: &mut [u8]) -> Result<bool>
    {
        self.seek(offset)?;
        let moved = self.read(buffer)?;
        Ok(moved == buffer.len())
    }

    /* start an ELF session: pull the object's bytes through the descriptor,
       parse them, and cache the header. sessions do not nest */
    pub fn begin(&self) -> Result<()>
    {
        if self.elf.borrow().is_some()
        {
            return Err(Error::Internal(format!("nested elf session on {}", self.name().full())));
        }

        let size = self.image.name().size() as usize;
        let mut bytes = vec![0u8; size];

        self.seek(0)?;
        let mut filled = 0;
        while filled < size
        {
            let moved = self.read(&mut bytes[filled..])?;
            if moved == 0
            {
                return Err(Error::Elf(format!("{}: short read of object bytes", self.name().full())));
            }
            filled += moved;
        }

        let file = elf::File::parse(&self.name().full(), &bytes)?;
        *self.header.borrow_mut() = Some(file.header().clone());
        *self.elf.borrow_mut() = Some(file);
        Ok(())
    }

    /* drop the ELF session. harmless when no session is active */
    pub fn end(&self)
    {
        *self.elf.borrow_mut() = None;
    }

    /* borrow the active ELF session */
    pub fn session(&self) -> Result<Ref<'_, elf::File>>
    {
        let session = self.elf.borrow();
        if session.is_none()
        {
            return Err(Error::Internal(format!("no elf session on {}", self.name().full())));
        }
        Ok(Ref::map(session, |s| s.as_ref().unwrap()))
    }

    /* the ELF header cached by the most recent begin */
    pub fn header(&self) -> Result<elf::Header>
    {
        self.header.borrow().clone()
            .ok_or_else(|| Error::Internal(format!("no elf header for {}", self.name().full())))
    }

    pub fn sections(&self) -> Result<usize>
    {
        Ok(self.header()?.shnum)
    }

    pub fn section_strings(&self) -> Result<usize>
    {
        Ok(self.header()?.shstrndx)
    }

    /* classify this object's symbols into the shared table, recording
       unresolved references and externally visible definitions here too */
    pub fn load_symbols(&self, symbols: &mut SymbolTable, local: bool) -> Result<()>
    {
        log::debug!("load symbols: {}", self.name().full());

        let load =
        {
            let session = self.session()?;
            session.collect_symbols(&self.name().full(), local, true, true)?
        };

        for sym in load.unresolved
        {
            self.unresolved.borrow_mut().insert(String::from(sym.name()), sym);
        }

        for sym in load.exported
        {
            symbols.insert(String::from(sym.name()), sym.clone());
            self.externals.borrow_mut().push(sym);
        }

        Ok(())
    }

    /* read a NUL-terminated string from one of the object's string tables */
    pub fn get_string(&self, section: usize, offset: usize) -> Result<String>
    {
        self.session()?.get_string(section, offset)
    }

    pub fn name(&self) -> &FileName
    {
        self.image.name()
    }

    pub fn unresolved_symbols(&self) -> Ref<'_, SymbolTable>
    {
        self.unresolved.borrow()
    }

    pub fn external_symbols(&self) -> Ref<'_, Vec<Symbol>>
    {
        self.externals.borrow()
    }
}

impl Stream for Object
{
    fn full_name(&self) -> String { self.name().full() }
    fn seek(&self, offset: u64) -> Result<()> { Object::seek(self, offset) }
    fn read(&self, buffer: &mut [u8]) -> Result<usize> { Object::read(self, buffer) }
    fn write(&self, buffer: &[u8]) -> Result<usize> { Object::write(self, buffer) }
}

impl Drop for Object
{
    /* sessions die with the object. descriptors are the caller's to close:
       a leak shows up as the image's own loud failure */
    fn drop(&mut self)
    {
        self.end();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::elf::{ SHF_ALLOC, SHF_EXECINSTR, SHT_PROGBITS, STB_GLOBAL, STT_FUNC };
    use crate::testelf;

    fn write_sample(dir: &std::path::Path) -> String
    {
        let bytes = testelf::build(
            testelf::EM_386,
            &[testelf::section(".text", SHT_PROGBITS, (SHF_ALLOC | SHF_EXECINSTR) as u64, 2, vec![0x90; 4])],
            &[testelf::symbol("foo", 0, (STB_GLOBAL << 4) | STT_FUNC, 1)]);
        let path = dir.join("sample.o");
        std::fs::write(&path, bytes).unwrap();
        String::from(path.to_str().unwrap())
    }

    #[test]
    fn sessions_pair_and_cache_the_header()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        let object = Object::new(&path).unwrap();
        assert!(object.header().is_err());

        object.open().unwrap();
        object.begin().unwrap();

        /* nesting is refused */
        assert!(object.begin().is_err());

        let header = object.header().unwrap();
        assert_eq!(header.machine, testelf::EM_386);

        /* strings read through the session by table index */
        let strtab = object.session().unwrap().sections_named(".strtab")[0].index;
        assert_eq!(object.get_string(strtab, 1).unwrap(), "foo");

        object.end();
        object.close();

        /* the header survives the end of the session */
        assert_eq!(object.sections().unwrap(), header.shnum);
        assert_eq!(object.section_strings().unwrap(), header.shstrndx);
        assert!(!object.is_open());
    }

    #[test]
    fn loaded_symbols_land_in_table_and_externals()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        let object = Object::new(&path).unwrap();
        object.open().unwrap();
        object.begin().unwrap();

        let mut table = SymbolTable::new();
        object.load_symbols(&mut table, false).unwrap();

        object.end();
        object.close();

        assert!(table.contains_key("foo"));
        assert_eq!(object.external_symbols().len(), 1);
        assert_eq!(object.external_symbols()[0].object(), path);
    }
}
