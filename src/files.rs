/* raplink input file naming and descriptor management
 *
 * A FileName names a physical input: an archive, an object, or an object
 * held inside an archive at a byte offset. An Image is a reference-counted
 * open descriptor over a FileName. Many logical users can hold one Image:
 * the OS file is opened on the 0 -> 1 reference edge and closed on the
 * 1 -> 0 edge.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::cell::{ Cell, RefCell };
use std::fs;
use std::io::{ Read, Seek, SeekFrom, Write };

use crate::error::{ Error, Result };
use crate::path;

/* offset of a drive separator colon that must not be mistaken for an
   archive:object split */
#[cfg(not(windows))]
const DRIVE_SEPARATOR: usize = 0;
#[cfg(windows)]
const DRIVE_SEPARATOR: usize = 1;

/* name one input: archive, object, or object-within-archive */
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FileName
{
    aname: String,  /* archive path, possibly empty */
    oname: String,  /* object name, possibly empty */
    offset: u64,    /* byte offset of the object within the archive */
    size: u64       /* byte length of the object */
}

impl FileName
{
    pub fn new(aname: &str, oname: &str, offset: u64, size: u64) -> FileName
    {
        FileName
        {
            aname: String::from(aname),
            oname: String::from(oname),
            offset, size
        }
    }

    /* parse a path into a name. when treated as an object, a colon past the
       drive separator splits the path into archive and member parts */
    pub fn from_path(path: &str, is_object: bool) -> FileName
    {
        let mut name = FileName::default();

        if path.is_empty()
        {
            return name;
        }

        let mut get_size = false;

        if is_object
        {
            match path.rfind(':')
            {
                Some(colon) if colon > DRIVE_SEPARATOR =>
                {
                    name.aname = String::from(&path[..colon - 1]);
                    name.oname = String::from(&path[colon + 1..]);
                },
                _ =>
                {
                    name.oname = String::from(path);
                    get_size = true;
                }
            }
        }
        else
        {
            name.aname = String::from(path);
            get_size = true;
        }

        if get_size
        {
            if let Ok(md) = fs::metadata(path)
            {
                name.size = md.len();
            }
        }

        name
    }

    pub fn is_archive(&self) -> bool
    {
        !self.aname.is_empty() && self.oname.is_empty()
    }

    pub fn is_object(&self) -> bool
    {
        !self.oname.is_empty()
    }

    pub fn is_valid(&self) -> bool
    {
        !self.aname.is_empty() || !self.oname.is_empty()
    }

    /* does the underlying path name a regular file? an unset name is false */
    pub fn exists(&self) -> bool
    {
        let p = self.path();
        !p.is_empty() && path::check_file(p)
    }

    /* the path of the physical file holding this input's bytes */
    pub fn path(&self) -> &str
    {
        if !self.aname.is_empty()
        {
            return &self.aname;
        }
        &self.oname
    }

    /* textual form: "<archive>:<object>@<offset>", "<archive>", "<object>" */
    pub fn full(&self) -> String
    {
        let mut f = String::new();
        if !self.aname.is_empty()
        {
            f.push_str(&self.aname);
            if !self.oname.is_empty()
            {
                f.push(':');
            }
        }
        if !self.oname.is_empty()
        {
            f.push_str(&self.oname);
        }
        if !self.aname.is_empty() && !self.oname.is_empty()
        {
            f.push_str(&format!("@{}", self.offset));
        }
        f
    }

    pub fn basename(&self) -> String
    {
        String::from(path::basename(&self.full()))
    }

    pub fn aname(&self) -> &str { &self.aname }
    pub fn oname(&self) -> &str { &self.oname }
    pub fn offset(&self) -> u64 { self.offset }
    pub fn size(&self) -> u64 { self.size }
}

impl std::fmt::Debug for FileName
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        write!(f, "{}", self.full())
    }
}

/* byte-level access shared by images and objects so copying and compression
   can pull from either without caring which */
pub trait Stream
{
    fn full_name(&self) -> String;
    fn seek(&self, offset: u64) -> Result<()>;
    fn read(&self, buffer: &mut [u8]) -> Result<usize>;
    fn write(&self, buffer: &[u8]) -> Result<usize>;
}

/* a reference-counted open descriptor over a FileName.

   all seeks are biased by the name's offset so an object held inside an
   archive sees a virtual zero-based stream of its own length. the interior
   mutability lets every holder of a shared Image open and close it through
   a plain reference */
pub struct Image
{
    name: FileName,
    fd: RefCell<Option<fs::File>>,
    references: Cell<u32>,
    symbol_refs: Cell<u32>
}

impl Image
{
    pub fn new(name: FileName) -> Image
    {
        Image
        {
            name,
            fd: RefCell::new(None),
            references: Cell::new(0),
            symbol_refs: Cell::new(0)
        }
    }

    pub fn from_path(path: &str, is_object: bool) -> Image
    {
        Image::new(FileName::from_path(path, is_object))
    }

    /* open the underlying file if this is the first reference, and count the
       reference either way. writable opens truncate or create the file */
    pub fn open(&self, writable: bool) -> Result<()>
    {
        let path = String::from(self.name.path());
        if path.is_empty()
        {
            return Err(Error::NameInvalid("named"));
        }

        log::trace!("image open: {} refs: {}", self.name.full(), self.references.get() + 1);

        if self.fd.borrow().is_none()
        {
            let file = if writable
            {
                let mut options = fs::OpenOptions::new();
                options.read(true).write(true).create(true).truncate(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::OpenOptionsExt;
                    options.mode(0o664);
                }
                options.open(&path)
            }
            else
            {
                fs::File::open(&path)
            };

            match file
            {
                Ok(f) => *self.fd.borrow_mut() = Some(f),
                Err(e) => return Err(Error::open(&path, e))
            }
        }

        self.references.set(self.references.get() + 1);
        Ok(())
    }

    /* drop one reference, closing the descriptor when the last user goes.
       closing an already closed image is a no-op */
    pub fn close(&self)
    {
        if self.references.get() > 0
        {
            log::trace!("image close: {} refs: {}", self.name.full(), self.references.get());

            self.references.set(self.references.get() - 1);
            if self.references.get() == 0
            {
                *self.fd.borrow_mut() = None;
            }
        }
    }

    pub fn is_open(&self) -> bool
    {
        self.fd.borrow().is_some()
    }

    pub fn references(&self) -> u32
    {
        self.references.get()
    }

    /* thin single-syscall wrappers over the descriptor */
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize>
    {
        let fd = self.fd.borrow();
        match fd.as_ref()
        {
            Some(mut file) => file.read(buffer)
                .map_err(|e| Error::open(self.name.path(), e)),
            None => Err(Error::Internal(format!("read on closed image {}", self.name.full())))
        }
    }

    pub fn write(&self, buffer: &[u8]) -> Result<usize>
    {
        let fd = self.fd.borrow();
        match fd.as_ref()
        {
            Some(mut file) => file.write(buffer)
                .map_err(|e| Error::open(self.name.path(), e)),
            None => Err(Error::Internal(format!("write on closed image {}", self.name.full())))
        }
    }

    /* position the descriptor at offset within this image's virtual stream */
    pub fn seek(&self, offset: u64) -> Result<()>
    {
        self.seek_to(self.name.offset() + offset)
    }

    /* position the descriptor at an absolute offset in the physical file */
    pub(crate) fn seek_to(&self, position: u64) -> Result<()>
    {
        let fd = self.fd.borrow();
        match fd.as_ref()
        {
            Some(mut file) => file.seek(SeekFrom::Start(position))
                .map(|_| ())
                .map_err(|e| Error::open(self.name.path(), e)),
            None => Err(Error::Internal(format!("seek on closed image {}", self.name.full())))
        }
    }

    /* combined seek and read. returns whether the full count was moved */
    pub fn seek_read(&self, offset: u64, buffer: &mut [u8]) -> Result<bool>
    {
        self.seek(offset)?;
        let moved = self.read(buffer)?;
        Ok(moved == buffer.len())
    }

    /* combined seek and write. returns whether the full count was moved */
    pub fn seek_write(&self, offset: u64, buffer: &[u8]) -> Result<bool>
    {
        self.seek(offset)?;
        let moved = self.write(buffer)?;
        Ok(moved == buffer.len())
    }

    pub fn name(&self) -> &FileName
    {
        &self.name
    }

    pub fn size(&self) -> u64
    {
        self.name.size()
    }

    pub fn symbol_referenced(&self)
    {
        self.symbol_refs.set(self.symbol_refs.get() + 1);
    }

    pub fn symbol_references(&self) -> u32
    {
        self.symbol_refs.get()
    }
}

impl Stream for Image
{
    fn full_name(&self) -> String { self.name.full() }
    fn seek(&self, offset: u64) -> Result<()> { Image::seek(self, offset) }
    fn read(&self, buffer: &mut [u8]) -> Result<usize> { Image::read(self, buffer) }
    fn write(&self, buffer: &[u8]) -> Result<usize> { Image::write(self, buffer) }
}

impl Drop for Image
{
    /* destroying an image while logical users still hold it is a bug in the
       caller, not a recoverable condition */
    fn drop(&mut self)
    {
        if self.references.get() != 0
        {
            panic!("image {} dropped while still referenced", self.name.full());
        }
    }
}

const COPY_FILE_BUFFER_SIZE: usize = 8 * 1024;

/* stream size bytes from the input to the output through a bounce buffer.
   early end-of-file on the input and short writes on the output are errors */
pub fn copy_file(input: &dyn Stream, output: &dyn Stream, size: u64) -> Result<()>
{
    let mut buffer = vec![0u8; COPY_FILE_BUFFER_SIZE];
    let mut remaining = size;

    while remaining > 0
    {
        let wanted = std::cmp::min(remaining, COPY_FILE_BUFFER_SIZE as u64) as usize;
        let moved = input.read(&mut buffer[..wanted])?;

        if moved == 0
        {
            return Err(Error::InputTooShort(input.full_name()));
        }

        let written = output.write(&buffer[..moved])?;
        if written != moved
        {
            return Err(Error::OutputTruncated(output.full_name()));
        }

        remaining -= moved as u64;
    }

    Ok(())
}
