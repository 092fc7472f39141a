/* raplink ar archive parsing and creation
 *
 * Understands the traditional ar layout plus the GNU extensions: the
 * archive symbol table, the '//' extended file name table, and '/N' name
 * references into it. Member enumeration registers each object against the
 * shared archive descriptor so sibling members reuse one open file.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ Error, Result };
use crate::files::{ copy_file, FileName, Image };
use crate::object::Object;
use crate::path;

pub const ARCHIVE_IDENT: &[u8; 8] = b"!<arch>\n";

/* per-member header layout: 60 bytes of space-padded text fields */
const FHDR_SIZE: u64 = 60;
const FHDR_NAME: usize = 0;
const FHDR_NAME_SIZE: usize = 16;
const FHDR_MTIME: usize = 16;
const FHDR_MTIME_SIZE: usize = 12;
const FHDR_UID: usize = 28;
const FHDR_UID_SIZE: usize = 6;
const FHDR_GID: usize = 34;
const FHDR_GID_SIZE: usize = 6;
const FHDR_MODE: usize = 40;
const FHDR_MODE_SIZE: usize = 8;
const FHDR_SIZE_FIELD: usize = 48;
const FHDR_SIZE_FIELD_SIZE: usize = 10;
const FHDR_MAGIC: usize = 58;
const MAX_FILE_NAME: usize = 1024;

/* scan a space-padded decimal field */
pub(crate) fn scan_decimal(field: &[u8]) -> u64
{
    let mut value = 0u64;
    for &byte in field
    {
        if !byte.is_ascii_digit()
        {
            break;
        }
        value = value * 10 + (byte - b'0') as u64;
    }
    value
}

/* render a number left-aligned into a space-padded field, truncating if it
   cannot fit */
pub(crate) fn set_number(value: u64, field: &mut [u8], octal: bool)
{
    let text = if octal { format!("{:o}", value) } else { format!("{}", value) };
    let bytes = text.as_bytes();
    let length = std::cmp::min(bytes.len(), field.len());
    field[..length].copy_from_slice(&bytes[..length]);
}

/* a member name ends at the first '/' or NUL. anything past the slash in a
   GNU extended name entry is ignored */
fn name_from_bytes(bytes: &[u8]) -> String
{
    let end = bytes.iter()
        .position(|&b| b == b'/' || b == 0)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/* a short name sits in the 16-byte header field, '/' terminated when there
   is room, space padded when there is not */
fn short_name(field: &[u8]) -> String
{
    match field.iter().position(|&b| b == b'/' || b == 0)
    {
        Some(end) => String::from_utf8_lossy(&field[..end]).into_owned(),
        None => String::from_utf8_lossy(field).trim_end_matches(' ').to_string()
    }
}

fn find_in_blob(blob: &[u8], needle: &[u8]) -> Option<usize>
{
    if needle.is_empty() || blob.len() < needle.len()
    {
        return None;
    }
    blob.windows(needle.len()).position(|window| window == needle)
}

pub struct Archive
{
    image: Image,
    session: Cell<bool>   /* an ELF-style session over the whole archive */
}

impl Archive
{
    pub fn new(path: &str) -> Result<Archive>
    {
        let image = Image::from_path(path, false);
        if !image.name().is_valid()
        {
            return Err(Error::NameInvalid("named"));
        }
        if !image.name().is_archive()
        {
            return Err(Error::NameInvalid("an archive"));
        }
        Ok(Archive { image, session: Cell::new(false) })
    }

    pub fn image(&self) -> &Image
    {
        &self.image
    }

    pub fn name(&self) -> &FileName
    {
        self.image.name()
    }

    pub fn path(&self) -> &str
    {
        self.image.name().path()
    }

    pub fn open(&self, writable: bool) -> Result<()>
    {
        self.image.open(writable)
    }

    pub fn close(&self)
    {
        self.image.close();
    }

    pub fn is_open(&self) -> bool
    {
        self.image.is_open()
    }

    pub fn references(&self) -> u32
    {
        self.image.references()
    }

    /* briefly open the file and check the global identifier. short files and
       wrong magic read as not-an-archive rather than errors */
    pub fn is_valid(&self) -> Result<bool>
    {
        self.open(false)?;
        let mut header = [0u8; ARCHIVE_IDENT.len()];
        let result = self.image.seek_read(0, &mut header);
        self.close();

        match result
        {
            Ok(full) => Ok(full && header == *ARCHIVE_IDENT),
            Err(e) => Err(e)
        }
    }

    /* begin a session over an open archive: re-verify the identifier and keep
       the descriptor warm for member access */
    pub fn begin(&self) -> Result<()>
    {
        if !self.session.get()
        {
            let mut header = [0u8; ARCHIVE_IDENT.len()];
            if !self.image.seek_read(0, &mut header)? || header != *ARCHIVE_IDENT
            {
                return Err(Error::InvalidHeader { path: String::from(self.path()), offset: 0 });
            }
            self.session.set(true);
        }
        Ok(())
    }

    pub fn end(&self)
    {
        self.session.set(false);
    }

    /* read and validate one 60-byte member header. a short read means the
       end of the archive */
    fn read_header(&self, offset: u64) -> Result<Option<[u8; FHDR_SIZE as usize]>>
    {
        let mut header = [0u8; FHDR_SIZE as usize];
        if !self.image.seek_read(offset, &mut header)?
        {
            return Ok(None);
        }

        if header[FHDR_MAGIC] != 0x60 || header[FHDR_MAGIC + 1] != 0x0a
        {
            return Err(Error::InvalidHeader { path: String::from(self.path()), offset });
        }

        Ok(Some(header))
    }

    /* an extended name reference arrived before the '//' table: scan forward
       through the member headers looking for it */
    fn find_extended_names(&self, start: u64, start_header: &[u8]) -> Result<u64>
    {
        let mut offset = start;
        let mut header = [0u8; FHDR_SIZE as usize];
        header.copy_from_slice(start_header);

        loop
        {
            let size = (scan_decimal(&header[FHDR_SIZE_FIELD..FHDR_SIZE_FIELD + FHDR_SIZE_FIELD_SIZE]) + 1) & !1;
            offset += size + FHDR_SIZE;

            match self.read_header(offset)?
            {
                Some(h) => header = h,
                None => return Err(Error::MissingExtendedNames(String::from(self.path())))
            }

            if header[0] == b'/' && header[1] == b'/'
            {
                return Ok(offset + FHDR_SIZE);
            }
        }
    }

    /* read up to MAX_FILE_NAME bytes of the extended name table at the given
       position. a short read near the end of the archive is fine, the name
       terminates within whatever arrived */
    fn read_extended_name(&self, position: u64) -> Result<String>
    {
        let mut buffer = [0u8; MAX_FILE_NAME];
        self.image.seek(position)?;

        let mut filled = 0;
        while filled < buffer.len()
        {
            let moved = self.image.read(&mut buffer[filled..])?;
            if moved == 0
            {
                break;
            }
            filled += moved;
        }

        Ok(name_from_bytes(&buffer[..filled]))
    }

    /* walk the member headers of an open archive, registering an object for
       every real member. the caller owns the archive through an Rc so each
       member can hold a non-owning handle back to it */
    pub fn load_objects(archive: &Rc<Archive>, objects: &mut IndexMap<String, Object>) -> Result<()>
    {
        let mut extended_names: u64 = 0;
        let mut offset: u64 = ARCHIVE_IDENT.len() as u64;

        loop
        {
            let header = match archive.read_header(offset)?
            {
                Some(header) => header,
                None => break
            };

            let raw_size = scan_decimal(&header[FHDR_SIZE_FIELD..FHDR_SIZE_FIELD + FHDR_SIZE_FIELD_SIZE]);

            /* member data is always padded to an even boundary */
            let padded_size = (raw_size + 1) & !1;

            if header[0] == b'/'
            {
                match header[1]
                {
                    /* the archive symbol table: skip */
                    b' ' => (),

                    /* the extended file name table itself */
                    b'/' => extended_names = offset + FHDR_SIZE,

                    /* a decimal reference into the extended name table */
                    b'0'..=b'9' =>
                    {
                        let extended_off = scan_decimal(&header[1..FHDR_NAME_SIZE]);

                        if extended_names == 0
                        {
                            extended_names = archive.find_extended_names(offset, &header)?;
                        }

                        let name = archive.read_extended_name(extended_names + extended_off)?;
                        Archive::add_object(archive, objects, &name, offset + FHDR_SIZE, raw_size)?;
                    },

                    /* unknown special member: ignore it */
                    _ => ()
                }
            }
            else
            {
                let name = short_name(&header[FHDR_NAME..FHDR_NAME + FHDR_NAME_SIZE]);
                Archive::add_object(archive, objects, &name, offset + FHDR_SIZE, raw_size)?;
            }

            offset += padded_size + FHDR_SIZE;
        }

        Ok(())
    }

    fn add_object(archive: &Rc<Archive>, objects: &mut IndexMap<String, Object>,
                  name: &str, offset: u64, size: u64) -> Result<()>
    {
        log::trace!("archive add object: {} @ {} ({} bytes)", name, offset, size);

        let member = FileName::new(archive.path(), name, offset, size);
        let key = member.full();
        let object = Object::from_member(archive, member)?;
        objects.insert(key, object);
        Ok(())
    }

    /* emit one 60-byte member header. fields are left-aligned and space
       padded, mode in octal, everything else decimal */
    fn write_header(&self, name: &str, mtime: u64, uid: u64, gid: u64,
                    mode: u64, size: u64) -> Result<()>
    {
        let mut header = [b' '; FHDR_SIZE as usize];

        let bytes = name.as_bytes();
        let length = std::cmp::min(bytes.len(), FHDR_NAME_SIZE);
        header[FHDR_NAME..FHDR_NAME + length].copy_from_slice(&bytes[..length]);

        set_number(mtime, &mut header[FHDR_MTIME..FHDR_MTIME + FHDR_MTIME_SIZE], false);
        set_number(uid, &mut header[FHDR_UID..FHDR_UID + FHDR_UID_SIZE], false);
        set_number(gid, &mut header[FHDR_GID..FHDR_GID + FHDR_GID_SIZE], false);
        set_number(mode, &mut header[FHDR_MODE..FHDR_MODE + FHDR_MODE_SIZE], true);
        set_number(size, &mut header[FHDR_SIZE_FIELD..FHDR_SIZE_FIELD + FHDR_SIZE_FIELD_SIZE], false);

        header[FHDR_MAGIC] = 0x60;
        header[FHDR_MAGIC + 1] = 0x0a;

        let written = self.image.write(&header)?;
        if written != header.len()
        {
            return Err(Error::OutputTruncated(self.name().full()));
        }
        Ok(())
    }

    fn write_blob(&self, blob: &[u8]) -> Result<()>
    {
        let written = self.image.write(blob)?;
        if written != blob.len()
        {
            return Err(Error::OutputTruncated(self.name().full()));
        }
        Ok(())
    }

    /* create this archive on disk from the given members, in order */
    pub fn create(&self, objects: &[&Object]) -> Result<()>
    {
        self.open(true)?;
        let result = self.create_members(objects);
        self.close();
        result
    }

    fn create_members(&self, objects: &[&Object]) -> Result<()>
    {
        if !self.image.seek_write(0, ARCHIVE_IDENT)?
        {
            return Err(Error::OutputTruncated(self.name().full()));
        }

        /* names too long for the header field go into a '//' table, each
           entry terminated GNU style so the reader stops at the slash */
        let mut extended = Vec::new();
        for obj in objects
        {
            let oname = path::basename(obj.name().oname());
            if oname.len() > FHDR_NAME_SIZE
            {
                extended.extend_from_slice(oname.as_bytes());
                extended.extend_from_slice(b"/\n");
            }
        }

        if !extended.is_empty()
        {
            if extended.len() & 1 != 0
            {
                extended.push(b'\n');
            }
            self.write_header("//", 0, 0, 0, 0, extended.len() as u64)?;
            self.write_blob(&extended)?;
        }

        for obj in objects
        {
            obj.open()?;
            let result = self.write_member(obj, &extended);
            obj.close();
            result?;
        }

        Ok(())
    }

    fn write_member(&self, obj: &Object, extended: &[u8]) -> Result<()>
    {
        let oname = path::basename(obj.name().oname()).to_string();

        /* overlong names are stored as a '/' plus the decimal offset of the
           name in the extended table */
        let stored = if oname.len() > FHDR_NAME_SIZE
        {
            let needle = format!("{}/\n", oname);
            let position = find_in_blob(extended, needle.as_bytes())
                .ok_or_else(|| Error::Internal(format!("extended file name {} not found", oname)))?;
            format!("/{}", position)
        }
        else
        {
            oname
        };

        let size = obj.name().size();
        self.write_header(&stored, 0, 0, 0, 0o666, size)?;

        obj.seek(0)?;
        copy_file(obj, &self.image, size)?;

        /* keep the next header on an even boundary */
        if size & 1 != 0
        {
            self.write_blob(b"\n")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const LONG_NAME: &str = "abcdefghijklmnop.o";  /* 18 chars, needs the '//' table */

    fn write_input(dir: &std::path::Path, name: &str, bytes: &[u8]) -> String
    {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        String::from(path.to_str().unwrap())
    }

    #[test]
    fn decimal_fields_scan_and_print()
    {
        assert_eq!(scan_decimal(b"1234      "), 1234);
        assert_eq!(scan_decimal(b"0         "), 0);
        assert_eq!(scan_decimal(b"77/       "), 77);

        let mut field = [b' '; 8];
        set_number(0o666, &mut field, true);
        assert_eq!(&field, b"666     ");

        let mut field = [b' '; 10];
        set_number(42, &mut field, false);
        assert_eq!(&field, b"42        ");
    }

    #[test]
    fn wrong_global_identifier_is_not_an_archive()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = write_input(dir.path(), "not.a", b"this is not an archive at all");

        let archive = Archive::new(&path).unwrap();
        assert!(!archive.is_valid().unwrap());
        assert!(!archive.is_open());

        /* too short to even hold the identifier */
        let path = write_input(dir.path(), "tiny.a", b"!<ar");
        let archive = Archive::new(&path).unwrap();
        assert!(!archive.is_valid().unwrap());
    }

    #[test]
    fn bad_member_magic_is_an_error()
    {
        let dir = tempfile::tempdir().unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(ARCHIVE_IDENT);
        bytes.extend_from_slice(&[b'x'; 60]);
        let path = write_input(dir.path(), "badmagic.a", &bytes);

        let archive = Rc::new(Archive::new(&path).unwrap());
        archive.open(false).unwrap();

        let mut objects = IndexMap::new();
        match Archive::load_objects(&archive, &mut objects)
        {
            Err(Error::InvalidHeader { offset, .. }) => assert_eq!(offset, 8),
            other => panic!("expected InvalidHeader, got {:?}", other)
        }

        archive.close();
    }

    #[test]
    fn extended_reference_without_table_is_an_error()
    {
        let dir = tempfile::tempdir().unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(ARCHIVE_IDENT);

        /* one member claiming its name lives in a table that is absent */
        let mut header = [b' '; 60];
        header[0] = b'/';
        header[1] = b'0';
        set_number(4, &mut header[48..58], false);
        header[58] = 0x60;
        header[59] = 0x0a;
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(b"data");

        let path = write_input(dir.path(), "noext.a", &bytes);
        let archive = Rc::new(Archive::new(&path).unwrap());
        archive.open(false).unwrap();

        let mut objects = IndexMap::new();
        match Archive::load_objects(&archive, &mut objects)
        {
            Err(Error::MissingExtendedNames(_)) => (),
            other => panic!("expected MissingExtendedNames, got {:?}", other)
        }

        archive.close();
    }

    #[test]
    fn round_trip_preserves_names_and_bytes()
    {
        let dir = tempfile::tempdir().unwrap();

        /* odd-sized member forces padding; the long name forces the table */
        let short_path = write_input(dir.path(), "a.o", &[1, 2, 3]);
        let long_path = write_input(dir.path(), LONG_NAME, &[9, 8, 7, 6]);

        let short_obj = Object::new(&short_path).unwrap();
        let long_obj = Object::new(&long_path).unwrap();

        let ar_path = dir.path().join("lib.a");
        let archive = Archive::new(ar_path.to_str().unwrap()).unwrap();
        archive.create(&[&short_obj, &long_obj]).unwrap();

        /* stored form of the long name is a '/' plus a decimal offset, and
           the table holds the name itself */
        let raw = std::fs::read(&ar_path).unwrap();
        assert!(find_in_blob(&raw, format!("{}/\n", LONG_NAME).as_bytes()).is_some());
        assert!(find_in_blob(&raw, b"/0 ").is_some());

        /* parse it back */
        let archive = Rc::new(Archive::new(ar_path.to_str().unwrap()).unwrap());
        assert!(archive.is_valid().unwrap());

        archive.open(false).unwrap();
        let mut objects = IndexMap::new();
        Archive::load_objects(&archive, &mut objects).unwrap();

        let names: Vec<&str> = objects.values().map(|o| o.name().oname()).collect();
        assert_eq!(names, vec!["a.o", LONG_NAME]);

        /* member bytes are identical through the shared descriptor */
        let member = &objects[0];
        assert_eq!(member.name().size(), 3);
        member.open().unwrap();
        let mut bytes = [0u8; 3];
        assert!(member.seek_read(0, &mut bytes).unwrap());
        assert_eq!(&bytes, &[1, 2, 3]);
        member.close();

        let member = &objects[1];
        assert_eq!(member.name().size(), 4);
        member.open().unwrap();
        let mut bytes = [0u8; 4];
        assert!(member.seek_read(0, &mut bytes).unwrap());
        assert_eq!(&bytes, &[9, 8, 7, 6]);
        member.close();

        archive.close();
    }

    #[test]
    fn members_share_one_descriptor()
    {
        let dir = tempfile::tempdir().unwrap();

        let a = write_input(dir.path(), "a.o", &[1, 2]);
        let b = write_input(dir.path(), "b.o", &[3, 4]);
        let a_obj = Object::new(&a).unwrap();
        let b_obj = Object::new(&b).unwrap();

        let ar_path = dir.path().join("share.a");
        let archive = Archive::new(ar_path.to_str().unwrap()).unwrap();
        archive.create(&[&a_obj, &b_obj]).unwrap();

        let archive = Rc::new(Archive::new(ar_path.to_str().unwrap()).unwrap());
        archive.open(false).unwrap();
        let mut objects = IndexMap::new();
        Archive::load_objects(&archive, &mut objects).unwrap();
        archive.close();

        assert!(!archive.is_open());

        /* opening each member opens the archive exactly once and counts
           every user; closing them all closes it exactly once */
        let first = &objects[0];
        let second = &objects[1];

        first.open().unwrap();
        assert!(archive.is_open());
        assert_eq!(archive.references(), 1);

        second.open().unwrap();
        assert_eq!(archive.references(), 2);
        second.open().unwrap();
        assert_eq!(archive.references(), 3);

        second.close();
        second.close();
        assert!(archive.is_open());

        first.close();
        assert!(!archive.is_open());
        assert_eq!(archive.references(), 0);
    }
}
