/* raplink error type
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/* every fallible operation in the linker surfaces one of these. nothing is
   silently recovered: the driver reports the error and abandons the run */
#[derive(Debug, Error)]
pub enum Error
{
    /* a syscall (open, stat, read, write, seek) failed on the named path */
    #[error("cannot access {path}: {message}")]
    Open
    {
        path: String,
        message: String
    },

    /* input path is neither a valid archive nor an existing object file,
       or a library could not be found in the search paths */
    #[error("{0}: not found or not a regular file")]
    NotFound(String),

    /* per-member archive header magic bytes are wrong */
    #[error("invalid archive member header at offset {offset} in {path}")]
    InvalidHeader
    {
        path: String,
        offset: u64
    },

    /* a GNU extended-name reference was seen but no '//' table exists */
    #[error("no GNU extended file name table in {0}")]
    MissingExtendedNames(String),

    /* copy_file hit end-of-file before the requested byte count */
    #[error("input too short reading {0}")]
    InputTooShort(String),

    /* copy_file could not push the full byte count to the output */
    #[error("output truncated writing {0}")]
    OutputTruncated(String),

    /* two sections contributing to the same group disagree on alignment */
    #[error("alignment mismatch in section group {0}")]
    AlignmentMismatch(&'static str),

    /* a group accumulated size with no alignment recorded */
    #[error("invalid alignment in section group {0}")]
    InvalidAlignment(&'static str),

    /* an external symbol references a section outside the six groups */
    #[error("section index {index} not found in {object}")]
    SectionNotFound
    {
        object: String,
        index: usize
    },

    /* an archive or object was constructed from an empty or mistyped name */
    #[error("file name is empty or not {0}")]
    NameInvalid(&'static str),

    /* ELF parsing or target consistency failure */
    #[error("{0}")]
    Elf(String),

    #[error("configuration: {0}")]
    Config(String),

    /* a condition the linker's own logic must prevent */
    #[error("internal: {0}")]
    Internal(String),
}

impl Error
{
    /* wrap an I/O error against the path it occurred on */
    pub fn open(path: &str, e: std::io::Error) -> Error
    {
        Error::Open { path: String::from(path), message: e.to_string() }
    }
}
