/* raplink streaming compressor
 *
 * Fills a fixed-size staging buffer and deflates it block by block into the
 * output image. Each block is written as a 4-byte big-endian compressed
 * length followed by the deflate payload so the loader can walk the blocks
 * back. Compression can be switched off, leaving the logical stream bytes
 * untouched on disk.
 *
 * Fixed-width integers are inserted big-endian.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::io::Write;

use flate2::Compression;
use flate2::write::DeflateEncoder;

use crate::error::{ Error, Result };
use crate::files::{ Image, Stream };

pub struct Compressor<'a>
{
    image: &'a Image,      /* the output file */
    size: usize,           /* staging buffer capacity */
    enabled: bool,
    buffer: Vec<u8>,
    total: u64,            /* uncompressed bytes accepted */
    total_compressed: u64  /* bytes pushed to the image */
}

impl<'a> Compressor<'a>
{
    pub fn new(image: &'a Image, size: usize) -> Compressor<'a>
    {
        Compressor::with_compression(image, size, true)
    }

    pub fn with_compression(image: &'a Image, size: usize, enabled: bool) -> Compressor<'a>
    {
        Compressor
        {
            image, size, enabled,
            buffer: Vec::with_capacity(size),
            total: 0,
            total_compressed: 0
        }
    }

    /* append bytes to the stream, flushing full blocks as they fill */
    pub fn write(&mut self, data: &[u8]) -> Result<()>
    {
        let mut data = data;
        while !data.is_empty()
        {
            let space = self.size - self.buffer.len();
            let take = std::cmp::min(space, data.len());

            self.buffer.extend_from_slice(&data[..take]);
            self.total += take as u64;
            data = &data[take..];

            if self.buffer.len() >= self.size
            {
                self.emit()?;
            }
        }
        Ok(())
    }

    /* pull length bytes straight out of an input stream at the given offset.
       this is how section bodies flow from object files into the package
       without an intermediate copy of the whole section */
    pub fn write_stream(&mut self, input: &dyn Stream, offset: u64, length: u64) -> Result<()>
    {
        input.seek(offset)?;

        let mut remaining = length;
        while remaining > 0
        {
            let space = (self.size - self.buffer.len()) as u64;
            let take = std::cmp::min(space, remaining) as usize;
            let start = self.buffer.len();
            self.buffer.resize(start + take, 0);

            let mut filled = 0;
            while filled < take
            {
                let moved = input.read(&mut self.buffer[start + filled..start + take])?;
                if moved == 0
                {
                    return Err(Error::InputTooShort(input.full_name()));
                }
                filled += moved;
            }

            self.total += take as u64;
            remaining -= take as u64;

            if self.buffer.len() >= self.size
            {
                self.emit()?;
            }
        }
        Ok(())
    }

    /* insert a fixed-width integer, big-endian */
    pub fn put_u32(&mut self, value: u32) -> Result<()>
    {
        self.write(&value.to_be_bytes())
    }

    /* insert a string's bytes, no terminator */
    pub fn put_str(&mut self, value: &str) -> Result<()>
    {
        self.write(value.as_bytes())
    }

    /* push any staged bytes out */
    pub fn flush(&mut self) -> Result<()>
    {
        if !self.buffer.is_empty()
        {
            self.emit()?;
        }
        Ok(())
    }

    fn emit(&mut self) -> Result<()>
    {
        let block = std::mem::take(&mut self.buffer);

        if self.enabled
        {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&block)
                .and_then(|_| encoder.finish())
                .map_err(|e| Error::Internal(format!("deflate: {}", e)))
                .and_then(|compressed|
                {
                    write_out(self.image, &(compressed.len() as u32).to_be_bytes())?;
                    write_out(self.image, &compressed)?;
                    self.total_compressed += compressed.len() as u64 + 4;
                    Ok(())
                })?;
        }
        else
        {
            write_out(self.image, &block)?;
            self.total_compressed += block.len() as u64;
        }

        self.buffer = block;
        self.buffer.clear();
        Ok(())
    }

    /* uncompressed bytes accepted so far */
    pub fn transferred(&self) -> u64
    {
        self.total
    }

    /* bytes actually written to the image so far */
    pub fn compressed(&self) -> u64
    {
        self.total_compressed
    }
}

/* the image write is a single syscall; loop it to completion */
fn write_out(image: &Image, data: &[u8]) -> Result<()>
{
    let mut done = 0;
    while done < data.len()
    {
        let moved = image.write(&data[done..])?;
        if moved == 0
        {
            return Err(Error::OutputTruncated(image.name().full()));
        }
        done += moved;
    }
    Ok(())
}
