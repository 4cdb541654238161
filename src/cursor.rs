//! Position-tracking cursors over byte slices.
//!
//! PDU encoders and decoders in this crate work against plain slices. These
//! cursors keep the running offset so callers do not juggle index arithmetic.

use crate::codec::{Decode, Encode, Error};

/// Tracks how far into a mutable slice encoding has progressed.
pub struct WriteCursor<'d> {
    pos: usize,
    data: &'d mut [u8],
}

impl<'d> WriteCursor<'d> {
    pub fn new(data: &'d mut [u8]) -> Self {
        Self { pos: 0, data }
    }

    /// Moves the position back to the start of the buffer.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Splits off the first `nbytes` as a separate cursor, for headers whose
    /// fields are only known after the payload has been written. Each child
    /// tracks its own position.
    pub fn split(&mut self, nbytes: usize) -> Result<(WriteCursor<'_>, WriteCursor<'_>), Error> {
        if self.available() < nbytes {
            Err(Error::InsufficientSpace)
        } else {
            let (first, second) = self.data.split_at_mut(nbytes);
            Ok((
                WriteCursor { pos: 0, data: first },
                WriteCursor { pos: 0, data: second },
            ))
        }
    }

    /// Copies a raw byte slice at the current position.
    pub fn append(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.available() < data.len() {
            Err(Error::InsufficientSpace)
        } else {
            self.data[self.pos..self.pos + data.len()].copy_from_slice(data);
            self.pos += data.len();
            Ok(())
        }
    }

    /// Encodes a value at the current position.
    pub fn write<E: Encode>(&mut self, data: E) -> Result<(), Error> {
        self.write_ref(&data)
    }

    /// Encodes a value behind a reference at the current position.
    pub fn write_ref<E: Encode>(&mut self, data: &E) -> Result<(), Error> {
        if self.available() < data.size() {
            Err(Error::InsufficientSpace)
        } else {
            data.encode(&mut self.data[self.pos..self.pos + data.size()])?;
            self.pos += data.size();
            Ok(())
        }
    }

    /// The not-yet-written tail of the buffer. Bytes placed here only count
    /// once they are passed to [`Self::commit`].
    pub fn write_buf(&mut self) -> &mut [u8] {
        &mut self.data[self.pos..]
    }

    /// Marks `len` bytes written through [`Self::write_buf`] as used.
    pub fn commit(&mut self, len: usize) -> Result<(), Error> {
        if self.available() < len {
            Err(Error::InsufficientSpace)
        } else {
            self.pos += len;
            Ok(())
        }
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    /// Consumes the cursor, returning the written prefix.
    pub fn finish(self) -> &'d mut [u8] {
        &mut self.data[..self.pos]
    }
}

/// Tracks how far into a slice decoding has progressed.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone)]
pub struct ReadCursor<'d> {
    pos: usize,
    data: &'d [u8],
}

impl<'d> ReadCursor<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Self { pos: 0, data }
    }

    /// Decodes a value at the current position.
    pub fn read<T: Decode<'d>>(&mut self) -> Result<T, Error> {
        let val = T::decode(&self.data[self.pos..])?;
        self.pos += val.size();
        Ok(val)
    }

    /// Takes the next `nbytes` as a raw slice.
    pub fn slice(&mut self, nbytes: usize) -> Result<&'d [u8], Error> {
        if self.available() < nbytes {
            Err(Error::InsufficientSpace)
        } else {
            let src = &self.data[self.pos..self.pos + nbytes];
            self.pos += nbytes;
            Ok(src)
        }
    }

    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Consumes the cursor, returning whatever has not been read.
    pub fn remaining(self) -> &'d [u8] {
        &self.data[self.pos..]
    }
}
