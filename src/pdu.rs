use heapless::Vec;

use crate::{config, Error};

/// An owned L2CAP payload, sized for the largest reassembled PDU.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pdu {
    buf: Vec<u8, { config::L2CAP_MTU }>,
}

impl Pdu {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn from_slice(data: &[u8]) -> Result<Self, Error> {
        let mut pdu = Self::new();
        pdu.extend(data)?;
        Ok(pdu)
    }

    pub(crate) fn extend(&mut self, data: &[u8]) -> Result<(), Error> {
        self.buf.extend_from_slice(data).map_err(|_| Error::InsufficientSpace)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl AsRef<[u8]> for Pdu {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}
