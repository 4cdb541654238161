//! L2CAP basic mode over fixed channels.
//!
//! Every PDU carries a 4 byte header: a little endian payload length
//! followed by the destination channel id. ATT traffic uses the fixed
//! attribute channel, everything else on an LE link is out of scope here.

use crate::codec::{Decode, Encode, Error, FixedSize};
use crate::cursor::{ReadCursor, WriteCursor};

pub(crate) mod sar;

/// Fixed channel id for the Attribute Protocol.
pub(crate) const L2CAP_CID_ATT: u16 = 0x0004;
/// Fixed channel id for LE signaling.
pub(crate) const L2CAP_CID_LE_SIGNAL: u16 = 0x0005;

/// The basic L2CAP header prefixed to every PDU.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct L2capHeader {
    pub length: u16,
    pub channel: u16,
}

impl FixedSize for L2capHeader {
    const SIZE: usize = 4;
}

impl Decode<'_> for L2capHeader {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let mut r = ReadCursor::new(src);
        let length: u16 = r.read()?;
        let channel: u16 = r.read()?;
        Ok(Self { length, channel })
    }
}

impl Encode for L2capHeader {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let mut w = WriteCursor::new(dest);
        w.write(self.length)?;
        w.write(self.channel)?;
        Ok(())
    }
}
