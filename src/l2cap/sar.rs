use embassy_time::Instant;

use crate::pdu::Pdu;
use crate::Error;

// Handles reassembling of a fragmented L2CAP PDU for one connection.
pub(crate) struct PacketReassembly {
    state: Option<State>,
}

struct State {
    // Target channel of current assembly.
    channel: u16,
    // Target length of the assembly.
    length: u16,
    packet: Pdu,
    // Point at which an unfinished assembly is treated as malformed.
    deadline: Instant,
}

impl PacketReassembly {
    pub const fn new() -> Self {
        Self { state: None }
    }

    /// Initializes a reassembly with the data following the L2CAP header.
    ///
    /// Returns InvalidState if there is already an ongoing reassembly for this connection.
    pub fn init(&mut self, channel: u16, length: u16, data: &[u8], deadline: Instant) -> Result<(), Error> {
        if self.state.is_some() {
            return Err(Error::InvalidState);
        }
        self.state.replace(State {
            channel,
            length,
            packet: Pdu::from_slice(data)?,
            deadline,
        });
        Ok(())
    }

    /// Deletes any reassembly for the disconnected handle.
    pub fn disconnected(&mut self) {
        let _ = self.state.take();
    }

    /// Returns whether or not there is a reassembly in progress.
    pub fn in_progress(&self) -> bool {
        self.state.is_some()
    }

    /// Returns whether an in-progress reassembly has outlived its deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.state.as_ref().is_some_and(|state| now >= state.deadline)
    }

    /// Updates the in progress packet assembly for the connection.
    ///
    /// If the reassembly is complete, the target channel and the complete PDU are returned.
    pub fn update(&mut self, data: &[u8]) -> Result<Option<(u16, Pdu)>, Error> {
        if let Some(mut state) = self.state.take() {
            state.packet.extend(data)?;
            let target = state.length as usize;
            if state.packet.len() > target {
                return Err(Error::InvalidValue);
            }
            if state.packet.len() == target {
                Ok(Some((state.channel, state.packet)))
            } else {
                self.state.replace(state);
                Ok(None)
            }
        } else {
            Err(Error::NotFound)
        }
    }
}
