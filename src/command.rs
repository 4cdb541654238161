//! Tracking of in-flight HCI commands.
//!
//! Every issued command takes a slot keyed by opcode plus a monotonically
//! increasing sequence number. The slot is taken before the command is
//! written so a fast controller cannot answer an unregistered command.
//! Completion events resolve the oldest pending slot with a matching
//! opcode.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use heapless::Vec;

use crate::hci::Status;
use crate::Error;

/// Return parameters of a completed command, status first.
pub(crate) type CmdReturn = Vec<u8, 64>;

struct Slot {
    opcode: u16,
    seq: u32,
    state: SlotState,
    waker: WakerRegistration,
}

enum SlotState {
    Free,
    /// Waiting for Command Complete, or Command Status when `wants_status`.
    Pending { wants_status: bool },
    Complete(CmdReturn),
    Failed(Error),
}

struct State<const N: usize> {
    next_seq: u32,
    closed: bool,
    slots: [Slot; N],
}

pub(crate) struct PendingCommands<M: RawMutex, const N: usize> {
    state: Mutex<M, RefCell<State<N>>>,
}

impl<M: RawMutex, const N: usize> PendingCommands<M, N> {
    const SLOT: Slot = Slot {
        opcode: 0,
        seq: 0,
        state: SlotState::Free,
        waker: WakerRegistration::new(),
    };

    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                next_seq: 0,
                closed: false,
                slots: [Self::SLOT; N],
            })),
        }
    }

    fn with_mut<F: FnOnce(&mut State<N>) -> R, R>(&self, f: F) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Take a slot for a command about to be written.
    pub(crate) fn register(&self, opcode: u16, wants_status: bool) -> Result<PendingToken<'_, M, N>, Error> {
        self.with_mut(|state| {
            if state.closed {
                return Err(Error::ChannelClosed);
            }
            let seq = state.next_seq;
            for (index, slot) in state.slots.iter_mut().enumerate() {
                if matches!(slot.state, SlotState::Free) {
                    slot.opcode = opcode;
                    slot.seq = seq;
                    slot.state = SlotState::Pending { wants_status };
                    state.next_seq = state.next_seq.wrapping_add(1);
                    return Ok(PendingToken {
                        pending: self,
                        index,
                        seq,
                    });
                }
            }
            Err(Error::Busy)
        })
    }

    /// Resolve the oldest pending slot for `opcode` with complete parameters.
    pub(crate) fn complete(&self, opcode: u16, params: &[u8]) {
        self.with_mut(|state| {
            if let Some(slot) = oldest_pending(&mut state.slots, opcode) {
                match CmdReturn::from_slice(params) {
                    Ok(ret) => slot.state = SlotState::Complete(ret),
                    Err(_) => slot.state = SlotState::Failed(Error::InsufficientSpace),
                }
                slot.waker.wake();
            } else {
                trace!("[cmd] unsolicited completion for opcode {:04x}", opcode);
            }
        })
    }

    /// Resolve or fail the oldest pending slot for `opcode` from a
    /// Command Status event.
    pub(crate) fn complete_status(&self, opcode: u16, status: Status) {
        self.with_mut(|state| {
            if let Some(slot) = oldest_pending(&mut state.slots, opcode) {
                let SlotState::Pending { wants_status } = slot.state else {
                    return;
                };
                if wants_status {
                    let mut ret = CmdReturn::new();
                    let _ = ret.push(status.raw());
                    slot.state = SlotState::Complete(ret);
                    slot.waker.wake();
                } else if status != Status::SUCCESS {
                    slot.state = SlotState::Failed(Error::Hci(status));
                    slot.waker.wake();
                }
                // A success status for a command that completes later is
                // only flow control, leave the slot pending.
            }
        })
    }

    /// Fail every in-flight command and refuse new ones.
    pub(crate) fn close(&self, error: Error) {
        self.with_mut(|state| {
            if state.closed {
                return;
            }
            state.closed = true;
            for slot in state.slots.iter_mut() {
                if matches!(slot.state, SlotState::Pending { .. }) {
                    slot.state = SlotState::Failed(error);
                    slot.waker.wake();
                }
            }
        })
    }
}

fn oldest_pending(slots: &mut [Slot], opcode: u16) -> Option<&mut Slot> {
    slots
        .iter_mut()
        .filter(|slot| slot.opcode == opcode && matches!(slot.state, SlotState::Pending { .. }))
        .min_by_key(|slot| slot.seq)
}

/// Claim on a command slot. Dropping it releases the slot, so a timed out
/// caller does not leak its entry.
pub(crate) struct PendingToken<'a, M: RawMutex, const N: usize> {
    pending: &'a PendingCommands<M, N>,
    index: usize,
    seq: u32,
}

impl<M: RawMutex, const N: usize> PendingToken<'_, M, N> {
    /// Wait for resolution of this slot.
    pub(crate) async fn wait(&self) -> Result<CmdReturn, Error> {
        poll_fn(|cx| {
            self.pending.with_mut(|state| {
                let slot = &mut state.slots[self.index];
                debug_assert_eq!(slot.seq, self.seq);
                match core::mem::replace(&mut slot.state, SlotState::Free) {
                    SlotState::Complete(ret) => Poll::Ready(Ok(ret)),
                    SlotState::Failed(err) => Poll::Ready(Err(err)),
                    other => {
                        slot.state = other;
                        slot.waker.register(cx.waker());
                        Poll::Pending
                    }
                }
            })
        })
        .await
    }
}

impl<M: RawMutex, const N: usize> Drop for PendingToken<'_, M, N> {
    fn drop(&mut self) {
        self.pending.with_mut(|state| {
            let slot = &mut state.slots[self.index];
            if slot.seq == self.seq {
                slot.state = SlotState::Free;
            }
        })
    }
}
