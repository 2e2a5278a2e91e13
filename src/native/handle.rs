//! Two-phase handle lifetime.
//!
//! A handle moves `Open → Closing → Closed` and its slot may only be freed
//! from `Closed`. Closing is split in two so that the resource can finish
//! its asynchronous shutdown before the slot is reused; completions that
//! arrive for a released handle are rejected by the generation check.

use thiserror::Error;

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Open,
    Closing,
    Closed,
}

/// Generational index into a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("{0} is not a live handle")]
    Stale(HandleId),
    #[error("{id} is {state:?}, expected {expected:?}")]
    WrongState {
        id: HandleId,
        state: HandleState,
        expected: HandleState,
    },
    #[error("{id} still has {pending} operation(s) in flight")]
    OperationsPending { id: HandleId, pending: usize },
}

#[derive(Debug)]
struct Entry<T> {
    state: HandleState,
    resource: Option<T>,
    pending: usize,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Arena owning handle resources for one worker.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Register an open resource.
    pub fn insert(&mut self, resource: T) -> HandleId {
        let entry = Entry {
            state: HandleState::Open,
            resource: Some(resource),
            pending: 0,
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return HandleId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        HandleId {
            index,
            generation: 0,
        }
    }

    fn entry(&self, id: HandleId) -> Result<&Entry<T>, HandleError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(HandleError::Stale(id))
    }

    fn entry_mut(&mut self, id: HandleId) -> Result<&mut Entry<T>, HandleError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(HandleError::Stale(id))
    }

    fn expect_state(id: HandleId, entry: &Entry<T>, expected: HandleState) -> Result<(), HandleError> {
        if entry.state != expected {
            return Err(HandleError::WrongState {
                id,
                state: entry.state,
                expected,
            });
        }
        Ok(())
    }

    pub fn state(&self, id: HandleId) -> Option<HandleState> {
        self.entry(id).ok().map(|e| e.state)
    }

    /// Borrow the resource of an open handle.
    pub fn get(&self, id: HandleId) -> Option<&T> {
        self.entry(id)
            .ok()
            .filter(|e| e.state == HandleState::Open)
            .and_then(|e| e.resource.as_ref())
    }

    /// Record an operation issued against an open handle.
    pub fn begin_op(&mut self, id: HandleId) -> Result<(), HandleError> {
        let entry = self.entry_mut(id)?;
        Self::expect_state(id, entry, HandleState::Open)?;
        entry.pending += 1;
        Ok(())
    }

    /// Record the completion of an operation.
    ///
    /// Allowed while `Closing` so outstanding operations can drain.
    pub fn end_op(&mut self, id: HandleId) -> Result<(), HandleError> {
        let entry = self.entry_mut(id)?;
        if entry.state == HandleState::Closed {
            return Err(HandleError::WrongState {
                id,
                state: entry.state,
                expected: HandleState::Closing,
            });
        }
        entry.pending = entry.pending.saturating_sub(1);
        Ok(())
    }

    /// Start closing: `Open → Closing`. Hands the resource back so the caller
    /// can perform the asynchronous close.
    pub fn begin_close(&mut self, id: HandleId) -> Result<T, HandleError> {
        let entry = self.entry_mut(id)?;
        Self::expect_state(id, entry, HandleState::Open)?;
        entry.state = HandleState::Closing;
        entry.resource.take().ok_or(HandleError::Stale(id))
    }

    /// The close callback: `Closing → Closed`.
    pub fn complete_close(&mut self, id: HandleId) -> Result<(), HandleError> {
        let entry = self.entry_mut(id)?;
        Self::expect_state(id, entry, HandleState::Closing)?;
        if entry.pending > 0 {
            return Err(HandleError::OperationsPending {
                id,
                pending: entry.pending,
            });
        }
        entry.state = HandleState::Closed;
        Ok(())
    }

    /// Free the slot of a closed handle.
    pub fn release(&mut self, id: HandleId) -> Result<(), HandleError> {
        let entry = self.entry(id)?;
        Self::expect_state(id, entry, HandleState::Closed)?;

        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(())
    }

    /// Number of handles not yet released.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over open handles.
    pub fn iter_open(&self) -> impl Iterator<Item = (HandleId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let entry = slot.entry.as_ref()?;
            if entry.state != HandleState::Open {
                return None;
            }
            let id = HandleId {
                index: index as u32,
                generation: slot.generation,
            };
            entry.resource.as_ref().map(|r| (id, r))
        })
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
