//! Stream identifiers.
//!
//! `id = (sequence << 2) | (unidirectional << 1) | server_initiated`

use std::fmt;

use skein_core::Role;

const SERVER_BIT: u64 = 0b01;
const UNIDIRECTIONAL_BIT: u64 = 0b10;

/// Connection-scoped stream identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Build an id from its parts.
    pub fn new(sequence: u64, bidirectional: bool, initiator: Role) -> Self {
        let mut value = sequence << 2;
        if !bidirectional {
            value |= UNIDIRECTIONAL_BIT;
        }
        if initiator.is_server() {
            value |= SERVER_BIT;
        }
        Self(value)
    }

    /// Interpret a raw wire value.
    pub fn from_value(value: u64) -> Self {
        Self(value)
    }

    /// Raw wire value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Position within the (initiator, direction) class.
    pub fn sequence(self) -> u64 {
        self.0 >> 2
    }

    /// Whether both sides may write.
    pub fn is_bidirectional(self) -> bool {
        self.0 & UNIDIRECTIONAL_BIT == 0
    }

    /// Side that opened the stream.
    pub fn initiator(self) -> Role {
        if self.0 & SERVER_BIT != 0 {
            Role::Server
        } else {
            Role::Client
        }
    }

    pub(crate) fn class(self) -> usize {
        direction_index(self.is_bidirectional())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn direction_index(bidirectional: bool) -> usize {
    if bidirectional {
        0
    } else {
        1
    }
}

/// Hands out local stream ids in increasing order per direction.
#[derive(Debug)]
pub(crate) struct StreamIdAllocator {
    role: Role,
    next: [u64; 2],
}

impl StreamIdAllocator {
    pub(crate) fn new(role: Role) -> Self {
        Self { role, next: [0; 2] }
    }

    pub(crate) fn next(&mut self, bidirectional: bool) -> StreamId {
        let slot = &mut self.next[direction_index(bidirectional)];
        let id = StreamId::new(*slot, bidirectional, self.role);
        *slot += 1;
        id
    }

    /// Whether `id` was already handed out by this allocator.
    pub(crate) fn was_allocated(&self, id: StreamId) -> bool {
        id.initiator() == self.role && id.sequence() < self.next[id.class()]
    }
}
