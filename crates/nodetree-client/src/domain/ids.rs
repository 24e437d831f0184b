//! Per-connection identifier allocation.
//!
//! Four independent spaces. Each hands out ids from a wrapping counter and
//! skips any value that is still outstanding, so an id is never reused
//! before its terminal message has been observed.

use crate::domain::error::ClientError;
use std::collections::HashSet;
use std::fmt;

/// Identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSpace {
    /// `qid`
    Query,
    /// `rid`
    Request,
    /// `mid`
    Method,
    /// `bid`
    Broadcast,
}

impl IdSpace {
    const ALL: [IdSpace; 4] = [
        IdSpace::Query,
        IdSpace::Request,
        IdSpace::Method,
        IdSpace::Broadcast,
    ];

    fn index(self) -> usize {
        match self {
            IdSpace::Query => 0,
            IdSpace::Request => 1,
            IdSpace::Method => 2,
            IdSpace::Broadcast => 3,
        }
    }
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdSpace::Query => "query",
            IdSpace::Request => "request",
            IdSpace::Method => "method",
            IdSpace::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Space {
    next: u64,
    outstanding: HashSet<u64>,
}

impl Space {
    fn new(start: u64) -> Self {
        Self {
            next: start,
            outstanding: HashSet::new(),
        }
    }
}

/// Allocator for all four spaces of one connection.
#[derive(Debug)]
pub struct IdAllocator {
    spaces: [Space; 4],
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Counters start at 1 in every space.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(start: u64) -> Self {
        Self {
            spaces: [
                Space::new(start),
                Space::new(start),
                Space::new(start),
                Space::new(start),
            ],
        }
    }

    /// Allocate a fresh id. Never blocks.
    pub fn allocate(&mut self, space: IdSpace) -> u64 {
        let state = &mut self.spaces[space.index()];
        loop {
            let id = state.next;
            state.next = state.next.wrapping_add(1);
            if state.outstanding.insert(id) {
                return id;
            }
        }
    }

    /// Claim a caller-chosen id.
    pub fn reserve(&mut self, space: IdSpace, id: u64) -> Result<(), ClientError> {
        if self.spaces[space.index()].outstanding.insert(id) {
            Ok(())
        } else {
            Err(ClientError::IdInUse { space, id })
        }
    }

    /// Return an id to its space. Returns false if it was not outstanding.
    pub fn release(&mut self, space: IdSpace, id: u64) -> bool {
        self.spaces[space.index()].outstanding.remove(&id)
    }

    pub fn is_outstanding(&self, space: IdSpace, id: u64) -> bool {
        self.spaces[space.index()].outstanding.contains(&id)
    }

    pub fn outstanding(&self, space: IdSpace) -> usize {
        self.spaces[space.index()].outstanding.len()
    }

    /// Forget every outstanding id. Counters keep their position.
    pub fn release_all(&mut self) {
        for space in IdSpace::ALL {
            self.spaces[space.index()].outstanding.clear();
        }
    }
}
