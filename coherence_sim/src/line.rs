use std::fmt;

use crate::common::Cycle;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Owned,
    Modified,
}

impl LineState {
    pub fn is_valid(self) -> bool {
        self != LineState::Invalid
    }
    pub fn short(self) -> char {
        match self {
            LineState::Invalid => 'I',
            LineState::Shared => 'S',
            LineState::Exclusive => 'E',
            LineState::Owned => 'O',
            LineState::Modified => 'M',
        }
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineState::Invalid => "Invalid",
            LineState::Shared => "Shared",
            LineState::Exclusive => "Exclusive",
            LineState::Owned => "Owned",
            LineState::Modified => "Modified",
        };
        write!(f, "{s}")
    }
}

/// a resident cache line. an `Invalid` line still occupies its way until evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoherenceLine {
    tag: u64,
    pub state: LineState,
    pub last_used: Cycle,
}

impl CoherenceLine {
    pub fn new(tag: u64, state: LineState, last_used: Cycle) -> Self {
        Self {
            tag,
            state,
            last_used,
        }
    }
    pub fn tag(&self) -> u64 {
        self.tag
    }
    pub fn touch(&mut self, cycle: Cycle) {
        self.last_used = cycle;
    }
}

impl fmt::Display for CoherenceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] tag {:#x} (used #{})",
            self.state.short(),
            self.tag,
            self.last_used
        )
    }
}
