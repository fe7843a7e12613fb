//! Source position tracking for the assembler.

use smallvec::SmallVec;

use crate::info::NO_POSITION;
use crate::mode::RelocMode;

/// Current and last-written positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionState {
    /// Position of the code being emitted
    pub current_position: i32,
    /// Statement position of the code being emitted
    pub current_statement_position: i32,
    /// Last position written to the stream
    pub written_position: i32,
    /// Last statement position written to the stream
    pub written_statement_position: i32,
}

impl Default for PositionState {
    fn default() -> Self {
        Self {
            current_position: NO_POSITION,
            current_statement_position: NO_POSITION,
            written_position: NO_POSITION,
            written_statement_position: NO_POSITION,
        }
    }
}

/// Position records produced by one flush, in write order.
pub type PositionRecords = SmallVec<[(RelocMode, i32); 2]>;

/// Remembers the positions the code generator announces and decides which
/// of them still need a relocation record.
#[derive(Debug, Clone, Default)]
pub struct PositionsRecorder {
    state: PositionState,
}

impl PositionsRecorder {
    /// Recorder with no known position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> PositionState {
        self.state
    }

    /// Set the current position.
    pub fn record_position(&mut self, pos: i32) {
        debug_assert!(pos != NO_POSITION && pos >= 0, "invalid position {pos}");
        self.state.current_position = pos;
    }

    /// Set the current statement position.
    pub fn record_statement_position(&mut self, pos: i32) {
        debug_assert!(pos != NO_POSITION && pos >= 0, "invalid position {pos}");
        self.state.current_statement_position = pos;
    }

    /// Current position
    pub fn current_position(&self) -> i32 {
        self.state.current_position
    }

    /// Current statement position
    pub fn current_statement_position(&self) -> i32 {
        self.state.current_statement_position
    }

    /// Mark the current positions written and return the records that
    /// carry them.
    ///
    /// A changed statement position is written first and also counts as the
    /// written position; the position is written only if it then differs.
    pub fn take_unwritten(&mut self) -> PositionRecords {
        let mut records = PositionRecords::new();
        let state = &mut self.state;

        if state.current_statement_position != state.written_statement_position {
            records.push((
                RelocMode::StatementPosition,
                state.current_statement_position,
            ));
            state.written_position = state.current_statement_position;
            state.written_statement_position = state.current_statement_position;
        }

        if state.current_position != state.written_position {
            records.push((RelocMode::Position, state.current_position));
            state.written_position = state.current_position;
        }

        records
    }
}
