//! Per-connection lifecycle states.

use std::fmt;

use super::AdapterError;

/// Where a connection is in its single request/response exchange.
///
/// ```text
/// Received ─┬─▶ StaticHit ─▶ Served
///           └─▶ BodyBuffering ─▶ HandlerInvoked ─▶ StreamingBody ─▶ Done
///
/// any non-terminal state ─▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted; the request head is being read.
    Received,
    /// The static resolver produced a file; the response is being written.
    StaticHit,
    /// Static response fully written.
    Served,
    /// Draining the request body (a no-op for GET/HEAD).
    BodyBuffering,
    /// Awaiting the handler.
    HandlerInvoked,
    /// Writing the handler's head and pumping its body.
    StreamingBody,
    /// Handler response fully written.
    Done,
    /// The exchange ended on an error.
    Failed,
}

impl ConnectionState {
    /// `Served`, `Done` and `Failed` end the exchange.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Served | Self::Done | Self::Failed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Received, StaticHit)
                | (Received, BodyBuffering)
                | (StaticHit, Served)
                | (BodyBuffering, HandlerInvoked)
                | (HandlerInvoked, StreamingBody)
                | (StreamingBody, Done)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The ordered list of states a connection passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrace {
    states: Vec<ConnectionState>,
}

impl StateTrace {
    /// A trace starting in [`ConnectionState::Received`].
    pub fn new() -> Self {
        Self {
            states: vec![ConnectionState::Received],
        }
    }

    /// The current state.
    pub fn current(&self) -> ConnectionState {
        // `states` is never empty; it starts with `Received`.
        self.states
            .last()
            .copied()
            .unwrap_or(ConnectionState::Received)
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::IllegalTransition`] when `next` is not reachable
    /// from the current state; the trace is left unchanged.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), AdapterError> {
        let from = self.current();
        if !from.can_transition_to(next) {
            return Err(AdapterError::IllegalTransition { from, to: next });
        }
        self.states.push(next);
        Ok(())
    }

    /// Moves to [`ConnectionState::Failed`] unless already terminal.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.states.push(ConnectionState::Failed);
        }
    }

    /// All visited states, oldest first.
    pub fn states(&self) -> &[ConnectionState] {
        &self.states
    }
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn static_path() {
        let mut trace = StateTrace::new();
        trace.advance(StaticHit).unwrap();
        trace.advance(Served).unwrap();
        assert_eq!(trace.states(), &[Received, StaticHit, Served]);
        assert!(trace.current().is_terminal());
    }

    #[test]
    fn dispatch_path() {
        let mut trace = StateTrace::new();
        for next in [BodyBuffering, HandlerInvoked, StreamingBody, Done] {
            trace.advance(next).unwrap();
        }
        assert_eq!(trace.current(), Done);
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut trace = StateTrace::new();
        let err = trace.advance(HandlerInvoked).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::IllegalTransition {
                from: Received,
                to: HandlerInvoked
            }
        ));
        assert_eq!(trace.states(), &[Received]);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut trace = StateTrace::new();
        trace.advance(StaticHit).unwrap();
        trace.advance(Served).unwrap();
        assert!(trace.advance(Failed).is_err());
        trace.fail();
        assert_eq!(trace.states().len(), 3);
    }

    #[test]
    fn fail_from_any_stage() {
        for stage in [Received, StaticHit, BodyBuffering, HandlerInvoked, StreamingBody] {
            assert!(stage.can_transition_to(Failed), "{stage}");
        }
    }
}
