// crates/cmrm-rs/src/fsm.rs

use core::marker::PhantomData;
use log::{debug, error, info};

/// A state or event set usable by the table-driven runtime: a closed enum
/// with a dense index space and a printable name.
pub trait FsmTag: Copy + PartialEq {
    const COUNT: usize;
    fn index(self) -> usize;
    fn name(self) -> &'static str;
}

/// Result of a transition operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict<S> {
    /// Keep the current state (may still be overridden by a forced state).
    Stay,
    /// Move to the given state (may still be overridden by a forced state).
    Move(S),
    /// Error case: the failsafe operation is invoked and its result cannot
    /// be overridden.
    Fault,
}

/// Transition operation: mutates the machine context, may take ownership of
/// the event payload.
pub type FsmOp<C, S, P> = fn(&mut C, &mut Option<P>) -> Verdict<S>;

/// One `(state, event)` cell of the transition table.
pub struct Entry<C, S, P> {
    /// If set, overrides the state returned by `op` (unless `op` faulted).
    pub forced: Option<S>,
    pub op: Option<FsmOp<C, S, P>>,
}

/// Table-driven finite state machine.
///
/// The table holds `S::COUNT * E::COUNT` entries, laid out row-major by
/// event (all states of event 0, then all states of event 1, ...). The
/// runtime is single-threaded and never blocks; suspensions belong to the
/// owning event loop.
pub struct Fsm<C: 'static, S: FsmTag + 'static, E: FsmTag, P: 'static> {
    state: S,
    table: &'static [Entry<C, S, P>],
    tag: &'static str,
    pre_op: Option<fn(&mut C, E)>,
    on_transition: Option<fn(&mut C, S, S, E)>,
    failsafe: FsmOp<C, S, P>,
    _evt: PhantomData<E>,
}

impl<C: 'static, S: FsmTag + 'static, E: FsmTag, P: 'static> Fsm<C, S, E, P> {
    pub fn new(
        table: &'static [Entry<C, S, P>],
        initial: S,
        tag: &'static str,
        pre_op: Option<fn(&mut C, E)>,
        on_transition: Option<fn(&mut C, S, S, E)>,
        failsafe: FsmOp<C, S, P>,
    ) -> Self {
        assert_eq!(table.len(), S::COUNT * E::COUNT);
        assert!(initial.index() < S::COUNT);
        Self {
            state: initial,
            table,
            tag,
            pre_op,
            on_transition,
            failsafe,
            _evt: PhantomData,
        }
    }

    pub fn state(&self) -> S {
        self.state
    }

    /// Feeds one event to the machine. Panics on an out-of-range state, as
    /// that is a logic bug and not a recoverable condition.
    pub fn notify(&mut self, ctx: &mut C, event: E, mut payload: Option<P>) {
        assert!(self.state.index() < S::COUNT);
        assert!(event.index() < E::COUNT);

        let entry = &self.table[self.state.index() + event.index() * S::COUNT];

        debug!(
            "<{}> =IN=  [{:<16}] {{{:<14}}}",
            self.tag,
            event.name(),
            self.state.name()
        );

        if let Some(pre_op) = self.pre_op {
            pre_op(ctx, event);
        }

        let mut next = self.state;
        let mut faulted = false;
        if let Some(op) = entry.op {
            match op(ctx, &mut payload) {
                Verdict::Stay => {}
                Verdict::Move(state) => next = state,
                Verdict::Fault => {
                    error!("<{}> - error detected, running failsafe operation", self.tag);
                    faulted = true;
                    match (self.failsafe)(ctx, &mut payload) {
                        Verdict::Stay => {}
                        Verdict::Move(state) => next = state,
                        Verdict::Fault => panic!("failsafe operation reported a fault"),
                    }
                }
            }
        }

        if !faulted {
            if let Some(forced) = entry.forced {
                debug!("<{}> - state forced", self.tag);
                next = forced;
            }
        }

        info!(
            "<{}> =OUT= [{:<16}] {{{:<14}}} => {{{:<14}}}",
            self.tag,
            event.name(),
            self.state.name(),
            next.name()
        );

        if next != self.state {
            if let Some(on_transition) = self.on_transition {
                on_transition(ctx, self.state, next, event);
            }
        }

        self.state = next;
        assert!(self.state.index() < S::COUNT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TState {
        A,
        B,
        C,
    }

    impl FsmTag for TState {
        const COUNT: usize = 3;
        fn index(self) -> usize {
            self as usize
        }
        fn name(self) -> &'static str {
            match self {
                TState::A => "A",
                TState::B => "B",
                TState::C => "C",
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TEvent {
        Go,
        Fail,
    }

    impl FsmTag for TEvent {
        const COUNT: usize = 2;
        fn index(self) -> usize {
            self as usize
        }
        fn name(self) -> &'static str {
            match self {
                TEvent::Go => "GO",
                TEvent::Fail => "FAIL",
            }
        }
    }

    #[derive(Default)]
    struct Ctx {
        ops: u32,
        pre_ops: u32,
        transitions: u32,
        failsafes: u32,
    }

    fn advance(ctx: &mut Ctx, _: &mut Option<()>) -> Verdict<TState> {
        ctx.ops += 1;
        Verdict::Move(TState::B)
    }

    fn stay(ctx: &mut Ctx, _: &mut Option<()>) -> Verdict<TState> {
        ctx.ops += 1;
        Verdict::Stay
    }

    fn fault(ctx: &mut Ctx, _: &mut Option<()>) -> Verdict<TState> {
        ctx.ops += 1;
        Verdict::Fault
    }

    fn failsafe(ctx: &mut Ctx, _: &mut Option<()>) -> Verdict<TState> {
        ctx.failsafes += 1;
        Verdict::Move(TState::A)
    }

    fn pre_op(ctx: &mut Ctx, _: TEvent) {
        ctx.pre_ops += 1;
    }

    fn on_transition(ctx: &mut Ctx, _: TState, _: TState, _: TEvent) {
        ctx.transitions += 1;
    }

    // Rows are laid out by event: (A, B, C) for Go, then (A, B, C) for Fail.
    static TABLE: [Entry<Ctx, TState, ()>; 6] = [
        Entry { forced: None, op: Some(advance) },
        Entry { forced: Some(TState::C), op: Some(stay) },
        Entry { forced: None, op: None },
        Entry { forced: Some(TState::C), op: Some(fault) },
        Entry { forced: None, op: Some(fault) },
        Entry { forced: None, op: Some(stay) },
    ];

    fn fsm() -> Fsm<Ctx, TState, TEvent, ()> {
        Fsm::new(
            &TABLE,
            TState::A,
            "TEST",
            Some(pre_op),
            Some(on_transition),
            failsafe,
        )
    }

    #[test]
    fn operation_result_moves_the_state() {
        let mut ctx = Ctx::default();
        let mut fsm = fsm();
        fsm.notify(&mut ctx, TEvent::Go, None);
        assert_eq!(fsm.state(), TState::B);
        assert_eq!(ctx.ops, 1);
        assert_eq!(ctx.pre_ops, 1);
        assert_eq!(ctx.transitions, 1);
    }

    #[test]
    fn forced_state_overrides_stay() {
        let mut ctx = Ctx::default();
        let mut fsm = fsm();
        fsm.notify(&mut ctx, TEvent::Go, None);
        fsm.notify(&mut ctx, TEvent::Go, None);
        // B's Go operation keeps the state but the table forces C.
        assert_eq!(fsm.state(), TState::C);
    }

    #[test]
    fn empty_entry_keeps_the_state() {
        let mut ctx = Ctx::default();
        let mut fsm = fsm();
        fsm.notify(&mut ctx, TEvent::Go, None);
        fsm.notify(&mut ctx, TEvent::Go, None);
        fsm.notify(&mut ctx, TEvent::Go, None);
        assert_eq!(fsm.state(), TState::C);
        assert_eq!(ctx.transitions, 2);
    }

    #[test]
    fn fault_routes_to_failsafe_and_ignores_forced_state() {
        let mut ctx = Ctx::default();
        let mut fsm = fsm();
        // A's Fail entry forces C, but the operation faults: the failsafe
        // result (A) must win.
        fsm.notify(&mut ctx, TEvent::Fail, None);
        assert_eq!(fsm.state(), TState::A);
        assert_eq!(ctx.failsafes, 1);
    }

    #[test]
    fn fault_in_b_returns_to_initial() {
        let mut ctx = Ctx::default();
        let mut fsm = fsm();
        fsm.notify(&mut ctx, TEvent::Go, None);
        assert_eq!(fsm.state(), TState::B);
        fsm.notify(&mut ctx, TEvent::Fail, None);
        assert_eq!(fsm.state(), TState::A);
        assert_eq!(ctx.failsafes, 1);
        assert_eq!(ctx.transitions, 2);
    }
}
