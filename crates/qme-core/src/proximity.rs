//! Proximity state machine for a held ticket.
//!
//! Derives the guest's UI state from `(now_serving, ticket_number, checked_in)`
//! and decides when the guest is removed automatically. With
//! `gap = now_serving - ticket_number` and `ahead = ticket_number - now_serving`,
//! each evaluation applies, in order:
//!
//! 1. **Auto-leave**: `gap >= no_check_in_bye` (not checked in) or
//!    `gap >= checked_in_bye` (checked in) removes the guest once per ticket
//!    and ends the evaluation.
//! 2. **Retreat**: `ahead > time_to_check_in` forgets the approach; a guest
//!    who is not checked in loses the check-in prompt and notice.
//! 3. **Slip-back**: a guest marked as being served whose number is ahead
//!    again loses the highlight; checked-in guests go back to "wait".
//! 4. **Approach** (edge): `0 < ahead <= time_to_check_in`.
//! 5. **Now serving**: `gap >= 0`. Checked in: edge-triggered "your turn".
//!    Not checked in: "please check in now" on every evaluation.
//!
//! Steps 2 to 5 are layered: all that match are applied in order.

use serde::{Deserialize, Serialize};

use crate::types::{LeaveReason, TicketNumber};

/// Remove a guest who never checked in once `gap` reaches this.
pub const NO_CHECK_IN_BYE: i64 = 5;
/// Remove a checked-in guest once `gap` reaches this.
pub const CHECKED_IN_BYE: i64 = 9;
/// Tell the guest to head to the queue once `ahead` drops to this.
pub const TIME_TO_CHECK_IN: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub no_check_in_bye: i64,
    pub checked_in_bye: i64,
    pub time_to_check_in: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            no_check_in_bye: NO_CHECK_IN_BYE,
            checked_in_bye: CHECKED_IN_BYE,
            time_to_check_in: TIME_TO_CHECK_IN,
        }
    }
}

impl Thresholds {
    /// Reason to remove the guest at this gap, if any.
    pub fn auto_leave(&self, gap: i64, checked_in: bool) -> Option<LeaveReason> {
        if checked_in {
            (gap >= self.checked_in_bye).then_some(LeaveReason::CheckedInTimeout)
        } else {
            (gap >= self.no_check_in_bye).then_some(LeaveReason::NoCheckInTimeout)
        }
    }
}

// ─── Phase ────────────────────────────────────────────────────────

/// Edge-trigger memory of one tab for one ticket. Never persisted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityPhase {
    /// Not evaluated yet.
    #[default]
    None,
    /// Further than the approach threshold.
    Waiting,
    /// Approach notice shown, not checked in.
    Approaching,
    /// Approached (or slipped back) while checked in.
    CheckedInWaiting,
    /// "Your turn" shown to a checked-in guest.
    NowServing,
    /// Auto-leave fired; terminal for this ticket.
    Left,
}

impl ProximityPhase {
    pub fn has_approached(self) -> bool {
        matches!(
            self,
            Self::Approaching | Self::CheckedInWaiting | Self::NowServing
        )
    }

    pub fn is_now_serving(self) -> bool {
        matches!(self, Self::NowServing)
    }

    pub fn has_auto_left(self) -> bool {
        matches!(self, Self::Left)
    }

    /// Phase-only projection of [`step`].
    pub fn transition(self, gap: i64, ahead: i64, checked_in: bool, thresholds: &Thresholds) -> Self {
        let state = ProximityState {
            phase: self,
            view: GuestView::default(),
        };
        evaluate(&state, gap, ahead, checked_in, thresholds).0.phase
    }

    fn compose(approached: bool, now_serving: bool, checked_in: bool) -> Self {
        match (now_serving, approached, checked_in) {
            (true, _, _) => Self::NowServing,
            (false, true, true) => Self::CheckedInWaiting,
            (false, true, false) => Self::Approaching,
            (false, false, _) => Self::Waiting,
        }
    }
}

// ─── View ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    HeadToQueue,
    CheckedInWait,
    YourTurn,
    CheckInNow,
}

impl Notice {
    pub fn lines(self) -> (&'static str, &'static str) {
        match self {
            Self::HeadToQueue => (
                "It is time to head to the queue",
                "Click on <Check In> when you arrive",
            ),
            Self::CheckedInWait => (
                "You're checked in",
                "Wait until <Your Number> matches <NOW SERVING>",
            ),
            Self::YourTurn => (
                "It is your turn to place an order",
                "<NOW SERVING> has reached <Your Number>",
            ),
            Self::CheckInNow => ("Please check in now", "Tap <Check In> to continue"),
        }
    }
}

/// What the guest sees besides the two numbers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestView {
    pub notice: Option<Notice>,
    pub show_check_in: bool,
    /// The "ready" highlight around the ticket card.
    pub highlight: bool,
}

impl GuestView {
    /// Local reaction to the guest pressing "Check In".
    pub fn acknowledge_check_in(&mut self) {
        self.show_check_in = false;
        self.notice = Some(Notice::CheckedInWait);
    }
}

// ─── Step ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityInput {
    pub now_serving: i64,
    pub ticket_number: TicketNumber,
    pub checked_in: bool,
}

impl ProximityInput {
    pub fn gap(&self) -> i64 {
        self.now_serving.saturating_sub(self.ticket_number.get())
    }

    pub fn ahead(&self) -> i64 {
        self.ticket_number.get().saturating_sub(self.now_serving)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityState {
    pub phase: ProximityPhase,
    pub view: GuestView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "detail")]
pub enum ProximityEvent {
    AutoLeave(LeaveReason),
    Retreated,
    SlippedBack,
    Approached { checked_in: bool },
    YourTurn,
    CheckInNow,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProximityOutput {
    pub events: Vec<ProximityEvent>,
    /// Set exactly once per ticket, on the evaluation that crosses a bye threshold.
    pub auto_leave: Option<LeaveReason>,
    /// Whether phase or view changed.
    pub changed: bool,
}

/// Evaluate one tick.
///
/// Pure: the caller owns the state and performs the leave when
/// `auto_leave` is set.
pub fn step(
    state: &ProximityState,
    input: ProximityInput,
    thresholds: &Thresholds,
) -> (ProximityState, ProximityOutput) {
    evaluate(state, input.gap(), input.ahead(), input.checked_in, thresholds)
}

fn evaluate(
    state: &ProximityState,
    gap: i64,
    ahead: i64,
    checked_in: bool,
    thresholds: &Thresholds,
) -> (ProximityState, ProximityOutput) {
    if state.phase.has_auto_left() {
        return (*state, ProximityOutput::default());
    }

    // 1. Auto-leave
    if let Some(reason) = thresholds.auto_leave(gap, checked_in) {
        let next = ProximityState {
            phase: ProximityPhase::Left,
            view: GuestView::default(),
        };
        let output = ProximityOutput {
            events: vec![ProximityEvent::AutoLeave(reason)],
            auto_leave: Some(reason),
            changed: next != *state,
        };
        return (next, output);
    }

    let mut view = state.view;
    let mut events = Vec::new();
    let mut approached = state.phase.has_approached();
    let mut now_serving = state.phase.is_now_serving();

    // 2. Retreat
    if ahead > thresholds.time_to_check_in {
        if approached {
            events.push(ProximityEvent::Retreated);
        }
        approached = false;
        if !checked_in {
            view.show_check_in = false;
            view.notice = None;
        }
    }

    // 3. Slip-back
    if ahead > 0 && now_serving {
        now_serving = false;
        view.highlight = false;
        events.push(ProximityEvent::SlippedBack);
        if checked_in {
            view.show_check_in = false;
            view.notice = Some(Notice::CheckedInWait);
        }
    }

    // 4. Approach
    if !approached && ahead > 0 && ahead <= thresholds.time_to_check_in {
        approached = true;
        events.push(ProximityEvent::Approached { checked_in });
        if checked_in {
            view.show_check_in = false;
            view.notice = Some(Notice::CheckedInWait);
        } else {
            view.show_check_in = true;
            view.notice = Some(Notice::HeadToQueue);
        }
    }

    // 5. Now serving
    if gap >= 0 {
        if checked_in {
            if !now_serving {
                now_serving = true;
                view.show_check_in = false;
                view.notice = Some(Notice::YourTurn);
                view.highlight = true;
                events.push(ProximityEvent::YourTurn);
            }
        } else {
            view.show_check_in = true;
            view.notice = Some(Notice::CheckInNow);
            view.highlight = false;
            events.push(ProximityEvent::CheckInNow);
        }
    }

    let next = ProximityState {
        phase: ProximityPhase::compose(approached, now_serving, checked_in),
        view,
    };
    let output = ProximityOutput {
        events,
        auto_leave: None,
        changed: next != *state,
    };
    (next, output)
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(now_serving: i64, ticket: i64, checked_in: bool) -> ProximityInput {
        ProximityInput {
            now_serving,
            ticket_number: TicketNumber::new(ticket),
            checked_in,
        }
    }

    /// Run a sequence of `now_serving` values, returning events per tick.
    fn run(
        ticket: i64,
        checked_in: bool,
        sequence: &[i64],
    ) -> (ProximityState, Vec<Vec<ProximityEvent>>) {
        let th = Thresholds::default();
        let mut state = ProximityState::default();
        let mut ticks = Vec::new();
        for &ns in sequence {
            let (next, out) = step(&state, input(ns, ticket, checked_in), &th);
            state = next;
            ticks.push(out.events);
        }
        (state, ticks)
    }

    #[test]
    fn approach_fires_once_then_check_in_nag_repeats() {
        let (state, ticks) = run(10, false, &[7, 8, 10, 10, 11]);

        assert_eq!(ticks[0], vec![ProximityEvent::Approached { checked_in: false }]);
        assert!(ticks[1].is_empty(), "approach must not re-fire at ahead=2");
        assert_eq!(ticks[2], vec![ProximityEvent::CheckInNow]);
        assert_eq!(ticks[3], vec![ProximityEvent::CheckInNow]);
        assert_eq!(ticks[4], vec![ProximityEvent::CheckInNow]);

        assert_eq!(state.view.notice, Some(Notice::CheckInNow));
        assert!(state.view.show_check_in);
        assert!(!state.view.highlight);
    }

    #[test]
    fn approach_notice_for_unchecked_guest() {
        let (state, _) = run(10, false, &[7]);
        assert_eq!(state.phase, ProximityPhase::Approaching);
        assert_eq!(state.view.notice, Some(Notice::HeadToQueue));
        assert!(state.view.show_check_in);
    }

    #[test]
    fn approach_notice_for_checked_in_guest() {
        let (state, ticks) = run(10, true, &[8]);
        assert_eq!(ticks[0], vec![ProximityEvent::Approached { checked_in: true }]);
        assert_eq!(state.phase, ProximityPhase::CheckedInWaiting);
        assert_eq!(state.view.notice, Some(Notice::CheckedInWait));
        assert!(!state.view.show_check_in);
    }

    #[test]
    fn checked_in_jump_triggers_checked_in_timeout() {
        let th = Thresholds::default();
        let (state, _) = run(10, true, &[1]);
        let (next, out) = step(&state, input(19, 10, true), &th);
        assert_eq!(out.auto_leave, Some(LeaveReason::CheckedInTimeout));
        assert_eq!(out.events, vec![ProximityEvent::AutoLeave(LeaveReason::CheckedInTimeout)]);
        assert_eq!(next.phase, ProximityPhase::Left);
    }

    #[test]
    fn unchecked_jump_triggers_no_check_in_timeout() {
        let (state, ticks) = run(10, false, &[15]);
        assert_eq!(ticks[0], vec![ProximityEvent::AutoLeave(LeaveReason::NoCheckInTimeout)]);
        assert!(state.phase.has_auto_left());
    }

    #[test]
    fn checked_in_guest_tolerates_gap_below_bye() {
        let (state, ticks) = run(10, true, &[10, 18]);
        assert_eq!(ticks[0], vec![ProximityEvent::YourTurn]);
        assert!(ticks[1].is_empty());
        assert_eq!(state.phase, ProximityPhase::NowServing);
    }

    #[test]
    fn auto_leave_fires_at_most_once() {
        let (_, ticks) = run(10, false, &[15, 16, 30]);
        assert_eq!(ticks[0].len(), 1);
        assert!(ticks[1].is_empty());
        assert!(ticks[2].is_empty());
    }

    #[test]
    fn your_turn_is_edge_triggered() {
        let (state, ticks) = run(10, true, &[9, 10, 10, 11]);
        assert_eq!(ticks[0], vec![ProximityEvent::Approached { checked_in: true }]);
        assert_eq!(ticks[1], vec![ProximityEvent::YourTurn]);
        assert!(ticks[2].is_empty());
        assert!(ticks[3].is_empty());
        assert!(state.view.highlight);
        assert_eq!(state.view.notice, Some(Notice::YourTurn));
    }

    #[test]
    fn slip_back_clears_highlight_and_restores_wait() {
        let (state, ticks) = run(10, true, &[10, 9]);
        assert_eq!(ticks[1], vec![ProximityEvent::SlippedBack]);
        assert_eq!(state.phase, ProximityPhase::CheckedInWaiting);
        assert!(!state.view.highlight);
        assert_eq!(state.view.notice, Some(Notice::CheckedInWait));
    }

    #[test]
    fn slip_back_then_your_turn_fires_again() {
        let (_, ticks) = run(10, true, &[10, 9, 10]);
        assert_eq!(ticks[2], vec![ProximityEvent::YourTurn]);
    }

    #[test]
    fn retreat_resets_approach_and_hides_prompt() {
        let (state, ticks) = run(10, false, &[8, 2, 8]);
        assert_eq!(ticks[1], vec![ProximityEvent::Retreated]);
        assert_eq!(ticks[2], vec![ProximityEvent::Approached { checked_in: false }]);
        assert_eq!(state.phase, ProximityPhase::Approaching);

        let (after_retreat, _) = run(10, false, &[8, 2]);
        assert_eq!(after_retreat.view, GuestView::default());
        assert_eq!(after_retreat.phase, ProximityPhase::Waiting);
    }

    #[test]
    fn retreat_keeps_notice_for_checked_in_guest() {
        let (state, _) = run(10, true, &[8, 2]);
        assert_eq!(state.phase, ProximityPhase::Waiting);
        assert_eq!(state.view.notice, Some(Notice::CheckedInWait));
    }

    #[test]
    fn now_serving_retreat_far_clears_everything_edge() {
        let (state, ticks) = run(10, true, &[10, 2]);
        assert_eq!(ticks[1], vec![ProximityEvent::Retreated, ProximityEvent::SlippedBack]);
        assert_eq!(state.phase, ProximityPhase::Waiting);
        assert!(!state.view.highlight);
    }

    #[test]
    fn checking_in_after_nag_promotes_to_your_turn() {
        let th = Thresholds::default();
        let (state, _) = run(10, false, &[10]);
        let (next, out) = step(&state, input(10, 10, true), &th);
        assert_eq!(out.events, vec![ProximityEvent::YourTurn]);
        assert_eq!(next.phase, ProximityPhase::NowServing);
        assert!(next.view.highlight);
    }

    #[test]
    fn far_away_is_quiet() {
        let (state, ticks) = run(10, false, &[1, 2, 3]);
        assert!(ticks.iter().all(Vec::is_empty));
        assert_eq!(state.phase, ProximityPhase::Waiting);
        assert_eq!(state.view, GuestView::default());
    }

    #[test]
    fn custom_thresholds() {
        let th = Thresholds {
            no_check_in_bye: 2,
            checked_in_bye: 4,
            time_to_check_in: 5,
        };
        let (s, out) = step(&ProximityState::default(), input(5, 10, false), &th);
        assert_eq!(out.events, vec![ProximityEvent::Approached { checked_in: false }]);
        let (_, out) = step(&s, input(12, 10, false), &th);
        assert_eq!(out.auto_leave, Some(LeaveReason::NoCheckInTimeout));
    }

    #[test]
    fn transition_matches_step() {
        let th = Thresholds::default();
        assert_eq!(
            ProximityPhase::None.transition(-3, 3, false, &th),
            ProximityPhase::Approaching
        );
        assert_eq!(
            ProximityPhase::Approaching.transition(0, 0, true, &th),
            ProximityPhase::NowServing
        );
        assert_eq!(
            ProximityPhase::NowServing.transition(9, -9, true, &th),
            ProximityPhase::Left
        );
        assert_eq!(ProximityPhase::Left.transition(0, 0, true, &th), ProximityPhase::Left);
    }

    #[test]
    fn acknowledge_check_in_view() {
        let mut view = GuestView {
            notice: Some(Notice::HeadToQueue),
            show_check_in: true,
            highlight: false,
        };
        view.acknowledge_check_in();
        assert!(!view.show_check_in);
        assert_eq!(view.notice, Some(Notice::CheckedInWait));
    }

    #[test]
    fn stable_inputs_are_unchanged() {
        let th = Thresholds::default();
        let (state, _) = run(10, true, &[8]);
        let (_, out) = step(&state, input(8, 10, true), &th);
        assert!(!out.changed);
        assert!(out.events.is_empty());
    }

    proptest! {
        #[test]
        fn auto_leave_matches_thresholds(ns in 1i64..200, ticket in 1i64..200, checked_in in any::<bool>()) {
            let th = Thresholds::default();
            let (_, out) = step(&ProximityState::default(), input(ns, ticket, checked_in), &th);
            let gap = ns - ticket;
            let limit = if checked_in { CHECKED_IN_BYE } else { NO_CHECK_IN_BYE };
            prop_assert_eq!(out.auto_leave.is_some(), gap >= limit);
        }

        #[test]
        fn gap_and_ahead_are_opposite(ns in -1000i64..1000, ticket in -1000i64..1000) {
            let i = input(ns, ticket, false);
            prop_assert_eq!(i.gap(), -i.ahead());
        }
    }
}
