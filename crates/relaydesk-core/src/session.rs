// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-room session state machine.
//!
//! `Waiting -> Active -> Ended`, with `Ended` terminal. The machine is pure:
//! it never performs I/O and is driven by the room registry while the room's
//! lock is held, so every transition is atomic with respect to relays.

use crate::error::PolicyViolation;
use crate::types::{EndCause, EndMetadata, Role, RoomState};

/// Result of feeding an input into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    None,
    /// Waiting -> Active.
    Activated,
    /// Waiting/Active -> Ended.
    Ended(EndCause),
}

/// Outcome of an accepted end signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// This signal ended the session.
    Ended(EndCause),
    /// The session was already over; re-confirm to the sender only.
    AlreadyEnded(EndCause),
}

#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    state: RoomState,
    end_cause: Option<EndCause>,
    closing_notice_sent: bool,
    needs_save: bool,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn end_cause(&self) -> Option<EndCause> {
        self.end_cause
    }

    pub fn is_ended(&self) -> bool {
        self.state == RoomState::Ended
    }

    /// True from the moment the session ends until a save succeeds.
    pub fn needs_save(&self) -> bool {
        self.needs_save
    }

    /// Re-evaluates the room after a connection joined.
    ///
    /// Activates exactly once, when a user and an operator are both present.
    pub fn on_join(&mut self, has_user: bool, has_operator: bool) -> Transition {
        if self.state == RoomState::Waiting && has_user && has_operator {
            self.state = RoomState::Active;
            return Transition::Activated;
        }
        Transition::None
    }

    /// Applies an explicit end signal from `sender`.
    ///
    /// Operator ends carry metadata; when `require_metadata` is set an
    /// operator end with blank metadata is refused and the state is unchanged.
    pub fn end(
        &mut self,
        sender: Role,
        metadata: &EndMetadata,
        require_metadata: bool,
    ) -> Result<EndOutcome, PolicyViolation> {
        if let Some(cause) = self.end_cause.filter(|_| self.is_ended()) {
            return Ok(EndOutcome::AlreadyEnded(cause));
        }
        if sender == Role::Operator && require_metadata && metadata.is_empty() {
            return Err(PolicyViolation::EndMetadataRequired);
        }
        let cause = EndCause::from_role(sender);
        self.finish(cause);
        Ok(EndOutcome::Ended(cause))
    }

    /// Re-evaluates the room after a user connection went away.
    ///
    /// Only an active room whose last user left is ended. Operator loss is
    /// never an end because consoles reconnect on their own.
    pub fn on_user_lost(&mut self, clean: bool, users_remaining: usize) -> Transition {
        if self.state != RoomState::Active || users_remaining > 0 {
            return Transition::None;
        }
        let cause = if clean {
            EndCause::User
        } else {
            EndCause::Network
        };
        self.finish(cause);
        Transition::Ended(cause)
    }

    /// Checks that a chat line may be relayed.
    pub fn admit_chat(&self) -> Result<(), PolicyViolation> {
        if self.is_ended() {
            return Err(PolicyViolation::SessionEnded);
        }
        Ok(())
    }

    /// Claims the single closing notice allowed after the end.
    ///
    /// Returns `true` once per ended session, `false` before the end and on
    /// every later call.
    pub fn take_closing_notice(&mut self) -> bool {
        if !self.is_ended() || self.closing_notice_sent {
            return false;
        }
        self.closing_notice_sent = true;
        true
    }

    pub fn mark_saved(&mut self) {
        self.needs_save = false;
    }

    fn finish(&mut self, cause: EndCause) {
        self.state = RoomState::Ended;
        self.end_cause = Some(cause);
        self.needs_save = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn billing() -> EndMetadata {
        EndMetadata {
            session_type: "billing".into(),
            ..Default::default()
        }
    }

    #[test]
    fn activates_once_when_both_roles_present() {
        let mut m = SessionMachine::new();
        assert_eq!(m.on_join(true, false), Transition::None);
        assert_eq!(m.on_join(true, false), Transition::None);
        assert_eq!(m.state(), RoomState::Waiting);
        assert_eq!(m.on_join(true, true), Transition::Activated);
        assert_eq!(m.on_join(true, true), Transition::None);
        assert_eq!(m.state(), RoomState::Active);
    }

    #[test]
    fn operator_end_requires_metadata_when_enforced() {
        let mut m = SessionMachine::new();
        m.on_join(true, true);
        assert_eq!(
            m.end(Role::Operator, &EndMetadata::default(), true),
            Err(PolicyViolation::EndMetadataRequired)
        );
        assert_eq!(m.state(), RoomState::Active);
        assert_eq!(
            m.end(Role::Operator, &billing(), true),
            Ok(EndOutcome::Ended(EndCause::Operator))
        );
        assert!(m.needs_save());
    }

    #[test]
    fn metadata_gate_can_be_disabled() {
        let mut m = SessionMachine::new();
        m.on_join(true, true);
        assert!(m.end(Role::Operator, &EndMetadata::default(), false).is_ok());
    }

    #[test]
    fn user_may_end_without_metadata_even_while_waiting() {
        let mut m = SessionMachine::new();
        m.on_join(true, false);
        assert_eq!(
            m.end(Role::User, &EndMetadata::default(), true),
            Ok(EndOutcome::Ended(EndCause::User))
        );
    }

    #[test]
    fn second_end_reconfirms_first_cause() {
        let mut m = SessionMachine::new();
        m.on_join(true, true);
        m.end(Role::User, &EndMetadata::default(), true).unwrap();
        assert_eq!(
            m.end(Role::Operator, &billing(), true),
            Ok(EndOutcome::AlreadyEnded(EndCause::User))
        );
        assert_eq!(m.end_cause(), Some(EndCause::User));
    }

    #[test]
    fn unclean_user_loss_ends_active_room_as_network() {
        let mut m = SessionMachine::new();
        m.on_join(true, true);
        assert_eq!(m.on_user_lost(false, 1), Transition::None);
        assert_eq!(m.on_user_lost(false, 0), Transition::Ended(EndCause::Network));
        assert!(m.needs_save());
    }

    #[test]
    fn clean_user_loss_is_attributed_to_user() {
        let mut m = SessionMachine::new();
        m.on_join(true, true);
        assert_eq!(m.on_user_lost(true, 0), Transition::Ended(EndCause::User));
    }

    #[test]
    fn user_loss_while_waiting_does_not_end() {
        let mut m = SessionMachine::new();
        m.on_join(true, false);
        assert_eq!(m.on_user_lost(false, 0), Transition::None);
        assert_eq!(m.state(), RoomState::Waiting);
    }

    #[test]
    fn closing_notice_is_granted_once_after_end() {
        let mut m = SessionMachine::new();
        assert!(!m.take_closing_notice());
        m.on_join(true, true);
        m.on_user_lost(false, 0);
        assert!(m.take_closing_notice());
        assert!(!m.take_closing_notice());
    }

    #[test]
    fn save_clears_needs_save() {
        let mut m = SessionMachine::new();
        m.on_join(true, true);
        m.end(Role::Operator, &billing(), true).unwrap();
        m.mark_saved();
        assert!(!m.needs_save());
        assert!(m.is_ended());
    }

    #[derive(Debug, Clone)]
    enum Input {
        Join { user: bool, operator: bool },
        End { operator: bool, with_meta: bool },
        UserLost { clean: bool, remaining: usize },
        Chat,
        Closing,
    }

    fn input() -> impl Strategy<Value = Input> {
        prop_oneof![
            (any::<bool>(), any::<bool>()).prop_map(|(user, operator)| Input::Join { user, operator }),
            (any::<bool>(), any::<bool>())
                .prop_map(|(operator, with_meta)| Input::End { operator, with_meta }),
            (any::<bool>(), 0usize..2).prop_map(|(clean, remaining)| Input::UserLost { clean, remaining }),
            Just(Input::Chat),
            Just(Input::Closing),
        ]
    }

    proptest! {
        #[test]
        fn ended_is_terminal_and_allows_one_closing_notice(inputs in prop::collection::vec(input(), 0..40)) {
            let mut m = SessionMachine::new();
            let mut activations = 0;
            let mut ended_seen = false;
            let mut notices = 0;
            for input in inputs {
                match input {
                    Input::Join { user, operator } => {
                        if m.on_join(user, operator) == Transition::Activated {
                            activations += 1;
                        }
                    }
                    Input::End { operator, with_meta } => {
                        let role = if operator { Role::Operator } else { Role::User };
                        let meta = if with_meta { billing() } else { EndMetadata::default() };
                        let _ = m.end(role, &meta, true);
                    }
                    Input::UserLost { clean, remaining } => {
                        m.on_user_lost(clean, remaining);
                    }
                    Input::Chat => {
                        prop_assert_eq!(m.admit_chat().is_err(), m.is_ended());
                    }
                    Input::Closing => {
                        if m.take_closing_notice() {
                            notices += 1;
                        }
                    }
                }
                if ended_seen {
                    prop_assert_eq!(m.state(), RoomState::Ended);
                }
                ended_seen |= m.is_ended();
            }
            prop_assert!(activations <= 1);
            prop_assert!(notices <= 1);
        }
    }
}
