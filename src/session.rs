use std::collections::HashMap;

use tokio::task::JoinHandle;

use crate::auth::{allow, Action};
use crate::chat::{ChatLog, ChatMessage, CHAT_HISTORY_ON_JOIN};
use crate::error::SessionError;
use crate::poll::{Poll, PollStatus, MAX_DURATION_SECONDS};
use crate::registry::{Participant, Registry, Role};
use crate::tally::AnswerTally;

/// Everything a freshly joined connection needs to catch up.
pub struct JoinOutcome {
    pub participant: Participant,
    pub active_poll: Option<Poll>,
    pub seconds_remaining: Option<u64>,
    pub tally: Option<HashMap<String, u64>>,
    pub chat_history: Vec<ChatMessage>,
    pub respondents: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct AnswerOutcome {
    pub counts: HashMap<String, u64>,
    pub all_answered: bool,
}

#[derive(Debug)]
pub struct KickOutcome {
    pub target_id: String,
    pub respondents: Vec<(String, String)>,
}

/// What a countdown tick observed under the session lock.
pub enum Tick {
    /// Poll still running; broadcast the remaining seconds.
    Countdown(u64),
    /// The countdown reached zero and ended the poll.
    Expired(Poll),
    /// The poll this timer belonged to is gone; the tick is a no-op.
    Stale,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connected_participants: usize,
    pub active_poll: Option<String>,
}

/// The single serialization point: registry, tally, active poll, history and
/// chat all live here, and every mutating operation goes through one of the
/// methods below while the caller holds the session lock. The methods are
/// synchronous and perform no I/O; they return outcome values describing what
/// the transport layer should broadcast.
#[derive(Default)]
pub struct SessionState {
    registry: Registry,
    tally: AnswerTally,
    active_poll: Option<Poll>,
    seconds_remaining: u64,
    history: Vec<Poll>,
    chat: ChatLog,
    countdown: Option<JoinHandle<()>>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState::default()
    }

    fn authorize(&self, id: &str, action: Action) -> Result<&Participant, SessionError> {
        let participant = self
            .registry
            .get(id)
            .ok_or_else(|| SessionError::state("Not joined to the session"))?;
        if allow(action, participant.role) {
            Ok(participant)
        } else {
            Err(SessionError::authorization(format!(
                "Role is not permitted to {}",
                action.name()
            )))
        }
    }

    fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    /// Stores the cancellation handle for the active poll's countdown task.
    pub fn set_countdown(&mut self, handle: JoinHandle<()>) {
        self.countdown = Some(handle);
    }

    fn finish_active(&mut self) -> Option<Poll> {
        let mut poll = self.active_poll.take()?;
        poll.status = PollStatus::Ended;
        poll.results = Some(self.tally.snapshot());
        self.history.push(poll.clone());
        Some(poll)
    }

    pub fn respondent_list(&self) -> Vec<(String, String)> {
        self.registry
            .list_by_role(Role::Respondent)
            .into_iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect()
    }

    pub fn join(
        &mut self,
        id: &str,
        role: Role,
        name: Option<&str>,
    ) -> Result<JoinOutcome, SessionError> {
        let participant = self.registry.register(id, role, name)?.clone();
        Ok(JoinOutcome {
            active_poll: self.active_poll.clone(),
            seconds_remaining: self.active_poll.as_ref().map(|_| self.seconds_remaining),
            tally: self.active_poll.as_ref().map(|_| self.tally.snapshot()),
            chat_history: self.chat.recent(CHAT_HISTORY_ON_JOIN),
            respondents: self.respondent_list(),
            participant,
        })
    }

    pub fn create_poll(
        &mut self,
        requester: &str,
        question: &str,
        options: &[String],
        duration_seconds: u64,
    ) -> Result<Poll, SessionError> {
        let created_by = self.authorize(requester, Action::CreatePoll)?.name.clone();

        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::validation("Question is required"));
        }
        let mut distinct: Vec<String> = Vec::new();
        for option in options {
            let trimmed = option.trim();
            if !trimmed.is_empty() && !distinct.iter().any(|o| o == trimmed) {
                distinct.push(trimmed.to_string());
            }
        }
        if distinct.len() < 2 {
            return Err(SessionError::validation(
                "A poll needs at least 2 distinct options",
            ));
        }
        if duration_seconds == 0 {
            return Err(SessionError::validation("Duration must be positive"));
        }
        if duration_seconds > MAX_DURATION_SECONDS {
            return Err(SessionError::validation(format!(
                "Duration must be at most {MAX_DURATION_SECONDS} seconds"
            )));
        }
        if self.active_poll.is_some() {
            return Err(SessionError::state("A poll is already active"));
        }

        // A stale timer from a previous poll must never outlive it.
        self.cancel_countdown();
        self.tally.reset(&distinct);
        self.registry.reset_answered();

        let poll = Poll::new(question.to_string(), distinct, duration_seconds, created_by);
        self.seconds_remaining = duration_seconds;
        self.active_poll = Some(poll.clone());
        Ok(poll)
    }

    pub fn submit_answer(
        &mut self,
        requester: &str,
        poll_id: &str,
        answer: &str,
    ) -> Result<AnswerOutcome, SessionError> {
        self.authorize(requester, Action::SubmitAnswer)?;

        {
            let poll = self
                .active_poll
                .as_ref()
                .ok_or_else(|| SessionError::state("No active poll"))?;
            if poll.id != poll_id {
                return Err(SessionError::state("Poll has changed"));
            }
            let participant = self
                .registry
                .get(requester)
                .ok_or_else(|| SessionError::state("Not joined to the session"))?;
            if participant.has_answered {
                return Err(SessionError::state("Answer already submitted"));
            }
            if !poll.options.iter().any(|o| o == answer) {
                return Err(SessionError::validation(format!(
                    "\"{answer}\" is not one of the poll options"
                )));
            }
        }

        self.tally.record(answer)?;
        if let Some(participant) = self.registry.get_mut(requester) {
            participant.has_answered = true;
            participant.current_answer = Some(answer.to_string());
        }

        let respondents = self.registry.list_by_role(Role::Respondent);
        let answered = respondents.iter().filter(|p| p.has_answered).count();
        let all_answered = answered > 0 && answered == respondents.len();

        Ok(AnswerOutcome {
            counts: self.tally.snapshot(),
            all_answered,
        })
    }

    pub fn end_poll(&mut self, requester: &str) -> Result<Poll, SessionError> {
        self.authorize(requester, Action::EndPoll)?;
        if self.active_poll.is_none() {
            return Err(SessionError::state("No active poll to end"));
        }
        self.cancel_countdown();
        self.finish_active()
            .ok_or_else(|| SessionError::state("No active poll to end"))
    }

    /// One countdown tick for the poll the timer was started for. A tick that
    /// arrives after the poll ended or changed observes a mismatch and does
    /// nothing, so an aborted timer racing its own cancellation stays silent.
    pub fn tick(&mut self, poll_id: &str) -> Tick {
        match self.active_poll.as_ref() {
            Some(poll) if poll.id == poll_id => {}
            _ => return Tick::Stale,
        }
        self.seconds_remaining = self.seconds_remaining.saturating_sub(1);
        if self.seconds_remaining > 0 {
            return Tick::Countdown(self.seconds_remaining);
        }
        // The timer itself is the caller here; dropping the handle without
        // aborting lets its task run to completion and broadcast the result.
        self.countdown.take();
        match self.finish_active() {
            Some(poll) => Tick::Expired(poll),
            None => Tick::Stale,
        }
    }

    pub fn kick(&mut self, requester: &str, target_id: &str) -> Result<KickOutcome, SessionError> {
        self.authorize(requester, Action::KickParticipant)?;
        match self.registry.get(target_id) {
            Some(p) if p.role == Role::Respondent => {}
            Some(_) => return Err(SessionError::state("Target is not a respondent")),
            None => return Err(SessionError::state("Participant not found")),
        }
        // The target's recorded answer stays in the tally: it represents a
        // vote cast at the time, not current membership.
        self.registry.remove(target_id);
        Ok(KickOutcome {
            target_id: target_id.to_string(),
            respondents: self.respondent_list(),
        })
    }

    pub fn send_message(&mut self, sender: &str, text: &str) -> Result<ChatMessage, SessionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SessionError::validation("Message cannot be empty"));
        }
        let (name, role) = {
            let p = self
                .registry
                .get(sender)
                .ok_or_else(|| SessionError::state("Not joined to the session"))?;
            (p.name.clone(), p.role)
        };
        Ok(self.chat.append(sender, &name, role, trimmed))
    }

    pub fn list_history(&self, requester: &str) -> Result<Vec<Poll>, SessionError> {
        self.authorize(requester, Action::ListPollHistory)?;
        Ok(self.history.clone())
    }

    pub fn disconnect(&mut self, id: &str) -> Option<Participant> {
        self.registry.remove(id)
    }

    pub fn ids_by_role(&self, role: Role) -> Vec<String> {
        self.registry.ids_by_role(role)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connected_participants: self.registry.len(),
            active_poll: self.active_poll.as_ref().map(|p| p.id.clone()),
        }
    }

    #[cfg(test)]
    fn tally_total(&self) -> u64 {
        self.tally.total()
    }

    #[cfg(test)]
    fn answered_respondents(&self) -> usize {
        self.registry
            .list_by_role(Role::Respondent)
            .iter()
            .filter(|p| p.has_answered)
            .count()
    }
}
