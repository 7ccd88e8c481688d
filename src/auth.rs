use crate::registry::Role;

/// Mutating actions a connection can request, as named on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Join,
    CreatePoll,
    SubmitAnswer,
    EndPoll,
    KickParticipant,
    SendMessage,
    ListPollHistory,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Join => "join",
            Action::CreatePoll => "create-poll",
            Action::SubmitAnswer => "submit-answer",
            Action::EndPoll => "end-poll",
            Action::KickParticipant => "kick-participant",
            Action::SendMessage => "send-message",
            Action::ListPollHistory => "list-poll-history",
        }
    }
}

/// Stateless role gate consulted by every mutating operation.
pub fn allow(action: Action, role: Role) -> bool {
    match action {
        Action::CreatePoll | Action::EndPoll | Action::KickParticipant | Action::ListPollHistory => {
            role == Role::Coordinator
        }
        Action::SubmitAnswer => role == Role::Respondent,
        Action::Join | Action::SendMessage => true,
    }
}
