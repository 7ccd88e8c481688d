use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::ChatMessage;
use crate::poll::Poll;
use crate::registry::Role;

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join-as-coordinator")]
    JoinAsCoordinator {
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "join-as-respondent")]
    JoinAsRespondent { name: String },
    #[serde(rename = "create-poll", rename_all = "camelCase")]
    CreatePoll {
        question: String,
        options: Vec<String>,
        duration_seconds: u64,
    },
    #[serde(rename = "submit-answer", rename_all = "camelCase")]
    SubmitAnswer { poll_id: String, answer: String },
    #[serde(rename = "end-poll")]
    EndPoll,
    #[serde(rename = "kick-participant", rename_all = "camelCase")]
    KickParticipant { target_id: String },
    #[serde(rename = "send-message")]
    SendMessage { text: String },
    #[serde(rename = "list-poll-history")]
    ListPollHistory,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RespondentEntry {
    pub id: String,
    pub display_name: String,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection-confirmed")]
    ConnectionConfirmed {
        role: Role,
        id: String,
        name: String,
    },
    #[serde(rename = "poll-started", rename_all = "camelCase")]
    PollStarted {
        id: String,
        question: String,
        options: Vec<String>,
        duration_seconds: u64,
        end_time: DateTime<Utc>,
    },
    #[serde(rename = "countdown", rename_all = "camelCase")]
    Countdown { seconds_remaining: u64 },
    #[serde(rename = "tally-update")]
    TallyUpdate { counts: HashMap<String, u64> },
    #[serde(rename = "poll-ended", rename_all = "camelCase")]
    PollEnded { final_counts: HashMap<String, u64> },
    #[serde(rename = "all-answered", rename_all = "camelCase")]
    AllAnswered { final_counts: HashMap<String, u64> },
    #[serde(rename = "respondent-list")]
    RespondentList { respondents: Vec<RespondentEntry> },
    #[serde(rename = "chat-history")]
    ChatHistory { messages: Vec<ChatMessage> },
    #[serde(rename = "chat-message")]
    Chat { message: ChatMessage },
    #[serde(rename = "removed")]
    Removed { reason: String },
    #[serde(rename = "poll-history")]
    PollHistory { polls: Vec<Poll> },
    #[serde(rename = "kick-ack", rename_all = "camelCase")]
    KickAck {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "action-error")]
    ActionError { action: String, reason: String },
}

impl ServerMessage {
    pub fn poll_started(poll: &Poll) -> Self {
        ServerMessage::PollStarted {
            id: poll.id.clone(),
            question: poll.question.clone(),
            options: poll.options.clone(),
            duration_seconds: poll.duration_seconds,
            end_time: poll.end_time,
        }
    }
}
