use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::auth::Action;
use crate::error::SessionError;
use crate::messages::{ClientMessage, RespondentEntry, ServerMessage};
use crate::registry::Role;
use crate::session::{JoinOutcome, SessionState, SessionStatus, Tick};

/// How often dead transports are probed with a ping.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type Connections = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>>;

#[derive(Clone)]
pub struct Server {
    session: Arc<Mutex<SessionState>>,
    connections: Connections,
}

impl Server {
    pub fn new() -> Self {
        Server {
            session: Arc::new(Mutex::new(SessionState::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Periodic ping to every connection; a transport that stopped responding
    /// fails in its writer task and goes through the normal disconnect path.
    pub fn start_heartbeat(&self) {
        let server = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let connections = server.connections.read().await;
                for sender in connections.values() {
                    let _ = sender.send(Message::ping(Vec::new()));
                }
            }
        });
    }

    pub async fn status(&self) -> SessionStatus {
        self.session.lock().await.status()
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let connection_id = Uuid::new_v4().to_string();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(connection_id.clone(), tx);
        }
        debug!("Connection opened: {connection_id}");

        let server = self.clone();
        let reader_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(msg) => {
                        if let Ok(text) = msg.to_str() {
                            match serde_json::from_str::<ClientMessage>(text) {
                                Ok(client_msg) => {
                                    server.handle_client_message(&reader_id, client_msg).await;
                                }
                                Err(e) => {
                                    warn!("Malformed event from {reader_id}: {e}");
                                    server
                                        .send_error(
                                            &reader_id,
                                            "unknown",
                                            &SessionError::validation("Unrecognized event"),
                                        )
                                        .await;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("WebSocket error on {reader_id}: {e}");
                        break;
                    }
                }
            }
            server.handle_disconnect(&reader_id).await;
        });

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("Failed to send WebSocket message: {e}");
                    break;
                }
            }
        });
    }

    async fn handle_client_message(&self, connection_id: &str, message: ClientMessage) {
        match message {
            ClientMessage::JoinAsCoordinator { name } => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.join(connection_id, Role::Coordinator, name.as_deref())
                };
                match result {
                    Ok(outcome) => self.finish_join(connection_id, outcome).await,
                    Err(e) => self.send_error(connection_id, Action::Join.name(), &e).await,
                }
            }

            ClientMessage::JoinAsRespondent { name } => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.join(connection_id, Role::Respondent, Some(&name))
                };
                match result {
                    Ok(outcome) => self.finish_join(connection_id, outcome).await,
                    Err(e) => self.send_error(connection_id, Action::Join.name(), &e).await,
                }
            }

            ClientMessage::CreatePoll {
                question,
                options,
                duration_seconds,
            } => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.create_poll(connection_id, &question, &options, duration_seconds)
                };
                match result {
                    Ok(poll) => {
                        info!("Poll created: {} ({})", poll.question, poll.id);
                        self.send_to_all(&ServerMessage::poll_started(&poll)).await;
                        self.start_countdown(poll.id).await;
                    }
                    Err(e) => {
                        self.send_error(connection_id, Action::CreatePoll.name(), &e)
                            .await;
                    }
                }
            }

            ClientMessage::SubmitAnswer { poll_id, answer } => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.submit_answer(connection_id, &poll_id, &answer)
                };
                match result {
                    Ok(outcome) => {
                        let update = ServerMessage::TallyUpdate {
                            counts: outcome.counts.clone(),
                        };
                        self.send_to_role(Role::Coordinator, &update).await;
                        self.send_to_one(connection_id, &update).await;
                        if outcome.all_answered {
                            // early-completion signal only; the countdown keeps running
                            self.send_to_all(&ServerMessage::AllAnswered {
                                final_counts: outcome.counts,
                            })
                            .await;
                        }
                    }
                    Err(e) => {
                        self.send_error(connection_id, Action::SubmitAnswer.name(), &e)
                            .await;
                    }
                }
            }

            ClientMessage::EndPoll => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.end_poll(connection_id)
                };
                match result {
                    Ok(poll) => {
                        info!("Poll ended by coordinator: {}", poll.question);
                        self.send_to_all(&ServerMessage::PollEnded {
                            final_counts: poll.results.unwrap_or_default(),
                        })
                        .await;
                    }
                    Err(e) => {
                        self.send_error(connection_id, Action::EndPoll.name(), &e)
                            .await;
                    }
                }
            }

            ClientMessage::KickParticipant { target_id } => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.kick(connection_id, &target_id)
                };
                match result {
                    Ok(outcome) => {
                        info!("Participant kicked: {}", outcome.target_id);
                        self.send_to_one(
                            &outcome.target_id,
                            &ServerMessage::Removed {
                                reason: "You have been removed from the session".to_string(),
                            },
                        )
                        .await;
                        self.close_connection(&outcome.target_id).await;
                        self.send_respondent_list(outcome.respondents).await;
                        self.send_to_one(
                            connection_id,
                            &ServerMessage::KickAck {
                                success: true,
                                error: None,
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        self.send_to_one(
                            connection_id,
                            &ServerMessage::KickAck {
                                success: false,
                                error: Some(e.to_string()),
                            },
                        )
                        .await;
                        self.send_error(connection_id, Action::KickParticipant.name(), &e)
                            .await;
                    }
                }
            }

            ClientMessage::SendMessage { text } => {
                let result = {
                    let mut session = self.session.lock().await;
                    session.send_message(connection_id, &text)
                };
                match result {
                    Ok(message) => {
                        self.send_to_all(&ServerMessage::Chat { message }).await;
                    }
                    Err(e) => {
                        self.send_error(connection_id, Action::SendMessage.name(), &e)
                            .await;
                    }
                }
            }

            ClientMessage::ListPollHistory => {
                let result = {
                    let session = self.session.lock().await;
                    session.list_history(connection_id)
                };
                match result {
                    Ok(polls) => {
                        self.send_to_one(connection_id, &ServerMessage::PollHistory { polls })
                            .await;
                    }
                    Err(e) => {
                        self.send_error(connection_id, Action::ListPollHistory.name(), &e)
                            .await;
                    }
                }
            }
        }
    }

    async fn finish_join(&self, connection_id: &str, outcome: JoinOutcome) {
        let participant = outcome.participant;
        info!(
            "Participant joined: {} ({:?}) as {connection_id}",
            participant.name, participant.role
        );

        self.send_to_one(
            connection_id,
            &ServerMessage::ConnectionConfirmed {
                role: participant.role,
                id: participant.id.clone(),
                name: participant.name.clone(),
            },
        )
        .await;

        if let Some(poll) = &outcome.active_poll {
            self.send_to_one(connection_id, &ServerMessage::poll_started(poll))
                .await;
            if let Some(seconds_remaining) = outcome.seconds_remaining {
                self.send_to_one(connection_id, &ServerMessage::Countdown { seconds_remaining })
                    .await;
            }
            if participant.role == Role::Coordinator {
                if let Some(counts) = outcome.tally {
                    self.send_to_one(connection_id, &ServerMessage::TallyUpdate { counts })
                        .await;
                }
            }
        }

        self.send_to_one(
            connection_id,
            &ServerMessage::ChatHistory {
                messages: outcome.chat_history,
            },
        )
        .await;

        self.send_respondent_list(outcome.respondents).await;
    }

    /// Starts the 1 Hz countdown for a freshly created poll and hands the
    /// cancellation handle back to the session.
    async fn start_countdown(&self, poll_id: String) {
        let server = self.clone();
        let timer_poll_id = poll_id;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                let tick = {
                    let mut session = server.session.lock().await;
                    session.tick(&timer_poll_id)
                };
                match tick {
                    Tick::Countdown(seconds_remaining) => {
                        server
                            .send_to_all(&ServerMessage::Countdown { seconds_remaining })
                            .await;
                    }
                    Tick::Expired(poll) => {
                        info!("Poll expired: {}", poll.question);
                        server
                            .send_to_all(&ServerMessage::PollEnded {
                                final_counts: poll.results.unwrap_or_default(),
                            })
                            .await;
                        break;
                    }
                    Tick::Stale => break,
                }
            }
        });

        let mut session = self.session.lock().await;
        session.set_countdown(handle);
    }

    async fn handle_disconnect(&self, connection_id: &str) {
        let removed = {
            let mut session = self.session.lock().await;
            session.disconnect(connection_id)
        };
        {
            let mut connections = self.connections.write().await;
            connections.remove(connection_id);
        }

        if let Some(participant) = removed {
            info!(
                "Participant disconnected: {} ({:?})",
                participant.name, participant.role
            );
            if participant.role == Role::Respondent {
                let respondents = {
                    let session = self.session.lock().await;
                    session.respondent_list()
                };
                self.send_respondent_list(respondents).await;
            }
        } else {
            debug!("Connection closed before joining: {connection_id}");
        }
    }

    async fn send_respondent_list(&self, respondents: Vec<(String, String)>) {
        let respondents = respondents
            .into_iter()
            .map(|(id, display_name)| RespondentEntry { id, display_name })
            .collect();
        self.send_to_role(Role::Coordinator, &ServerMessage::RespondentList { respondents })
            .await;
    }

    async fn send_error(&self, connection_id: &str, action: &str, error: &SessionError) {
        debug!("Rejected {action} from {connection_id}: {error}");
        self.send_to_one(
            connection_id,
            &ServerMessage::ActionError {
                action: action.to_string(),
                reason: error.to_string(),
            },
        )
        .await;
    }

    async fn close_connection(&self, connection_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(sender) = connections.remove(connection_id) {
            let _ = sender.send(Message::close());
        }
    }

    /// Fire-and-forget fan-out. A connection that is mid-disconnect simply
    /// does not receive the event; one failed recipient never blocks the rest.
    async fn send_to_all(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(msg) => {
                let connections = self.connections.read().await;
                for sender in connections.values() {
                    let _ = sender.send(Message::text(msg.clone()));
                }
            }
            Err(e) => error!("Failed to serialize broadcast: {e}"),
        }
    }

    async fn send_to_role(&self, role: Role, message: &ServerMessage) {
        let ids = {
            let session = self.session.lock().await;
            session.ids_by_role(role)
        };
        match serde_json::to_string(message) {
            Ok(msg) => {
                let connections = self.connections.read().await;
                for id in ids {
                    if let Some(sender) = connections.get(&id) {
                        let _ = sender.send(Message::text(msg.clone()));
                    }
                }
            }
            Err(e) => error!("Failed to serialize broadcast: {e}"),
        }
    }

    async fn send_to_one(&self, connection_id: &str, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(msg) => {
                let connections = self.connections.read().await;
                if let Some(sender) = connections.get(connection_id) {
                    let _ = sender.send(Message::text(msg));
                }
            }
            Err(e) => error!("Failed to serialize message: {e}"),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn register(server: &Server, id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        server.connections.write().await.insert(id.to_string(), tx);
        rx
    }

    fn received_events(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Ok(text) = msg.to_str() {
                let value: serde_json::Value = serde_json::from_str(text).unwrap();
                events.push(value["type"].as_str().unwrap().to_string());
            }
        }
        events
    }

    #[tokio::test]
    async fn errors_go_only_to_the_offending_connection() {
        let server = Server::new();
        let mut coordinator_rx = register(&server, "t1").await;
        let mut respondent_rx = register(&server, "s1").await;

        server
            .handle_client_message("t1", ClientMessage::JoinAsCoordinator { name: None })
            .await;
        server
            .handle_client_message(
                "s1",
                ClientMessage::JoinAsRespondent {
                    name: "Ada".to_string(),
                },
            )
            .await;
        let _ = received_events(&mut coordinator_rx);
        let _ = received_events(&mut respondent_rx);

        server.handle_client_message("s1", ClientMessage::EndPoll).await;

        assert_eq!(received_events(&mut respondent_rx), vec!["action-error"]);
        assert!(received_events(&mut coordinator_rx).is_empty());
    }

    #[tokio::test]
    async fn tally_updates_reach_coordinator_and_submitter_only() {
        let server = Server::new();
        let mut coordinator_rx = register(&server, "t1").await;
        let mut ada_rx = register(&server, "s1").await;
        let mut grace_rx = register(&server, "s2").await;

        server
            .handle_client_message("t1", ClientMessage::JoinAsCoordinator { name: None })
            .await;
        for (id, name) in [("s1", "Ada"), ("s2", "Grace")] {
            server
                .handle_client_message(
                    id,
                    ClientMessage::JoinAsRespondent {
                        name: name.to_string(),
                    },
                )
                .await;
        }
        server
            .handle_client_message(
                "t1",
                ClientMessage::CreatePoll {
                    question: "Pick one".to_string(),
                    options: vec!["A".to_string(), "B".to_string()],
                    duration_seconds: 60,
                },
            )
            .await;
        let poll_id = server.status().await.active_poll.unwrap();
        let _ = received_events(&mut coordinator_rx);
        let _ = received_events(&mut ada_rx);
        let _ = received_events(&mut grace_rx);

        server
            .handle_client_message(
                "s1",
                ClientMessage::SubmitAnswer {
                    poll_id,
                    answer: "A".to_string(),
                },
            )
            .await;

        assert_eq!(received_events(&mut coordinator_rx), vec!["tally-update"]);
        assert_eq!(received_events(&mut ada_rx), vec!["tally-update"]);
        assert!(received_events(&mut grace_rx).is_empty());
    }

    #[tokio::test]
    async fn kick_sends_removed_closes_and_acks() {
        let server = Server::new();
        let mut coordinator_rx = register(&server, "t1").await;
        let mut target_rx = register(&server, "s1").await;

        server
            .handle_client_message("t1", ClientMessage::JoinAsCoordinator { name: None })
            .await;
        server
            .handle_client_message(
                "s1",
                ClientMessage::JoinAsRespondent {
                    name: "Ada".to_string(),
                },
            )
            .await;
        let _ = received_events(&mut coordinator_rx);
        let _ = received_events(&mut target_rx);

        server
            .handle_client_message(
                "t1",
                ClientMessage::KickParticipant {
                    target_id: "s1".to_string(),
                },
            )
            .await;

        let mut target_events = Vec::new();
        let mut saw_close = false;
        while let Ok(msg) = target_rx.try_recv() {
            if msg.is_close() {
                saw_close = true;
            } else if let Ok(text) = msg.to_str() {
                let value: serde_json::Value = serde_json::from_str(text).unwrap();
                target_events.push(value["type"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(target_events, vec!["removed"]);
        assert!(saw_close);
        assert!(server.connections.read().await.get("s1").is_none());

        let coordinator_events = received_events(&mut coordinator_rx);
        assert_eq!(coordinator_events, vec!["respondent-list", "kick-ack"]);
    }

    #[tokio::test]
    async fn countdown_expiry_broadcasts_poll_ended_once() {
        tokio::time::pause();
        let server = Server::new();
        let mut coordinator_rx = register(&server, "t1").await;

        server
            .handle_client_message("t1", ClientMessage::JoinAsCoordinator { name: None })
            .await;
        server
            .handle_client_message(
                "t1",
                ClientMessage::CreatePoll {
                    question: "Pick one".to_string(),
                    options: vec!["A".to_string(), "B".to_string()],
                    duration_seconds: 2,
                },
            )
            .await;
        let _ = received_events(&mut coordinator_rx);

        // let the countdown task start and register its interval before the
        // clock moves, then step through the deadlines one second at a time
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
        }

        let events = received_events(&mut coordinator_rx);
        let ended = events.iter().filter(|e| *e == "poll-ended").count();
        assert_eq!(ended, 1);
        assert!(events.contains(&"countdown".to_string()));
        assert!(server.status().await.active_poll.is_none());
    }
}
