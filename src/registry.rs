use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const COORDINATOR_LABEL: &str = "Coordinator";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coordinator,
    Respondent,
}

#[derive(Clone, Debug)]
pub struct Participant {
    pub id: String,
    pub role: Role,
    pub name: String,
    pub has_answered: bool,
    pub current_answer: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Connected participants, keyed by connection id, in insertion order.
/// The registry never broadcasts; callers rebroadcast the respondent list
/// after register/remove.
#[derive(Default)]
pub struct Registry {
    participants: Vec<Participant>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a participant, replacing any previous registration for the
    /// same connection id (a re-join over the same socket switches the name).
    pub fn register(
        &mut self,
        id: &str,
        role: Role,
        name: Option<&str>,
    ) -> Result<&Participant, SessionError> {
        let name = match role {
            Role::Coordinator => name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(COORDINATOR_LABEL)
                .to_string(),
            Role::Respondent => {
                let trimmed = name.map(str::trim).unwrap_or_default();
                if trimmed.is_empty() {
                    return Err(SessionError::validation("Name is required"));
                }
                trimmed.to_string()
            }
        };

        let participant = Participant {
            id: id.to_string(),
            role,
            name,
            has_answered: false,
            current_answer: None,
            joined_at: Utc::now(),
        };

        let pos = match self.participants.iter().position(|p| p.id == id) {
            Some(pos) => {
                self.participants[pos] = participant;
                pos
            }
            None => {
                self.participants.push(participant);
                self.participants.len() - 1
            }
        };
        Ok(&self.participants[pos])
    }

    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        let pos = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn list_by_role(&self, role: Role) -> Vec<&Participant> {
        self.participants.iter().filter(|p| p.role == role).collect()
    }

    pub fn ids_by_role(&self, role: Role) -> Vec<String> {
        self.participants
            .iter()
            .filter(|p| p.role == role)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Clears the answered state of every respondent. Invoked once per new poll.
    pub fn reset_answered(&mut self) {
        for p in &mut self.participants {
            if p.role == Role::Respondent {
                p.has_answered = false;
                p.current_answer = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respondent_requires_a_name() {
        let mut registry = Registry::new();
        let err = registry.register("c1", Role::Respondent, Some("   ")).unwrap_err();
        assert_eq!(err, SessionError::validation("Name is required"));
        assert!(registry.is_empty());
    }

    #[test]
    fn coordinator_gets_default_label() {
        let mut registry = Registry::new();
        let p = registry.register("c1", Role::Coordinator, None).unwrap();
        assert_eq!(p.name, COORDINATOR_LABEL);
    }

    #[test]
    fn register_replaces_same_connection() {
        let mut registry = Registry::new();
        registry.register("c1", Role::Respondent, Some("Ada")).unwrap();
        registry.register("c1", Role::Respondent, Some("Grace")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("c1").unwrap().name, "Grace");
    }

    #[test]
    fn register_returns_the_stored_participant_in_both_branches() {
        let mut registry = Registry::new();
        let fresh = registry.register("c1", Role::Respondent, Some("Ada")).unwrap();
        assert_eq!((fresh.id.as_str(), fresh.name.as_str()), ("c1", "Ada"));
        let replaced = registry.register("c1", Role::Respondent, Some("Grace")).unwrap();
        assert_eq!(replaced.name, "Grace");
        assert!(!replaced.has_answered);
    }

    #[test]
    fn list_by_role_preserves_insertion_order() {
        let mut registry = Registry::new();
        registry.register("t1", Role::Coordinator, None).unwrap();
        registry.register("s1", Role::Respondent, Some("Ada")).unwrap();
        registry.register("s2", Role::Respondent, Some("Grace")).unwrap();
        let names: Vec<&str> = registry
            .list_by_role(Role::Respondent)
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Ada", "Grace"]);
    }

    #[test]
    fn reset_answered_clears_respondents_only() {
        let mut registry = Registry::new();
        registry.register("s1", Role::Respondent, Some("Ada")).unwrap();
        let p = registry.get_mut("s1").unwrap();
        p.has_answered = true;
        p.current_answer = Some("A".to_string());

        registry.reset_answered();
        let p = registry.get("s1").unwrap();
        assert!(!p.has_answered);
        assert!(p.current_answer.is_none());
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut registry = Registry::new();
        assert!(registry.remove("ghost").is_none());
    }
}
