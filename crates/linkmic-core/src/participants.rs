use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Audience,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    On,
    #[default]
    Off,
}

impl MediaState {
    pub fn is_on(self) -> bool {
        self == MediaState::On
    }
}

impl From<bool> for MediaState {
    fn from(on: bool) -> Self {
        if on { MediaState::On } else { MediaState::Off }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractStatus {
    #[default]
    Normal,
    Applying,
    Inviting,
    Interacting,
}

/// A user as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub role: Role,
    #[serde(default)]
    pub mic: MediaState,
    #[serde(default)]
    pub camera: MediaState,
    #[serde(default)]
    pub interact_status: InteractStatus,
}

impl Participant {
    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

/// Participants retained by the session: self, the host, and seated guests.
///
/// Unseated audience members are not kept here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by user id.
    pub fn upsert(&mut self, info: Participant) {
        match self.participant_mut(&info.user_id) {
            Some(existing) => *existing = info,
            None => self.participants.push(info),
        }
    }

    pub fn remove(&mut self, user_id: &str) -> Option<Participant> {
        let pos = self.participants.iter().position(|p| p.user_id == user_id)?;
        Some(self.participants.remove(pos))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn make_participant(user_id: &str, name: &str, role: Role) -> Participant {
    Participant {
        user_id: user_id.to_string(),
        user_name: name.to_string(),
        role,
        mic: MediaState::On,
        camera: MediaState::On,
        interact_status: InteractStatus::Normal,
    }
}
