use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// The number of a federated learning round. Rounds start at `1`.
pub type RoundNumber = u64;

/// An opaque identifier for a participant, stable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The identity of a participant across rounds.
///
/// The round counter never decreases through [`ClientSession::advance`]. The only other way to
/// change it is [`ClientSession::realign`], which the coordinator uses to follow the round counter
/// published by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    client_id: ClientId,
    current_round: RoundNumber,
    /// Where the model weights are realized (`"cpu"`, `"cuda"`, ...). Only passed through to the
    /// local trainer.
    device: String,
}

impl ClientSession {
    pub fn new(client_id: impl Into<ClientId>, current_round: RoundNumber, device: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            current_round,
            device: device.into(),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn current_round(&self) -> RoundNumber {
        self.current_round
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Move to the next round and return it.
    pub fn advance(&mut self) -> RoundNumber {
        self.current_round += 1;
        self.current_round
    }

    /// Overwrite the round counter with an authoritative value.
    pub fn realign(&mut self, round: RoundNumber) {
        self.current_round = round;
    }
}

/// The outcome of evaluating the local model on the validation data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f64,
    /// Task specific quality metric, e.g. the dice coefficient for segmentation models.
    pub metric: f64,
}
