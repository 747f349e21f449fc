// cue-protocol: wire types for the cue bus.
//
// Two JSON surfaces share these types: the event-bus payload exchanged
// between server processes, and the frames delivered to listeners over the
// listen stream.  Field names here are the wire contract and are frozen.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A cue as carried on the event-bus topic between server processes.
///
/// `names` is sorted and duplicate-free.  `content` is the base64 encoding
/// of the raw publish body, or `None` when the body was empty -- absence and
/// empty string are distinct on purpose and must stay that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusCue {
    pub id: Uuid,
    pub uid: String,
    pub names: Vec<String>,
    pub content: Option<String>,
}

impl BusCue {
    /// Build a bus payload for a freshly published cue, assigning its id.
    pub fn new(uid: impl Into<String>, names: BTreeSet<String>, content: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uid: uid.into(),
            names: names.into_iter().collect(),
            content,
        }
    }

    /// The frame a single listener receives: same id and content, but only
    /// the cue names that listener actually matched.
    pub fn frame(&self, matches: Vec<String>) -> CueFrame {
        CueFrame {
            id: self.id,
            names: matches,
            content: self.content.clone(),
        }
    }
}

/// One frame on a listener's stream.
///
/// `names` is the sorted subset of the published names that matched this
/// listener's subscription; a listener never learns about names it did not
/// ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueFrame {
    pub id: Uuid,
    pub names: Vec<String>,
    pub content: Option<String>,
}

/// The `{"message": ...}` body every API endpoint answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}
