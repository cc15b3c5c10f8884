//! Cassette file structures
//!
//! Cassettes are YAML documents. Bodies are stored as text when they are
//! valid UTF-8 and as base64 otherwise, so files stay readable in a diff.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::fingerprint;
use crate::request::{RequestDescriptor, ResponseDescriptor};

/// Policy for replaying versus recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Replay only; never call upstream
    #[default]
    None,
    /// Record only while the cassette file does not exist yet
    Once,
    /// Replay matches, record anything new
    NewEpisodes,
    /// Always call upstream and record
    All,
}

impl fmt::Display for RecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Once => "once",
            Self::NewEpisodes => "new_episodes",
            Self::All => "all",
        })
    }
}

/// Cassette-level options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassetteOptions {
    /// Stored default record mode
    #[serde(default)]
    pub record_mode: RecordMode,
    /// Whether an interaction may be replayed more than once
    #[serde(default = "default_allow_playback_repeats")]
    pub allow_playback_repeats: bool,
}

fn default_allow_playback_repeats() -> bool {
    true
}

impl Default for CassetteOptions {
    fn default() -> Self {
        Self {
            record_mode: RecordMode::None,
            allow_playback_repeats: true,
        }
    }
}

/// One recorded request/response pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// When the response was received
    pub recorded_at: DateTime<Utc>,
    /// Times this interaction has been replayed
    #[serde(default)]
    pub playback_count: u64,
    /// Request summary
    pub request: RequestDescriptor,
    /// Response, replayed verbatim
    pub response: ResponseDescriptor,
}

impl Interaction {
    /// Interaction recorded now
    #[must_use]
    pub fn new(request: RequestDescriptor, response: ResponseDescriptor) -> Self {
        Self {
            recorded_at: Utc::now(),
            playback_count: 0,
            request,
            response,
        }
    }

    /// Key this interaction matches under
    #[must_use]
    pub fn match_key(&self) -> String {
        fingerprint(self.request.method, &self.request.path)
    }
}

/// A named, ordered collection of interactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cassette {
    /// Cassette name (the request fingerprint)
    pub name: String,
    /// Cassette-level options
    #[serde(default)]
    pub options: CassetteOptions,
    /// Interactions, oldest first
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(skip)]
    on_disk: bool,
}

impl Cassette {
    /// Empty cassette that has never been persisted
    #[must_use]
    pub fn new(name: &str, options: CassetteOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            interactions: Vec::new(),
            on_disk: false,
        }
    }

    /// True until the cassette has been loaded from or written to disk
    #[must_use]
    pub fn is_new(&self) -> bool {
        !self.on_disk
    }

    pub(crate) fn mark_on_disk(&mut self) {
        self.on_disk = true;
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Append a newly recorded interaction
    pub fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// Count one playback of the interaction at `index` and return its response
    pub fn mark_played(&mut self, index: usize) -> Option<ResponseDescriptor> {
        let interaction = self.interactions.get_mut(index)?;
        interaction.playback_count += 1;
        Some(interaction.response.clone())
    }
}

impl PartialEq for Cassette {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.options == other.options
            && self.interactions == other.interactions
    }
}

impl Eq for Cassette {}

/// Serde adapter storing bytes as `{encoding, string}`
pub mod body_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    enum Encoding {
        #[serde(rename = "utf-8")]
        Utf8,
        #[serde(rename = "base64")]
        Base64,
    }

    #[derive(Serialize, Deserialize)]
    struct StoredBody {
        encoding: Encoding,
        string: String,
    }

    /// Serialize bytes as text, falling back to base64
    ///
    /// # Errors
    ///
    /// Propagates serializer errors
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let stored = match std::str::from_utf8(bytes) {
            Ok(text) => StoredBody {
                encoding: Encoding::Utf8,
                string: text.to_string(),
            },
            Err(_) => StoredBody {
                encoding: Encoding::Base64,
                string: STANDARD.encode(bytes),
            },
        };
        stored.serialize(serializer)
    }

    /// Deserialize bytes written by [`serialize`]
    ///
    /// # Errors
    ///
    /// Fails on malformed structure or invalid base64
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let stored = StoredBody::deserialize(deserializer)?;
        match stored.encoding {
            Encoding::Utf8 => Ok(stored.string.into_bytes()),
            Encoding::Base64 => STANDARD.decode(stored.string).map_err(D::Error::custom),
        }
    }
}
