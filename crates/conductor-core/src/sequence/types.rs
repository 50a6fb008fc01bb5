use serde::{Deserialize, Serialize};

/// A named, ordered orchestration script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicalSequence {
    /// Unique sequence id
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Musical key (informational)
    #[serde(default = "default_key")]
    pub key: String,
    /// Tempo in beats per minute (informational, must be positive)
    #[serde(default = "default_tempo")]
    pub tempo: f64,
    /// Category (`system`, `component`, `layout`, `interaction`, `data`, `plugin`, ...)
    #[serde(default = "default_category")]
    pub category: String,
    /// Ordered movements
    #[serde(default)]
    pub movements: Vec<Movement>,
}

fn default_key() -> String {
    "C Major".to_string()
}

fn default_tempo() -> f64 {
    120.0
}

fn default_category() -> String {
    "plugin".to_string()
}

impl MusicalSequence {
    /// Create an empty sequence with default key, tempo and category
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            key: default_key(),
            tempo: default_tempo(),
            category: default_category(),
            movements: Vec::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the tempo
    #[must_use]
    pub fn with_tempo(mut self, tempo: f64) -> Self {
        self.tempo = tempo;
        self
    }

    /// Append a movement
    #[must_use]
    pub fn with_movement(mut self, movement: Movement) -> Self {
        self.movements.push(movement);
        self
    }

    /// Total number of beats across all movements
    #[must_use]
    pub fn beat_count(&self) -> usize {
        self.movements.iter().map(|m| m.beats.len()).sum()
    }

    /// Distinct handler names referenced by the beats, in first-use order
    #[must_use]
    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for beat in self.movements.iter().flat_map(|m| &m.beats) {
            if !names.contains(&beat.handler.as_str()) {
                names.push(&beat.handler);
            }
        }
        names
    }
}

/// An ordered group of beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    /// Movement id
    #[serde(default)]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Beats, ascending by beat number once registered
    #[serde(default)]
    pub beats: Vec<Beat>,
}

impl Movement {
    /// Create an empty movement
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            beats: Vec::new(),
        }
    }

    /// Append a beat
    #[must_use]
    pub fn with_beat(mut self, beat: Beat) -> Self {
        self.beats.push(beat);
        self
    }
}

/// The smallest orchestrated unit: one event bound to one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beat {
    /// Position number (1-based)
    #[serde(default)]
    pub beat: u32,
    /// Event published when the beat completes
    #[serde(default)]
    pub event: String,
    /// Handler name resolved against the plugin's handlers
    #[serde(default)]
    pub handler: String,
    /// Optional title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional dynamics marking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamics: Option<Dynamics>,
    /// When the beat may start
    #[serde(default)]
    pub timing: Timing,
    /// Handler kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BeatKind>,
    /// Signal a synchronized beat waits for (defaults to `event`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Per-beat timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Beat {
    /// Create an immediate beat
    #[must_use]
    pub fn new(beat: u32, event: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            beat,
            event: event.into(),
            handler: handler.into(),
            title: None,
            dynamics: None,
            timing: Timing::Immediate,
            kind: None,
            signal: None,
            timeout_ms: None,
        }
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the dynamics
    #[must_use]
    pub fn with_dynamics(mut self, dynamics: Dynamics) -> Self {
        self.dynamics = Some(dynamics);
        self
    }

    /// Set the timing
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set the kind
    #[must_use]
    pub fn with_kind(mut self, kind: BeatKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the signal a synchronized beat waits for
    #[must_use]
    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    /// Set the per-beat timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Signal name a synchronized beat waits for
    #[must_use]
    pub fn signal_name(&self) -> &str {
        self.signal.as_deref().unwrap_or(&self.event)
    }
}

/// Dynamics marking of a beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dynamics {
    /// pp
    Pianissimo,
    /// p
    Piano,
    /// mp
    MezzoPiano,
    /// mf
    MezzoForte,
    /// f
    Forte,
    /// ff
    Fortissimo,
}

/// When a beat may start relative to its predecessor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Timing {
    /// Runs as soon as the previous handler returned
    #[default]
    Immediate,
    /// Waits for work deferred by earlier beats to settle
    AfterBeat,
    /// Waits for an external signal
    Synchronized,
}

impl Timing {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::AfterBeat => "after-beat",
            Self::Synchronized => "synchronized",
        }
    }
}

impl std::fmt::Display for Timing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handler kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeatKind {
    /// Pure computation on the payload
    Pure,
    /// Performs external side effects
    StageCrew,
}

/// Admission priority of a play
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequencePriority {
    /// Admitted ahead of normal and chained plays
    High,
    /// Default priority
    #[default]
    Normal,
    /// Follow-up plays triggered by other plays; admitted last
    Chained,
}

impl SequencePriority {
    /// Admission rank; lower is admitted first
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Chained => 2,
        }
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Chained => "chained",
        }
    }
}

impl std::fmt::Display for SequencePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SequencePriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "chained" => Ok(Self::Chained),
            other => Err(format!("unknown priority '{other}' (expected high, normal or chained)")),
        }
    }
}
