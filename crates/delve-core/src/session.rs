//! Session state: conversation history, the episode name of the running
//! research cycle, and the output paths derived from it.
//!
//! The session is plain data. The cycle controller holds the only mutable
//! handle while a cycle runs; the dialogue layer appends turns between cycles.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::messages::{Role, Turn};

const SEPARATOR: char = '_';

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("episode name already set for this cycle: {existing}")]
    AlreadySet { existing: String },
    #[error("episode name has not been set for this cycle")]
    EpisodeNameMissing,
    #[error("episode name is empty")]
    EmptyEpisodeName,
}

/// Map an arbitrary string to a filesystem-safe identifier.
///
/// Purely mechanical: whitespace, path delimiters and control characters
/// become `_`. Nothing else is removed or shortened. A name made only of dots
/// (`.`, `..`) has its dots replaced so it can never address a parent
/// directory. The mapping is idempotent.
pub fn sanitize_for_filesystem(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | ':') {
                SEPARATOR
            } else {
                c
            }
        })
        .collect();

    if !mapped.is_empty() && mapped.chars().all(|c| c == '.') {
        return mapped.chars().map(|_| SEPARATOR).collect();
    }
    mapped
}

/// A sanitized episode identifier. The same value names the output
/// directory, the artifact file and the graph episode.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeName(String);

impl EpisodeName {
    pub fn new(raw: &str) -> Result<Self, SessionError> {
        if raw.trim().is_empty() {
            return Err(SessionError::EmptyEpisodeName);
        }
        Ok(Self(sanitize_for_filesystem(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpisodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EpisodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One user interaction: an initial research cycle plus any number of deep
/// cycles, sharing one conversation history.
#[derive(Clone, Debug)]
pub struct Session {
    id: SessionId,
    topic: String,
    session_dir: PathBuf,
    conversation_history: Vec<Turn>,
    episode_name: Option<EpisodeName>,
    completed_episodes: Vec<EpisodeName>,
    cycle_count: u32,
    pending_refinement: Option<String>,
    /// History length when the last cycle reached `Done`.
    turn_mark: usize,
}

impl Session {
    pub fn new(session_dir: impl Into<PathBuf>, topic: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            topic: topic.into(),
            session_dir: session_dir.into(),
            conversation_history: Vec::new(),
            episode_name: None,
            completed_episodes: Vec::new(),
            cycle_count: 0,
            pending_refinement: None,
            turn_mark: 0,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The topic the session was opened with. Never changes.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Append a turn. Never truncates, never reorders.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.conversation_history.push(Turn::new(role, content));
    }

    pub fn history(&self) -> &[Turn] {
        &self.conversation_history
    }

    /// Start a new research cycle. The previous cycle's episode name moves to
    /// the completed list and the naming slot opens again.
    pub fn begin_cycle(&mut self) -> u32 {
        if let Some(previous) = self.episode_name.take() {
            self.completed_episodes.push(previous);
        }
        self.cycle_count += 1;
        self.cycle_count
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    /// Set the episode name for the current cycle. A second call within the
    /// same cycle fails with [`SessionError::AlreadySet`].
    pub fn set_episode_name(&mut self, raw: &str) -> Result<&EpisodeName, SessionError> {
        if let Some(existing) = &self.episode_name {
            return Err(SessionError::AlreadySet {
                existing: existing.to_string(),
            });
        }
        let name = EpisodeName::new(raw)?;
        Ok(self.episode_name.insert(name))
    }

    pub fn episode_name(&self) -> Option<&EpisodeName> {
        self.episode_name.as_ref()
    }

    pub fn require_episode_name(&self) -> Result<&EpisodeName, SessionError> {
        self.episode_name.as_ref().ok_or(SessionError::EpisodeNameMissing)
    }

    pub fn completed_episodes(&self) -> &[EpisodeName] {
        &self.completed_episodes
    }

    /// Name of the session's first cycle. Deep cycles are named after it.
    pub fn initial_episode(&self) -> Option<&EpisodeName> {
        self.completed_episodes
            .first()
            .or(self.episode_name.as_ref())
    }

    /// Turns added since the last cycle finished: the whole tasking
    /// conversation before the first cycle, the refinement exchange after.
    pub fn turns_since_last_cycle(&self) -> &[Turn] {
        let start = self.turn_mark.min(self.conversation_history.len());
        &self.conversation_history[start..]
    }

    /// Record that a cycle finished with the history as it stands.
    pub fn mark_cycle_complete(&mut self) {
        self.turn_mark = self.conversation_history.len();
    }

    /// Output directory of the current cycle: `<session_dir>/<episode_name>`.
    pub fn episode_dir(&self) -> Result<PathBuf, SessionError> {
        let name = self.require_episode_name()?;
        Ok(self.session_dir.join(name.as_str()))
    }

    pub fn capture_refinement(&mut self, request: impl Into<String>) {
        self.pending_refinement = Some(request.into());
    }

    pub fn pending_refinement(&self) -> Option<&str> {
        self.pending_refinement.as_deref()
    }

    /// Consume the pending refinement. The turn that carried it stays in history.
    pub fn take_pending_refinement(&mut self) -> Option<String> {
        self.pending_refinement.take()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            topic: self.topic.clone(),
            conversation_history: self.conversation_history.clone(),
            current_episode: self.episode_name.clone(),
            completed_episodes: self.completed_episodes.clone(),
            cycle_count: self.cycle_count,
            pending_refinement: self.pending_refinement.clone(),
            turn_mark: self.turn_mark,
        }
    }

    pub fn restore(snapshot: SessionSnapshot, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: snapshot.id,
            topic: snapshot.topic,
            session_dir: session_dir.into(),
            conversation_history: snapshot.conversation_history,
            episode_name: snapshot.current_episode,
            completed_episodes: snapshot.completed_episodes,
            cycle_count: snapshot.cycle_count,
            pending_refinement: snapshot.pending_refinement,
            turn_mark: snapshot.turn_mark,
        }
    }
}

/// Serializable form of a [`Session`], written as `session.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub topic: String,
    pub conversation_history: Vec<Turn>,
    #[serde(default)]
    pub current_episode: Option<EpisodeName>,
    #[serde(default)]
    pub completed_episodes: Vec<EpisodeName>,
    pub cycle_count: u32,
    #[serde(default)]
    pub pending_refinement: Option<String>,
    #[serde(default)]
    pub turn_mark: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("/tmp/sessions/graph-memory", "Graph memory for agents")
    }

    #[test]
    fn append_preserves_count_and_order() {
        let mut s = session();
        let inputs = ["one", "two", "three", "four", "five"];
        for (i, text) in inputs.iter().enumerate() {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            s.append_turn(role, *text);
        }
        assert_eq!(s.history().len(), inputs.len());
        let contents: Vec<&str> = s.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, inputs);
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut s = session();
        s.append_turn(Role::User, "go");
        s.append_turn(Role::User, "go");
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn set_episode_name_twice_fails() {
        let mut s = session();
        s.begin_cycle();
        s.set_episode_name("Custom entities").unwrap();
        let err = s.set_episode_name("Custom entities").unwrap_err();
        assert_eq!(
            err,
            SessionError::AlreadySet {
                existing: "Custom_entities".into()
            }
        );
    }

    #[test]
    fn set_then_read_returns_same_name() {
        let mut s = session();
        s.begin_cycle();
        let set = s.set_episode_name("ICP signals/downmarket").unwrap().clone();
        assert_eq!(set.as_str(), "ICP_signals_downmarket");
        assert_eq!(s.episode_name(), Some(&set));
    }

    #[test]
    fn new_cycle_reopens_naming_slot() {
        let mut s = session();
        s.begin_cycle();
        s.set_episode_name("first").unwrap();
        assert_eq!(s.begin_cycle(), 2);
        assert!(s.episode_name().is_none());
        s.set_episode_name("second").unwrap();
        assert_eq!(s.completed_episodes().len(), 1);
        assert_eq!(s.completed_episodes()[0].as_str(), "first");
    }

    #[test]
    fn empty_name_rejected() {
        let mut s = session();
        s.begin_cycle();
        assert_eq!(s.set_episode_name("   "), Err(SessionError::EmptyEpisodeName));
        // A rejected name does not consume the slot.
        assert!(s.set_episode_name("valid").is_ok());
    }

    #[test]
    fn episode_dir_requires_name() {
        let mut s = session();
        assert_eq!(s.episode_dir(), Err(SessionError::EpisodeNameMissing));
        s.begin_cycle();
        s.set_episode_name("Deep dive: vector stores").unwrap();
        assert_eq!(
            s.episode_dir().unwrap(),
            PathBuf::from("/tmp/sessions/graph-memory/Deep_dive__vector_stores")
        );
    }

    #[test]
    fn sanitize_is_mechanical() {
        assert_eq!(sanitize_for_filesystem("a b/c\\d"), "a_b_c_d");
        assert_eq!(sanitize_for_filesystem("**bold** `code`"), "**bold**_`code`");
        assert_eq!(sanitize_for_filesystem("tab\there"), "tab_here");
        assert_eq!(sanitize_for_filesystem("..."), "___");
        assert_eq!(sanitize_for_filesystem("v1.2"), "v1.2");
        assert_eq!(sanitize_for_filesystem(""), "");
    }

    #[test]
    fn sanitize_is_idempotent_and_delimiter_free() {
        let samples = [
            "",
            " ",
            "..",
            "a/../b",
            "C:\\Users\\me",
            "line\nbreak",
            "émoji 🚀 / slash",
            "__already_safe__",
            "trailing space ",
            "\u{0}nul",
        ];
        for raw in samples {
            let once = sanitize_for_filesystem(raw);
            assert_eq!(sanitize_for_filesystem(&once), once, "input: {raw:?}");
            assert!(!once.contains('/') && !once.contains('\\'), "input: {raw:?}");
            assert!(once != "." && once != "..", "input: {raw:?}");
        }
    }

    #[test]
    fn refinement_is_consumed_once() {
        let mut s = session();
        s.append_turn(Role::User, "go deeper on pricing");
        s.capture_refinement("go deeper on pricing");
        assert_eq!(s.pending_refinement(), Some("go deeper on pricing"));
        assert_eq!(s.take_pending_refinement().as_deref(), Some("go deeper on pricing"));
        assert!(s.take_pending_refinement().is_none());
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn turns_since_last_cycle_start_after_mark() {
        let mut s = session();
        s.append_turn(Role::User, "research graph memory");
        s.append_turn(Role::Assistant, "which vendors?");
        assert_eq!(s.turns_since_last_cycle().len(), 2);

        s.mark_cycle_complete();
        assert!(s.turns_since_last_cycle().is_empty());

        s.append_turn(Role::User, "go deeper on pricing");
        let recent: Vec<&str> = s
            .turns_since_last_cycle()
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(recent, ["go deeper on pricing"]);
        assert_eq!(s.history().len(), 3);
    }

    #[test]
    fn initial_episode_survives_later_cycles() {
        let mut s = session();
        assert!(s.initial_episode().is_none());
        s.begin_cycle();
        s.set_episode_name("Graph memory vendors").unwrap();
        assert_eq!(s.initial_episode().map(|e| e.as_str()), Some("Graph_memory_vendors"));
        s.begin_cycle();
        s.set_episode_name("Graph memory vendors_deep_1").unwrap();
        assert_eq!(s.initial_episode().map(|e| e.as_str()), Some("Graph_memory_vendors"));
    }

    #[test]
    fn snapshot_restore_keeps_state() {
        let mut s = session();
        s.append_turn(Role::User, "start");
        s.begin_cycle();
        s.set_episode_name("first pass").unwrap();
        s.mark_cycle_complete();
        s.append_turn(Role::User, "refine");
        let snap = s.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: SessionSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Session::restore(parsed, "/tmp/elsewhere");
        assert_eq!(restored.id(), s.id());
        assert_eq!(restored.history(), s.history());
        assert_eq!(restored.cycle_count(), 1);
        assert_eq!(restored.episode_name().map(|e| e.as_str()), Some("first_pass"));
        assert_eq!(restored.session_dir(), Path::new("/tmp/elsewhere"));
        assert_eq!(restored.turns_since_last_cycle().len(), 1);
    }
}
