use crate::model::Track;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    Off,
    All,
    One,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub tracks: Vec<Track>,
    pub current_index: Option<usize>,
    pub repeat_mode: RepeatMode,
    pub shuffled: bool,
}

pub struct PlaybackQueue {
    tracks: Vec<Track>,
    /// Pre-shuffle ordering, kept consistent through inserts/removals so a
    /// later unshuffle restores a coherent order.
    original_order: Vec<Track>,
    current_index: Option<usize>,
    repeat_mode: RepeatMode,
    shuffled: bool,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            original_order: Vec::new(),
            current_index: None,
            repeat_mode: RepeatMode::Off,
            shuffled: false,
        }
    }

    pub fn set_tracks(&mut self, tracks: Vec<Track>, start_index: usize) {
        self.original_order = tracks.clone();
        self.tracks = tracks;
        self.shuffled = false;
        self.current_index = if self.tracks.is_empty() {
            None
        } else {
            Some(start_index.min(self.tracks.len() - 1))
        };
    }

    pub fn add_track(&mut self, track: Track) {
        self.tracks.push(track.clone());
        self.original_order.push(track);
        if self.current_index.is_none() {
            self.current_index = Some(0);
        }
    }

    pub fn remove_track(&mut self, index: usize) {
        if index >= self.tracks.len() {
            return;
        }

        let removed_hash = self.tracks[index].hash.clone();
        self.tracks.remove(index);
        self.original_order.retain(|t| t.hash != removed_hash);

        if let Some(current) = self.current_index {
            if index < current {
                self.current_index = Some(current - 1);
            } else if index == current && current >= self.tracks.len() {
                self.current_index = if self.tracks.is_empty() {
                    None
                } else {
                    Some(self.tracks.len() - 1)
                };
            }
        }
    }

    pub fn move_track(&mut self, from: usize, to: usize) {
        if from >= self.tracks.len() || to >= self.tracks.len() {
            return;
        }

        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        if let Some(current) = self.current_index {
            if from == current {
                self.current_index = Some(to);
            } else if from < current && to >= current {
                self.current_index = Some(current - 1);
            } else if from > current && to <= current {
                self.current_index = Some(current + 1);
            }
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn track_at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn set_current_index(&mut self, index: usize) -> Option<&Track> {
        if index < self.tracks.len() {
            self.current_index = Some(index);
            self.current_track()
        } else {
            None
        }
    }

    /// Advance to the next track for a manual/ended transition. Repeat-one
    /// replays the current track.
    pub fn next_track(&mut self) -> Option<&Track> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        match self.repeat_mode {
            RepeatMode::One => self.current_track(),
            RepeatMode::All => {
                let next = self.current_index.map(|i| (i + 1) % len).unwrap_or(0);
                self.current_index = Some(next);
                self.tracks.get(next)
            }
            RepeatMode::Off => {
                let current = self.current_index.unwrap_or(0);
                if current + 1 < len {
                    self.current_index = Some(current + 1);
                    self.tracks.get(current + 1)
                } else {
                    None
                }
            }
        }
    }

    pub fn previous_track(&mut self) -> Option<&Track> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        let current = self.current_index.unwrap_or(0);
        if current > 0 {
            self.current_index = Some(current - 1);
        } else if self.repeat_mode == RepeatMode::All {
            self.current_index = Some(len - 1);
        }
        self.current_track()
    }

    /// Resolve the next track for a gapless transition without advancing.
    /// Repeat-one resolves to nothing: looping a track is not a transition.
    pub fn peek_next(&self) -> Option<&Track> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        match self.repeat_mode {
            RepeatMode::One => None,
            RepeatMode::All => {
                let next = self.current_index.map(|i| (i + 1) % len).unwrap_or(0);
                self.tracks.get(next)
            }
            RepeatMode::Off => {
                let current = self.current_index.unwrap_or(0);
                self.tracks.get(current + 1)
            }
        }
    }

    pub fn has_next(&self) -> bool {
        match self.repeat_mode {
            RepeatMode::One | RepeatMode::All => !self.tracks.is_empty(),
            RepeatMode::Off => self
                .current_index
                .map(|i| i + 1 < self.tracks.len())
                .unwrap_or(false),
        }
    }

    pub fn has_previous(&self) -> bool {
        match self.repeat_mode {
            RepeatMode::All => !self.tracks.is_empty(),
            _ => self.current_index.map(|i| i > 0).unwrap_or(false),
        }
    }

    /// Shuffle on: current track pinned to the front, rest in uniform
    /// random order.
    pub fn shuffle(&mut self) {
        if self.tracks.len() <= 1 {
            self.shuffled = true;
            return;
        }

        let current_track = self.current_track().cloned();
        let mut rng = rand::thread_rng();

        if !self.shuffled {
            self.original_order = self.tracks.clone();
        }

        self.tracks.shuffle(&mut rng);
        self.shuffled = true;

        if let Some(current) = current_track {
            if let Some(pos) = self.tracks.iter().position(|t| t.hash == current.hash) {
                self.tracks.swap(0, pos);
            }
            self.current_index = Some(0);
        }
    }

    /// Shuffle off: restore the retained order, relocating the index to the
    /// currently playing track.
    pub fn unshuffle(&mut self) {
        if !self.shuffled {
            return;
        }

        let current_track = self.current_track().cloned();
        self.tracks = self.original_order.clone();
        self.shuffled = false;

        if let Some(current) = current_track {
            self.current_index = self.tracks.iter().position(|t| t.hash == current.hash);
        }
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffled
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat_mode = match self.repeat_mode {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        };
        self.repeat_mode
    }

    pub fn state(&self) -> QueueState {
        QueueState {
            tracks: self.tracks.clone(),
            current_index: self.current_index,
            repeat_mode: self.repeat_mode,
            shuffled: self.shuffled,
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.original_order.clear();
        self.current_index = None;
        self.shuffled = false;
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn original_order(&self) -> &[Track] {
        &self.original_order
    }

    pub fn restore(
        &mut self,
        tracks: Vec<Track>,
        original_order: Vec<Track>,
        current_index: Option<usize>,
        repeat_mode: RepeatMode,
        shuffled: bool,
    ) {
        let current_index = current_index.filter(|i| *i < tracks.len());
        self.tracks = tracks;
        self.original_order = original_order;
        self.current_index = current_index.or(if self.tracks.is_empty() {
            None
        } else {
            Some(0)
        });
        self.repeat_mode = repeat_mode;
        self.shuffled = shuffled;
    }
}
