use rand::seq::SliceRandom;
use serde::Serialize;

use crate::extractor::Track;

/// Per-session playback queue.
///
/// A single signed index space addresses all three segments: negative
/// indices count back through `done`, zero is `playing`, positive indices
/// walk `ahead`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    /// Tracks already played, oldest first.
    pub done: Vec<Track>,
    pub playing: Option<Track>,
    /// Tracks scheduled to play, soonest first.
    pub ahead: Vec<Track>,
    /// Snapshot of `ahead` taken at the last shuffle; cleared by
    /// structural edits.
    pub ahead_unshuffled: Option<Vec<Track>>,
    /// Net displacement of `ahead`'s head since the shuffle snapshot.
    pub shuffle_offset: i64,
    pub paused: bool,
    pub looping: bool,
}

impl Queue {
    pub fn in_bounds(&self, i: i64) -> bool {
        !(i == 0 && self.playing.is_none())
            && !(i < 0 && (-i - 1) as usize >= self.done.len())
            && !(i > 0 && (i - 1) as usize >= self.ahead.len())
    }

    pub fn at(&self, i: i64) -> Option<&Track> {
        if !self.in_bounds(i) {
            return None;
        }
        if i < 0 {
            self.done.get(self.done.len() - (-i) as usize)
        } else if i == 0 {
            self.playing.as_ref()
        } else {
            self.ahead.get((i - 1) as usize)
        }
    }

    fn at_mut(&mut self, i: i64) -> Option<&mut Track> {
        if !self.in_bounds(i) {
            return None;
        }
        if i < 0 {
            let idx = self.done.len() - (-i) as usize;
            self.done.get_mut(idx)
        } else if i == 0 {
            self.playing.as_mut()
        } else {
            self.ahead.get_mut((i - 1) as usize)
        }
    }

    /// Moves `n` positions along the done/playing/ahead tape. Requests past
    /// either end clamp so that the last step still lands meaningfully:
    /// forward onto "nothing playing", backward onto the oldest track.
    pub(crate) fn shift(&mut self, mut n: i64) {
        if n > 0 {
            let limit = self.ahead.len() as i64;
            if n > limit {
                n = limit.max(1);
            }
        } else if n < 0 {
            let limit = self.done.len() as i64;
            if -n > limit {
                n = -limit.max(1);
            }
        }

        if n > 0 {
            let n = n as usize;
            if let Some(playing) = self.playing.take() {
                self.done.push(playing);
            }
            self.done.extend(self.ahead.drain(..n - 1));
            if !self.ahead.is_empty() {
                self.playing = Some(self.ahead.remove(0));
            }
            self.shuffle_offset -= n as i64;
        } else if n < 0 {
            let n = (-n) as usize;
            if let Some(playing) = self.playing.take() {
                self.ahead.insert(0, playing);
            }
            let tail = self.done.split_off(self.done.len() - (n - 1));
            self.ahead.splice(0..0, tail);
            self.playing = self.done.pop();
            self.shuffle_offset += n as i64;
        }
    }

    pub(crate) fn shuffle(&mut self) {
        if self.ahead_unshuffled.is_some() {
            self.unshuffle();
        }
        self.ahead_unshuffled = Some(self.ahead.clone());
        self.ahead.shuffle(&mut rand::thread_rng());
        self.shuffle_offset = 0;
    }

    /// Restores the pre-shuffle order: tracks added to the front since the
    /// snapshot stay in front, tracks that advanced off the snapshot stay
    /// gone.
    pub(crate) fn unshuffle(&mut self) {
        let Some(mut snapshot) = self.ahead_unshuffled.take() else {
            return;
        };
        if self.shuffle_offset <= 0 {
            let trim = (-self.shuffle_offset) as usize;
            if trim <= snapshot.len() {
                snapshot.drain(..trim);
            }
            self.shuffle_offset = 0;
        }
        self.ahead.truncate(self.shuffle_offset as usize);
        self.ahead.extend(snapshot);
    }

    pub(crate) fn skip_all(&mut self) {
        if let Some(playing) = self.playing.take() {
            self.done.push(playing);
        }
        self.done.append(&mut self.ahead);
    }

    /// Removes one entry by signed index; zero is not handled here because
    /// removing the playing track also tears the stream down.
    pub(crate) fn remove_signed(&mut self, i: i64) {
        if i < 0 {
            let idx = self.done.len() as i64 + i;
            if idx >= 0 && (idx as usize) < self.done.len() {
                self.done.remove(idx as usize);
            }
        } else if i > 0 {
            let idx = (i - 1) as usize;
            if idx < self.ahead.len() {
                self.ahead.remove(idx);
            }
        }
    }

    pub(crate) fn swap_signed(&mut self, a: i64, b: i64) {
        if a == b || !self.in_bounds(a) || !self.in_bounds(b) {
            return;
        }
        let track_a = self.at(a).cloned();
        let track_b = self.at(b).cloned();
        if let (Some(track_a), Some(track_b)) = (track_a, track_b) {
            if let Some(slot) = self.at_mut(a) {
                *slot = track_b;
            }
            if let Some(slot) = self.at_mut(b) {
                *slot = track_a;
            }
        }
    }
}
