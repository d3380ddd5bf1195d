//! Media-state input and track-change detection.
//!
//! The player is polled elsewhere; this module only sees the snapshots it
//! produces and decides when a new track has started.

use std::io::BufRead;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// What the media player reports for the current track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Seconds.
    pub duration: f64,
    /// Seconds into the track.
    pub position: f64,
    pub is_playing: bool,
    pub artwork_url: Option<String>,
    pub spotify_url: Option<String>,
}

impl TrackSnapshot {
    /// Identity of the track for change detection; `None` without title or artist.
    pub fn track_key(&self) -> Option<String> {
        if self.title.trim().is_empty() || self.artist.trim().is_empty() {
            return None;
        }
        Some(format!("{}-{}", self.title, self.artist))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaState {
    Playing(TrackSnapshot),
    /// Nothing is playing right now.
    Idle,
    /// The source has ended and will never produce another snapshot.
    Closed,
}

/// Something that can be polled for the player's state.
pub trait MediaSource {
    fn poll(&mut self) -> MediaState;
}

/// Reads one JSON snapshot per line. Blank lines, `{}` and `null` mean idle;
/// malformed lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    line: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        JsonLinesSource {
            reader,
            line: String::new(),
        }
    }
}

impl<R: BufRead> MediaSource for JsonLinesSource<R> {
    fn poll(&mut self) -> MediaState {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return MediaState::Closed,
                Ok(_) => {}
                Err(e) => {
                    warn!("Media source read failed: {}", e);
                    return MediaState::Closed;
                }
            }

            let text = self.line.trim();
            if text.is_empty() || text == "{}" || text == "null" {
                return MediaState::Idle;
            }
            match serde_json::from_str::<TrackSnapshot>(text) {
                Ok(snapshot) => return MediaState::Playing(snapshot),
                Err(e) => warn!("Ignoring malformed track snapshot: {}", e),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    /// A different track started; enrich it.
    Changed(TrackSnapshot),
    /// Same track as before (position updates).
    Unchanged(TrackSnapshot),
    /// Nothing playing, or the snapshot lacks title or artist; the current
    /// track is forgotten.
    Cleared,
}

#[derive(Debug, Default)]
pub struct TrackChangeDetector {
    current: Option<String>,
}

impl TrackChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_key(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn observe(&mut self, state: MediaState) -> TrackEvent {
        let (snapshot, key) = match state {
            MediaState::Playing(snapshot) => {
                let key = snapshot.track_key();
                (snapshot, key)
            }
            MediaState::Idle | MediaState::Closed => (TrackSnapshot::default(), None),
        };

        match key {
            None => {
                if self.current.take().is_some() {
                    debug!("Track cleared");
                }
                TrackEvent::Cleared
            }
            Some(key) if self.current.as_deref() == Some(key.as_str()) => TrackEvent::Unchanged(snapshot),
            Some(key) => {
                debug!("Track changed: {}", key);
                self.current = Some(key);
                TrackEvent::Changed(snapshot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn playing(title: &str, artist: &str) -> MediaState {
        MediaState::Playing(TrackSnapshot {
            title: title.into(),
            artist: artist.into(),
            ..TrackSnapshot::default()
        })
    }

    #[test]
    fn test_track_key() {
        let mut snap = TrackSnapshot {
            title: "Hurt".into(),
            artist: "Johnny Cash".into(),
            ..TrackSnapshot::default()
        };
        assert_eq!(snap.track_key().as_deref(), Some("Hurt-Johnny Cash"));
        snap.artist = "  ".into();
        assert_eq!(snap.track_key(), None);
    }

    #[test]
    fn test_json_lines_source() {
        let input = concat!(
            r#"{"title":"Hurt","artist":"Johnny Cash","isPlaying":true,"position":12.5,"artworkUrl":"https://a/b.jpg"}"#,
            "\n\n{}\nnot json\nnull\n",
        );
        let mut source = JsonLinesSource::new(Cursor::new(input));

        match source.poll() {
            MediaState::Playing(snap) => {
                assert_eq!(snap.title, "Hurt");
                assert!(snap.is_playing);
                assert_eq!(snap.position, 12.5);
                assert_eq!(snap.artwork_url.as_deref(), Some("https://a/b.jpg"));
            }
            other => panic!("expected a track, got {:?}", other),
        }
        for _ in 0..3 {
            assert_eq!(source.poll(), MediaState::Idle);
        }
        assert_eq!(source.poll(), MediaState::Closed);
    }

    #[test]
    fn test_change_detection() {
        let mut detector = TrackChangeDetector::new();

        assert!(matches!(detector.observe(playing("A", "X")), TrackEvent::Changed(_)));
        assert!(matches!(detector.observe(playing("A", "X")), TrackEvent::Unchanged(_)));
        assert_eq!(detector.observe(MediaState::Idle), TrackEvent::Cleared);
        assert_eq!(detector.current_key(), None);
        // The same track resuming is announced again.
        assert!(matches!(detector.observe(playing("A", "X")), TrackEvent::Changed(_)));
        assert!(matches!(detector.observe(playing("B", "X")), TrackEvent::Changed(_)));

        assert_eq!(detector.observe(playing("", "X")), TrackEvent::Cleared);
        assert_eq!(detector.current_key(), None);
        assert!(matches!(detector.observe(playing("B", "X")), TrackEvent::Changed(_)));
    }
}
