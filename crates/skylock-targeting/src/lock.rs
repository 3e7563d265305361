//! Target lock management: selection, per-frame refresh, loss-of-track
//! timeouts.

use std::time::Instant;

use serde::Deserialize;
use tracing::{info, warn};

use skylock_proto::now_ts;
use skylock_proto::types::{BoundingBox, LockState, LockStatus, Track};

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Gap before a missing target degrades the lock from Locked to Locking.
    pub lock_timeout_ms: f64,
    /// Gap after which the lock is abandoned entirely.
    pub reacquire_timeout_ms: f64,
    /// Max distance from a pixel click to a bbox center for selection.
    pub max_pixel_distance: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 500.0,
            reacquire_timeout_ms: 2000.0,
            max_pixel_distance: 100.0,
        }
    }
}

/// Maintains the at-most-one lock record.
///
/// Lock lifecycle: created by a selection command, refreshed each frame the
/// locked id appears, destroyed by timeout, `clear_lock`, or stop-tracking.
#[derive(Debug)]
pub struct LockManager {
    config: LockConfig,
    locked_track_id: Option<u64>,
    lock_timestamp: Option<f64>,
    last_seen: Option<Instant>,
    lock_bbox: Option<BoundingBox>,
    status: LockStatus,
    frames_locked: u32,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            locked_track_id: None,
            lock_timestamp: None,
            last_seen: None,
            lock_bbox: None,
            status: LockStatus::Unlocked,
            frames_locked: 0,
        }
    }

    /// Lock onto `track_id` if it is present in the current tracks.
    pub fn select_by_id(&mut self, track_id: u64, tracks: &[Track]) -> bool {
        match tracks.iter().find(|t| t.track_id == track_id) {
            Some(track) => {
                self.lock_to(track);
                info!("lock: acquired id={}", track_id);
                true
            }
            None => {
                warn!("lock: id={} not in current tracks", track_id);
                false
            }
        }
    }

    /// Lock onto the track under a pixel click.
    ///
    /// A track whose bbox contains the point wins outright; otherwise the
    /// nearest bbox center within `max_pixel_distance` is taken. Ties go to
    /// the lowest track id.
    pub fn select_by_pixel(&mut self, u: f64, v: f64, tracks: &[Track]) -> bool {
        if tracks.is_empty() {
            warn!("lock: no tracks available for pixel selection");
            return false;
        }

        let containing = tracks
            .iter()
            .filter(|t| t.bbox.contains(u, v))
            .min_by_key(|t| t.track_id);
        if let Some(track) = containing {
            self.lock_to(track);
            info!("lock: acquired id={} via pixel ({:.0},{:.0})", track.track_id, u, v);
            return true;
        }

        let mut best: Option<(&Track, f64)> = None;
        for track in tracks {
            let (cx, cy) = track.bbox.center();
            let dist = ((u - cx).powi(2) + (v - cy).powi(2)).sqrt();
            best = match best {
                None => Some((track, dist)),
                Some((bt, bd)) => {
                    if dist < bd || (dist == bd && track.track_id < bt.track_id) {
                        Some((track, dist))
                    } else {
                        Some((bt, bd))
                    }
                }
            };
        }

        match best {
            Some((track, dist)) if dist <= self.config.max_pixel_distance => {
                self.lock_to(track);
                info!("lock: acquired id={} via pixel ({:.0},{:.0})", track.track_id, u, v);
                true
            }
            _ => {
                warn!("lock: no track near pixel ({:.0},{:.0})", u, v);
                false
            }
        }
    }

    fn lock_to(&mut self, track: &Track) {
        self.locked_track_id = Some(track.track_id);
        self.lock_timestamp = Some(now_ts());
        self.last_seen = Some(Instant::now());
        self.lock_bbox = Some(track.bbox);
        self.status = LockStatus::Locked;
        self.frames_locked = 0;
    }

    /// Refresh the lock against a new frame of tracks.
    pub fn update(&mut self, tracks: &[Track]) -> LockState {
        let Some(locked_id) = self.locked_track_id else {
            return LockState::unlocked();
        };

        if let Some(track) = tracks.iter().find(|t| t.track_id == locked_id) {
            self.last_seen = Some(Instant::now());
            self.lock_bbox = Some(track.bbox);
            self.status = LockStatus::Locked;
            self.frames_locked += 1;
        } else {
            let since_seen_ms = self
                .last_seen
                .map(|t| t.elapsed().as_secs_f64() * 1000.0)
                .unwrap_or(f64::INFINITY);

            if since_seen_ms < self.config.lock_timeout_ms {
                // Brief occlusion, keep the lock and keep searching.
                self.status = LockStatus::Locking;
            } else if since_seen_ms < self.config.reacquire_timeout_ms {
                self.status = LockStatus::Lost;
            } else {
                warn!("lock: gave up on id={}", locked_id);
                self.clear_lock();
                return LockState::unlocked();
            }
        }

        self.lock_state()
    }

    /// Unconditional reset to Unlocked.
    pub fn clear_lock(&mut self) {
        if let Some(id) = self.locked_track_id {
            info!("lock: cleared id={}", id);
        }
        self.locked_track_id = None;
        self.lock_timestamp = None;
        self.last_seen = None;
        self.lock_bbox = None;
        self.status = LockStatus::Unlocked;
        self.frames_locked = 0;
    }

    pub fn get_locked_track<'a>(&self, tracks: &'a [Track]) -> Option<&'a Track> {
        let id = self.locked_track_id?;
        tracks.iter().find(|t| t.track_id == id)
    }

    pub fn lock_state(&self) -> LockState {
        LockState {
            status: self.status,
            locked_track_id: self.locked_track_id,
            lock_timestamp: self.lock_timestamp,
            frames_since_lock: self.frames_locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.status == LockStatus::Locked
    }

    pub fn locked_track_id(&self) -> Option<u64> {
        self.locked_track_id
    }

    pub fn locked_bbox(&self) -> Option<BoundingBox> {
        self.lock_bbox
    }

    pub fn time_since_seen_ms(&self) -> Option<f64> {
        self.last_seen.map(|t| t.elapsed().as_secs_f64() * 1000.0)
    }

    pub fn time_since_lock_ms(&self) -> Option<f64> {
        self.lock_timestamp.map(|t| (now_ts() - t) * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn track(id: u64, x1: f64, y1: f64, x2: f64, y2: f64) -> Track {
        Track {
            track_id: id,
            bbox: BoundingBox::new(x1, y1, x2, y2),
            class_id: 0,
            label: "target".into(),
            confidence: 0.9,
            timestamp: now_ts(),
            velocity: None,
        }
    }

    fn fast_config() -> LockConfig {
        LockConfig {
            lock_timeout_ms: 40.0,
            reacquire_timeout_ms: 120.0,
            max_pixel_distance: 100.0,
        }
    }

    #[test]
    fn select_by_id_requires_presence() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0)];
        assert!(!lm.select_by_id(3, &tracks));
        assert_eq!(lm.lock_state().status, LockStatus::Unlocked);
        assert!(lm.select_by_id(7, &tracks));
        assert!(lm.lock_state().is_valid());
        assert_eq!(lm.locked_track_id(), Some(7));
    }

    #[test]
    fn select_by_pixel_prefers_containing_bbox() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![
            track(1, 200.0, 200.0, 300.0, 300.0),
            track(2, 40.0, 40.0, 60.0, 60.0),
        ];
        assert!(lm.select_by_pixel(50.0, 50.0, &tracks));
        assert_eq!(lm.locked_track_id(), Some(2));
    }

    #[test]
    fn select_by_pixel_falls_back_to_nearest_center() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![
            track(1, 100.0, 100.0, 120.0, 120.0), // center (110,110)
            track(2, 160.0, 160.0, 180.0, 180.0), // center (170,170)
        ];
        assert!(lm.select_by_pixel(130.0, 130.0, &tracks));
        assert_eq!(lm.locked_track_id(), Some(1));
    }

    #[test]
    fn select_by_pixel_respects_max_distance() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![track(1, 0.0, 0.0, 10.0, 10.0)];
        assert!(!lm.select_by_pixel(500.0, 500.0, &tracks));
        assert_eq!(lm.lock_state().status, LockStatus::Unlocked);
    }

    #[test]
    fn containment_tie_break_lowest_id() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![
            track(9, 0.0, 0.0, 100.0, 100.0),
            track(4, 0.0, 0.0, 100.0, 100.0),
        ];
        assert!(lm.select_by_pixel(50.0, 50.0, &tracks));
        assert_eq!(lm.locked_track_id(), Some(4));
    }

    #[test]
    fn locked_id_always_among_seen_after_update() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0)];
        lm.select_by_id(7, &tracks);
        let state = lm.update(&tracks);
        assert_eq!(state.status, LockStatus::Locked);
        assert!(tracks.iter().any(|t| Some(t.track_id) == state.locked_track_id));
    }

    #[test]
    fn frames_since_lock_increases_while_locked() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0)];
        lm.select_by_id(7, &tracks);
        let mut prev = lm.lock_state().frames_since_lock;
        for _ in 0..5 {
            let state = lm.update(&tracks);
            assert!(state.frames_since_lock > prev);
            prev = state.frames_since_lock;
        }
    }

    #[test]
    fn timeout_ladder_locking_lost_unlocked() {
        let mut lm = LockManager::new(fast_config());
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0)];
        lm.select_by_id(7, &tracks);

        // Within lock_timeout: brief occlusion.
        sleep(Duration::from_millis(10));
        assert_eq!(lm.update(&[]).status, LockStatus::Locking);

        // Past lock_timeout, within reacquire window.
        sleep(Duration::from_millis(50));
        assert_eq!(lm.update(&[]).status, LockStatus::Lost);

        // Past reacquire timeout: lock abandoned.
        sleep(Duration::from_millis(100));
        let state = lm.update(&[]);
        assert_eq!(state.status, LockStatus::Unlocked);
        assert_eq!(state.locked_track_id, None);
    }

    #[test]
    fn reappearing_target_relocks_without_command() {
        let mut lm = LockManager::new(fast_config());
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0)];
        lm.select_by_id(7, &tracks);

        sleep(Duration::from_millis(60));
        assert_eq!(lm.update(&[]).status, LockStatus::Lost);

        // Target returns before the reacquire window closes.
        let state = lm.update(&tracks);
        assert_eq!(state.status, LockStatus::Locked);
        assert_eq!(state.locked_track_id, Some(7));
    }

    #[test]
    fn clear_lock_resets_everything() {
        let mut lm = LockManager::new(LockConfig::default());
        let tracks = vec![track(7, 0.0, 0.0, 10.0, 10.0)];
        lm.select_by_id(7, &tracks);
        lm.clear_lock();
        assert_eq!(lm.lock_state().status, LockStatus::Unlocked);
        assert_eq!(lm.locked_track_id(), None);
        assert!(lm.locked_bbox().is_none());
        // Unlocked <=> no locked id.
        assert_eq!(lm.update(&tracks).status, LockStatus::Unlocked);
    }
}
