use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use super::support::*;
use crate::audio::{AudioOutput, OutputState, PlaybackEngine};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::logging::PlaybackEventType;
use crate::models::{LoadOutcome, Track};

/// One output frame at the offline rate, in seconds
const FRAME: f64 = 1.0 / OFFLINE_RATE as f64;

struct Rig {
    engine: PlaybackEngine,
    output: OfflineOutput,
    source: Arc<MemorySource>,
}

fn rig_with(config: EngineConfig, source: MemorySource) -> Rig {
    let output = OfflineOutput::new(OFFLINE_RATE);
    let source = Arc::new(source);
    let engine = PlaybackEngine::new(
        config,
        Arc::new(OfflineProvider::new(output.clone())),
        memory_loader(&source),
    );
    engine.initialize().unwrap();
    Rig { engine, output, source }
}

fn rig() -> Rig {
    rig_with(test_config(), MemorySource::new())
}

impl Rig {
    fn track(&self, id: &str, main_secs: f64, guitar_secs: Option<f64>) -> Track {
        stem_track(&self.source, id, main_secs, guitar_secs)
    }

    async fn load(&self, track: &Track) -> LoadOutcome {
        self.engine.load_track(track).await.unwrap()
    }
}

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} within {}, got {}",
        expected,
        tolerance,
        actual
    );
}

#[tokio::test]
async fn test_stems_share_position_through_rate_changes() {
    let rig = rig();
    let track = rig.track("duo", 10.0, Some(10.0));
    assert_eq!(rig.load(&track).await, LoadOutcome::Loaded { guitar_available: true });

    assert_ok!(rig.engine.play());
    rig.output.advance(1.3);
    let positions = rig.output.active_positions();
    assert_eq!(positions.len(), 2);
    assert_eq!(positions[0], positions[1]);

    rig.engine.set_playback_rate(1.2).unwrap();
    rig.output.advance(0.7);
    let positions = rig.output.active_positions();
    assert_eq!(positions[0], positions[1]);
    assert_eq!(rig.output.active_rates(), vec![1.2, 1.2]);

    rig.engine.pause();
    assert_ok!(rig.engine.play());
    rig.output.advance(0.25);
    let positions = rig.output.active_positions();
    assert_eq!(positions[0], positions[1]);
}

#[tokio::test]
async fn test_pause_then_play_resumes_in_place() {
    for rate in [0.8, 1.0, 1.2] {
        let rig = rig();
        let track = rig.track("resume", 10.0, Some(10.0));
        rig.load(&track).await;
        rig.engine.set_playback_rate(rate).unwrap();

        assert_ok!(rig.engine.play());
        rig.output.advance(2.0);
        rig.engine.pause();

        let paused_at = rig.engine.current_time();
        assert_close(paused_at, 2.0 * rate, 1e-9);

        assert_ok!(rig.engine.play());
        assert_close(rig.engine.current_time(), paused_at, 1e-9);
        for position in rig.output.active_positions() {
            assert_close(position, paused_at, FRAME * rate);
        }
    }
}

#[tokio::test]
async fn test_seek_while_paused_is_exact() {
    let rig = rig();
    let track = rig.track("seek", 10.0, None);
    rig.load(&track).await;

    rig.engine.seek(4.25).unwrap();
    assert_eq!(rig.engine.current_time(), 4.25);

    rig.engine.seek(-1.0).unwrap();
    assert_eq!(rig.engine.current_time(), 0.0);

    rig.engine.seek(100.0).unwrap();
    assert_eq!(rig.engine.current_time(), 10.0);

    assert!(!rig.engine.is_playing());
    assert!(rig.output.started_groups().is_empty());
}

#[tokio::test]
async fn test_seek_while_playing_restarts_at_target() {
    let rig = rig();
    let track = rig.track("seek", 10.0, Some(10.0));
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    rig.output.advance(1.0);
    rig.engine.seek(6.0).unwrap();

    assert!(rig.engine.is_playing());
    assert_eq!(rig.output.started_groups().len(), 2);
    assert_eq!(rig.output.active_voice_count(), 2);
    assert_eq!(rig.output.active_positions(), vec![6.0, 6.0]);

    rig.output.advance(1.0);
    assert_close(rig.engine.current_time(), 7.0, 1e-9);
}

#[tokio::test]
async fn test_second_pause_changes_nothing() {
    let rig = rig();
    let track = rig.track("pause", 10.0, None);
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    rig.output.advance(3.0);
    rig.engine.pause();
    let first = rig.engine.snapshot();

    rig.output.advance(1.0);
    rig.engine.pause();
    assert_eq!(rig.engine.snapshot(), first);
    assert_eq!(rig.engine.logger().count_of(PlaybackEventType::PlaybackPaused), 1);
}

#[tokio::test]
async fn test_natural_end_fires_once() {
    let rig = rig();
    let track = rig.track("ten", 10.0, None);
    rig.load(&track).await;

    let ends = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ends);
    rig.engine.on_track_end(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_ok!(rig.engine.play());
    rig.output.advance(9.5);
    assert!(rig.engine.process_events().is_none());

    rig.output.advance(0.5);
    let ended = rig.engine.process_events().unwrap();
    assert_eq!(ended.track_id, "ten");
    assert!(rig.engine.process_events().is_none());

    assert_eq!(ends.load(Ordering::SeqCst), 1);
    assert!(!rig.engine.is_playing());
    assert_eq!(rig.engine.current_time(), 0.0);
}

#[tokio::test]
async fn test_mute_toggle_only_affects_guitar() {
    let rig = rig();
    let track = rig.track("mute", 10.0, Some(10.0));
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    let mut gains = vec![rig.output.bus_gains().1];
    let unmuted = rig.output.advance(1.0);

    rig.engine.set_guitar_muted(true);
    gains.push(rig.output.bus_gains().1);
    let muted = rig.output.advance(1.0);

    rig.engine.set_guitar_muted(false);
    gains.push(rig.output.bus_gains().1);
    let restored = rig.output.advance(1.0);

    assert_eq!(gains, vec![1.0, 0.0, 1.0]);
    assert_eq!(rig.output.bus_gains().0, 1.0);

    // Main (0.5) and guitar (0.25) sum while unmuted
    assert_close(unmuted[500] as f64, 0.75, 1e-3);
    assert_close(muted[500] as f64, 0.5, 1e-3);
    assert_close(restored[500] as f64, 0.75, 1e-3);

    // One uninterrupted pair of voices
    assert_eq!(rig.output.started_groups().len(), 1);
    assert_close(rig.engine.current_time(), 3.0, 1e-9);
    assert_eq!(rig.output.active_positions(), vec![3.0, 3.0]);
}

#[tokio::test]
async fn test_newer_load_wins() {
    let rig = rig_with(test_config(), MemorySource::with_delay(Duration::from_millis(30)));
    let first = rig.track("a", 3.0, Some(3.0));
    let second = rig.track("b", 5.0, None);

    let (a, b) = tokio::join!(rig.engine.load_track(&first), rig.engine.load_track(&second));
    assert_eq!(a.unwrap(), LoadOutcome::Superseded);
    assert_eq!(b.unwrap(), LoadOutcome::Loaded { guitar_available: false });

    assert_eq!(rig.engine.current_track_id().as_deref(), Some("b"));
    assert_eq!(rig.engine.duration(), 5.0);
    assert!(!rig.engine.guitar_available());
    assert!(rig.output.started_groups().is_empty());

    // The superseded stems still warmed the cache
    assert!(rig.engine.loader().cache().contains(&first.audio_files.main));

    assert_ok!(rig.engine.play());
    assert_eq!(rig.output.active_voice_count(), 1);
}

#[tokio::test]
async fn test_rate_change_mid_playback() {
    let rig = rig();
    let track = rig.track("tempo", 20.0, Some(20.0));
    rig.load(&track).await;

    rig.engine.seek(5.0).unwrap();
    assert_ok!(rig.engine.play());
    rig.engine.set_playback_rate(1.2).unwrap();
    rig.output.advance(5.0);

    assert_close(rig.engine.current_time(), 11.0, 1e-6);
    for position in rig.output.active_positions() {
        assert_close(position, 11.0, 1e-6);
    }
}

#[tokio::test]
async fn test_repeated_rate_changes_integrate_exactly() {
    let rig = rig();
    let track = rig.track("tempo", 20.0, None);
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    rig.output.advance(2.0);
    rig.engine.set_playback_rate(1.2).unwrap();
    rig.output.advance(5.0);
    rig.engine.set_playback_rate(0.8).unwrap();
    rig.output.advance(2.5);

    // 2.0 * 1.0 + 5.0 * 1.2 + 2.5 * 0.8
    assert_close(rig.engine.current_time(), 10.0, 1e-6);
    assert_close(rig.output.active_positions()[0], 10.0, 1e-6);
}

#[tokio::test]
async fn test_guitar_failure_falls_back_to_main() {
    let rig = rig();
    let track = rig.track("solo", 4.0, None).with_guitar("/audio/missing-guitar.wav");

    assert_eq!(rig.load(&track).await, LoadOutcome::Loaded { guitar_available: false });
    assert!(!rig.engine.snapshot().guitar_available);

    assert_ok!(rig.engine.play());
    assert_eq!(rig.output.started_groups()[0].len(), 1);
}

#[tokio::test]
async fn test_main_failure_leaves_engine_usable() {
    let rig = rig();
    let broken = Track::new("broken", "Broken", "/audio/nowhere.wav");

    match rig.engine.load_track(&broken).await {
        Err(EngineError::Load(err)) => assert_eq!(err.locator(), "/audio/nowhere.wav"),
        other => panic!("Expected load error, got {:?}", other),
    }
    assert_eq!(rig.engine.current_track_id(), None);
    assert!(!rig.engine.is_loading());
    assert_eq!(rig.engine.logger().count_of(PlaybackEventType::LoadFailed), 1);

    let track = rig.track("ok", 2.0, None);
    rig.load(&track).await;
    assert_ok!(rig.engine.play());
}

#[tokio::test]
async fn test_suspended_output_blocks_play() {
    let rig = rig();
    let track = rig.track("quiet", 5.0, None);
    rig.load(&track).await;

    rig.output.set_state(OutputState::Suspended);
    rig.output.set_resume_succeeds(false);
    let result = rig.engine.play();
    assert!(matches!(result, Err(EngineError::SuspendedOutput)));
    assert!(!rig.engine.is_playing());
    assert_eq!(rig.output.resume_attempts(), 1);

    rig.output.set_resume_succeeds(true);
    assert_ok!(rig.engine.play());
    assert!(rig.engine.is_playing());
}

#[tokio::test]
async fn test_seek_on_suspended_output_stays_paused() {
    let rig = rig();
    let track = rig.track("quiet", 5.0, Some(5.0));
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    rig.output.advance(1.0);
    rig.output.set_state(OutputState::Suspended);
    rig.output.set_resume_succeeds(false);

    let result = rig.engine.seek(3.0);
    assert!(matches!(result, Err(EngineError::SuspendedOutput)));
    assert!(!rig.engine.is_playing());
    assert_eq!(rig.engine.current_time(), 3.0);
    assert_eq!(rig.output.active_voice_count(), 0);
    assert_eq!(rig.output.started_groups().len(), 1);
    assert_eq!(rig.output.resume_attempts(), 1);
    assert_eq!(rig.engine.logger().count_of(PlaybackEventType::OutputSuspended), 1);

    rig.output.set_resume_succeeds(true);
    assert_ok!(rig.engine.play());
    rig.output.advance(0.5);
    assert_close(rig.engine.current_time(), 3.5, 1e-9);
    for position in rig.output.active_positions() {
        assert_close(position, 3.5, 1e-9);
    }
}

#[tokio::test]
async fn test_position_tracks_voices_when_clock_moves_during_scheduling() {
    let rig = rig();
    let track = rig.track("busy", 10.0, Some(10.0));
    rig.load(&track).await;
    rig.output.set_schedule_lag(0.03);

    assert_ok!(rig.engine.play());
    rig.output.advance(1.0);
    assert_close(rig.engine.current_time(), rig.output.active_positions()[0], 1e-9);

    rig.engine.set_playback_rate(1.2).unwrap();
    rig.output.advance(1.0);
    assert_close(rig.engine.current_time(), 2.23, 1e-6);
    for position in rig.output.active_positions() {
        assert_close(position, rig.engine.current_time(), 1e-9);
    }
}

#[tokio::test]
async fn test_start_failure_leaves_nothing_running() {
    let rig = rig();
    let track = rig.track("flaky", 5.0, Some(5.0));
    rig.load(&track).await;

    rig.output.fail_next_start();
    assert_err!(rig.engine.play());
    assert!(!rig.engine.is_playing());
    assert_eq!(rig.output.active_voice_count(), 0);

    assert_ok!(rig.engine.play());
    assert_eq!(rig.output.active_voice_count(), 2);
}

#[tokio::test]
async fn test_end_racing_a_seek_is_dropped() {
    let rig = rig();
    let track = rig.track("race", 2.0, None);
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    rig.output.advance(2.0);
    // The old voice ended, but the seek already replaced it
    rig.engine.seek(0.5).unwrap();

    assert!(rig.engine.process_events().is_none());
    assert!(rig.engine.is_playing());
    assert_close(rig.engine.current_time(), 0.5, 1e-9);
}

#[tokio::test]
async fn test_end_racing_a_stop_is_dropped() {
    let rig = rig();
    let track = rig.track("race", 2.0, None);
    rig.load(&track).await;

    assert_ok!(rig.engine.play());
    rig.output.advance(2.0);
    rig.engine.stop();

    assert!(rig.engine.process_events().is_none());
    assert_eq!(rig.engine.current_time(), 0.0);
}

#[tokio::test]
async fn test_end_listener_may_restart_playback() {
    let rig = rig();
    let track = rig.track("loop", 1.0, None);
    rig.load(&track).await;

    let engine = rig.engine.clone();
    rig.engine.on_track_end(move |_| {
        engine.play().unwrap();
    });

    assert_ok!(rig.engine.play());
    rig.output.advance(1.0);
    assert!(rig.engine.process_events().is_some());

    assert!(rig.engine.is_playing());
    assert_eq!(rig.output.started_groups().len(), 2);
}

#[tokio::test]
async fn test_subscribers_see_state_changes() {
    let rig = rig();
    let mut updates = rig.engine.subscribe();
    let track = rig.track("watch", 3.0, Some(3.0));
    rig.load(&track).await;

    assert!(updates.has_changed().unwrap());
    {
        let snapshot = updates.borrow_and_update();
        assert_eq!(snapshot.current_track_id.as_deref(), Some("watch"));
        assert!(snapshot.guitar_available);
        assert!(!snapshot.is_loading);
    }

    assert_ok!(rig.engine.play());
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().is_playing);

    // Nothing changed, nothing published
    assert_ok!(rig.engine.play());
    assert!(!updates.has_changed().unwrap());
}

#[tokio::test]
async fn test_mute_persists_across_loads() {
    let rig = rig();
    rig.engine.set_guitar_muted(true);

    let first = rig.track("one", 3.0, Some(3.0));
    rig.load(&first).await;
    assert_ok!(rig.engine.play());
    assert_eq!(rig.output.bus_gains().1, 0.0);

    let second = rig.track("two", 3.0, Some(3.0));
    rig.load(&second).await;
    assert!(rig.engine.guitar_muted());
    assert_ok!(rig.engine.play());
    assert_eq!(rig.output.bus_gains().1, 0.0);
}

#[tokio::test]
async fn test_load_stops_current_playback() {
    let rig = rig();
    let first = rig.track("one", 5.0, Some(5.0));
    let second = rig.track("two", 5.0, None);
    rig.load(&first).await;
    assert_ok!(rig.engine.play());
    rig.output.advance(1.0);

    rig.load(&second).await;
    assert!(!rig.engine.is_playing());
    assert_eq!(rig.engine.current_time(), 0.0);
    assert_eq!(rig.output.active_voice_count(), 0);
}

#[tokio::test]
async fn test_prefetch_leaves_playback_alone() {
    let rig = rig();
    let current = rig.track("now", 5.0, None);
    let upcoming = rig.track("next", 5.0, Some(5.0));
    rig.load(&current).await;
    assert_ok!(rig.engine.play());

    rig.engine.spawn_prefetch(upcoming.clone()).await.unwrap();

    let cache = rig.engine.loader().cache();
    assert!(cache.contains(&upcoming.audio_files.main));
    assert!(cache.contains(upcoming.guitar_locator().unwrap()));
    assert!(rig.engine.is_playing());
    assert_eq!(rig.engine.current_track_id().as_deref(), Some("now"));

    // Loading it later reuses the cached buffers
    rig.load(&upcoming).await;
    assert_eq!(rig.source.fetch_count(&upcoming.audio_files.main), 1);
}

#[tokio::test]
async fn test_prefetch_swallows_missing_stems() {
    let rig = rig();
    let missing = Track::new("gone", "Gone", "/audio/gone.wav").with_guitar("/audio/gone-guitar.wav");

    rig.engine.prefetch_track(&missing).await;
    assert!(rig.engine.loader().cache().is_empty());
    assert_eq!(rig.engine.logger().count_of(PlaybackEventType::PrefetchFailed), 2);
}

#[tokio::test]
async fn test_event_pump_reports_end() {
    let rig = rig();
    let track = rig.track("pump", 1.0, None);
    rig.load(&track).await;

    let ends = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ends);
    rig.engine.on_track_end(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let pump = rig.engine.spawn_event_pump(Duration::from_millis(5));

    assert_ok!(rig.engine.play());
    rig.output.advance(1.5);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(ends.load(Ordering::SeqCst), 1);

    rig.engine.shutdown();
    tokio::time::timeout(Duration::from_secs(1), pump).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_prime_voice_is_not_a_track_end() {
    let config = EngineConfig {
        prime_output: true,
        ..test_config()
    };
    let rig = rig_with(config, MemorySource::new());
    assert_eq!(rig.output.started_groups().len(), 1);

    let track = rig.track("after-prime", 3.0, None);
    rig.load(&track).await;
    assert_ok!(rig.engine.play());
    rig.output.advance(0.5);

    assert!(rig.engine.process_events().is_none());
    assert!(rig.engine.is_playing());
}

#[tokio::test]
async fn test_shutdown_releases_output_and_cache() {
    let rig = rig();
    let track = rig.track("bye", 3.0, Some(3.0));
    rig.load(&track).await;
    assert_ok!(rig.engine.play());

    rig.engine.shutdown();
    assert_eq!(rig.output.state(), OutputState::Closed);
    assert!(rig.engine.loader().cache().is_empty());
    assert!(!rig.engine.is_playing());
    assert!(matches!(
        rig.engine.load_track(&track).await,
        Err(EngineError::Unavailable(_))
    ));
}
