mod common;

use common::{synthetic, Harness};
use mpeg_playback::core::PlaybackState;
use mpeg_playback::player::PlayerEvent;
use std::thread;
use std::time::Duration;

const FRAME: f64 = 0.04;

#[test]
fn test_end_seeking_lands_within_one_frame() {
    let mut h = Harness::new();
    h.attach(synthetic(10.0));
    h.play_until_engaged();
    for _ in 0..50 {
        h.step(20);
    }

    h.player.begin_seeking().unwrap();
    assert!(h.player.is_seeking());
    h.player.seek_to_time(6.0).unwrap();
    h.player.end_seeking().unwrap();

    assert!((h.player.current_time() - 6.0).abs() <= FRAME);
    assert_eq!(h.player.state(), PlaybackState::Playing);

    // 新位置的第一帧
    h.wait_until_engaged();
    let position = h.renderer.stats().last_position.unwrap();
    assert!((position - 6.0).abs() <= FRAME, "first frame after seek at {}", position);
}

#[test]
fn test_clock_does_not_advance_while_seeking() {
    let mut h = Harness::new();
    h.attach(synthetic(10.0));
    h.play_until_engaged();
    for _ in 0..25 {
        h.step(20);
    }

    h.player.begin_seeking().unwrap();
    let held = h.player.current_time();
    for _ in 0..25 {
        h.step(20);
    }
    assert_eq!(h.player.current_time(), held);

    // 拖动期间音频保持静音
    let silence = h.device.pull(256).unwrap();
    assert!(silence.iter().all(|s| *s == 0.0));

    h.player.end_seeking().unwrap();
    assert_eq!(h.player.state(), PlaybackState::Playing);
}

#[test]
fn test_seek_while_paused_keeps_paused() {
    let mut h = Harness::new();
    h.attach(synthetic(10.0));
    h.play_until_engaged();
    h.step(20);
    h.player.pause().unwrap();
    h.drain();

    h.player.begin_seeking().unwrap();
    h.player.seek_to_time(3.0).unwrap();
    h.player.end_seeking().unwrap();

    assert_eq!(h.player.state(), PlaybackState::Paused);
    assert_eq!(h.player.current_time(), 3.0);
    assert_eq!(
        h.drain(),
        vec![
            PlayerEvent::SeekingChanged(true),
            PlayerEvent::TimeUpdated(3.0),
            PlayerEvent::SeekingChanged(false),
        ]
    );

    h.play_until_engaged();
    let position = h.renderer.stats().last_position.unwrap();
    assert!((position - 3.0).abs() <= FRAME, "resumed at {}", position);
}

#[test]
fn test_direct_seek_while_playing_rebuffers() {
    let mut h = Harness::new();
    h.attach(synthetic(10.0));
    h.play_until_engaged();
    h.step(20);
    h.drain();

    h.player.seek_to_time(7.5).unwrap();
    assert!(h.player.is_buffering());
    assert_eq!(h.player.current_time(), 7.5);

    h.wait_until_engaged();
    assert!(!h.player.is_buffering());
    let now = h.player.current_time();
    assert!((7.5..7.5 + 0.1).contains(&now), "time after rebuffer {}", now);
}

#[test]
fn test_rapid_seeks_never_show_stale_frames() {
    let mut h = Harness::new();
    h.attach(synthetic(10.0));
    h.play_until_engaged();
    h.step(20);

    h.player.begin_seeking().unwrap();
    for target in [8.0, 1.0, 9.0, 4.0] {
        h.player.seek_to_time(target).unwrap();
    }
    h.player.end_seeking().unwrap();

    let rendered = h.renderer.stats().frames_rendered;
    h.wait_until_engaged();
    assert!(h.renderer.stats().frames_rendered > rendered);
    let position = h.renderer.stats().last_position.unwrap();
    assert!((position - 4.0).abs() <= FRAME, "stale frame at {}", position);
}

#[test]
fn test_seek_past_end_then_play_finishes() {
    let mut h = Harness::new();
    h.attach(synthetic(2.0));
    h.player.seek_to_time(50.0).unwrap();
    assert_eq!(h.player.current_time(), 2.0);

    h.player.play().unwrap();
    let events = h.wait_for_event(|e| *e == PlayerEvent::FinishedPlaying);
    assert!(events.contains(&PlayerEvent::TimeUpdated(2.0)));
    assert_eq!(h.player.state(), PlaybackState::Stopped);
}

#[test]
fn test_resume_after_seek_waits_for_every_kind() {
    let mut h = Harness::new();
    h.attach(synthetic(20.0));
    h.play_until_engaged();
    h.step(20);

    h.player.begin_seeking().unwrap();
    h.player.seek_to_time(5.0).unwrap();
    h.player.end_seeking().unwrap();

    let buffer = h.player.frame_buffer();
    let low = h.player.config().low();
    let frame = Duration::from_secs_f64(FRAME);
    for _ in 0..5000 {
        h.player.pump();
        if h.is_engaged() {
            // 恢复时只呈现了一帧视频，音频还没被拉走
            let video = buffer.buffered_video_duration() + frame;
            let audio = buffer.buffered_audio_duration();
            assert!(video >= low, "video resumed with {:?}", video);
            assert!(audio >= low, "audio resumed with {:?}", audio);
            return;
        }
        thread::sleep(Duration::from_millis(1));
        h.clock.advance(Duration::from_millis(10));
    }
    panic!("never resumed after seek");
}
