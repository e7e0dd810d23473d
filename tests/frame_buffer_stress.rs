use mpeg_playback::core::{AudioFrame, Frame, FrameKind, TimedFrame, VideoFrame};
use mpeg_playback::player::FrameBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 固定种子的线性同余发生器，保证每次运行序列一致
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn video(position: f64, duration: f64) -> Frame {
    VideoFrame::rgba(position, duration, 1, 1, vec![0; 4], 4).into()
}

fn audio(position: f64, duration: f64) -> Frame {
    AudioFrame::from_f32(position, duration, &[0.0; 8]).into()
}

#[test]
fn test_concurrent_push_pop_keeps_order_and_totals() {
    const BATCHES: usize = 2000;
    let buffer = Arc::new(FrameBuffer::new());
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let buffer = buffer.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut rng = Lcg(7);
            let (mut video_at, mut audio_at) = (0.0, 0.0);
            let mut pushed = (0usize, 0usize);
            for _ in 0..BATCHES {
                let mut batch = Vec::new();
                for _ in 0..rng.below(3) {
                    let d = (1 + rng.below(40)) as f64 / 1000.0;
                    batch.push(video(video_at, d));
                    video_at += d;
                    pushed.0 += 1;
                }
                for _ in 0..rng.below(4) {
                    let d = (1 + rng.below(20)) as f64 / 1000.0;
                    batch.push(audio(audio_at, d));
                    audio_at += d;
                    pushed.1 += 1;
                }
                buffer.push_frames(batch);
                if rng.below(8) == 0 {
                    thread::yield_now();
                }
            }
            done.store(true, Ordering::SeqCst);
            pushed
        })
    };

    let video_consumer = {
        let buffer = buffer.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut last = f64::MIN;
            let mut popped = 0usize;
            loop {
                match buffer.pop_video_frame() {
                    Some(frame) => {
                        assert!(frame.position() >= last, "video out of order");
                        last = frame.position();
                        popped += 1;
                    }
                    None if done.load(Ordering::SeqCst) && buffer.frame_count(FrameKind::Video) == 0 => break,
                    None => thread::yield_now(),
                }
            }
            popped
        })
    };

    let audio_consumer = {
        let buffer = buffer.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut last = f64::MIN;
            let mut popped = 0usize;
            let mut rng = Lcg(99);
            loop {
                // 模拟音频回调：一次取若干帧
                let take = 1 + rng.below(5);
                let mut empty = false;
                for _ in 0..take {
                    match buffer.pop_audio_frame() {
                        Some(frame) => {
                            assert!(frame.position() >= last, "audio out of order");
                            last = frame.position();
                            popped += 1;
                        }
                        None => {
                            empty = true;
                            break;
                        }
                    }
                }
                if empty {
                    if done.load(Ordering::SeqCst) && buffer.frame_count(FrameKind::Audio) == 0 {
                        break;
                    }
                    thread::sleep(Duration::from_micros(50));
                }
            }
            popped
        })
    };

    let pushed = producer.join().unwrap();
    assert_eq!(video_consumer.join().unwrap(), pushed.0);
    assert_eq!(audio_consumer.join().unwrap(), pushed.1);
    assert_eq!(buffer.buffered_video_duration(), Duration::ZERO);
    assert_eq!(buffer.buffered_audio_duration(), Duration::ZERO);
}

#[test]
fn test_buffered_duration_matches_remaining_frames() {
    let buffer = FrameBuffer::new();
    let mut rng = Lcg(3);
    let mut position = 0.0;

    for round in 0..500 {
        let d = (1 + rng.below(50)) as f64 / 1000.0;
        buffer.push_frames(vec![video(position, d)]);
        position += d;

        if rng.below(3) == 0 {
            buffer.pop_video_frame();
        }

        let expected: Duration = buffer.with_video(|queue| {
            queue
                .iter()
                .map(|f| Duration::try_from_secs_f64(f.duration()).unwrap_or_default())
                .sum()
        });
        assert_eq!(buffer.buffered_video_duration(), expected, "round {}", round);
    }
}

#[test]
fn test_stale_pushes_racing_a_purge_are_dropped() {
    let buffer = Arc::new(FrameBuffer::new());
    let stop = Arc::new(AtomicBool::new(false));

    // 始终用启动时的代数 push 的“旧”生产者
    let stale = {
        let buffer = buffer.clone();
        let stop = stop.clone();
        let epochs = buffer.epochs();
        thread::spawn(move || {
            let mut position = 0.0;
            while !stop.load(Ordering::SeqCst) {
                buffer.push_frames_for(vec![video(position, 0.01), audio(position, 0.01)], &epochs);
                position += 0.01;
                thread::yield_now();
            }
        })
    };

    thread::sleep(Duration::from_millis(5));
    buffer.purge();
    let fresh = buffer.epochs();
    assert_eq!(buffer.push_frames_for(vec![video(100.0, 0.04), audio(100.0, 0.02)], &fresh), 2);

    thread::sleep(Duration::from_millis(5));
    stop.store(true, Ordering::SeqCst);
    stale.join().unwrap();

    // 清空之后只剩新代数的帧
    assert_eq!(buffer.frame_count(FrameKind::Video), 1);
    assert_eq!(buffer.next_position(FrameKind::Video), Some(100.0));
    assert_eq!(buffer.next_position(FrameKind::Audio), Some(100.0));
    assert_eq!(buffer.buffered_audio_duration(), Duration::from_millis(20));
}
