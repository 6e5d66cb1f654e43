//! Integration tests for the security monitor, the frame loop and login.
//!
//! Timing-sensitive scenarios drive a `ManualClock` and call `SecurityMonitor::tick`
//! directly; the threaded tests only check how the loops exit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use vigil_core::{
    AuthEvent, ChannelObserver, Clock, FaceEmbedder, FaceEmbedding, FaceLandmarks, Frame,
    FrameSource, IdentityStore, EyeLandmarks, JsonIdentityStore, LandmarkDetector, LogoutReason,
    LoopExit, ManualClock, MemoryIdentityStore, Point, ReverifyOutcome, ScriptedFrame,
    ScriptedSensors, SensingError, Sensors, UserId, Vigil, VigilConfig, VigilError,
};

const ALICE: [f32; 2] = [1.0, 0.0];
// Cosine similarity 0.3 against ALICE.
const IMPOSTOR: [f32; 2] = [0.3, 0.953_939_2];
// Cosine similarity 0.5 against ALICE: enough to log in, not enough to stay.
const LOOKALIKE: [f32; 2] = [0.5, 0.866_025_4];

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FakeState {
    embedding: Option<Vec<f32>>,
    confidence: f32,
    eye_gap_px: Option<f32>,
    hand: bool,
    embed_delay: Duration,
    embed_panics: bool,
    // Manual clock moved forward by every embedding call.
    embed_cost: Option<(Arc<ManualClock>, Duration)>,
}

/// Camera, detector and embedder whose output the test sets directly.
#[derive(Debug)]
struct FakeSensors {
    state: Mutex<FakeState>,
    seq: AtomicU64,
    released: AtomicBool,
}

impl FakeSensors {
    fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                embedding: Some(ALICE.to_vec()),
                confidence: 0.99,
                eye_gap_px: Some(30.0),
                hand: false,
                embed_delay: Duration::ZERO,
                embed_panics: false,
                embed_cost: None,
            }),
            seq: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }
    }

    fn show_face(&self, embedding: &[f32]) {
        self.state.lock().unwrap().embedding = Some(embedding.to_vec());
    }

    fn set_confidence(&self, confidence: f32) {
        self.state.lock().unwrap().confidence = confidence;
    }

    fn set_eye_gap(&self, px: Option<f32>) {
        self.state.lock().unwrap().eye_gap_px = px;
    }

    fn set_hand(&self, hand: bool) {
        self.state.lock().unwrap().hand = hand;
    }

    fn set_embed_delay(&self, delay: Duration) {
        self.state.lock().unwrap().embed_delay = delay;
    }

    fn set_embed_panics(&self, panics: bool) {
        self.state.lock().unwrap().embed_panics = panics;
    }

    fn set_embed_cost(&self, cost: Option<(Arc<ManualClock>, Duration)>) {
        self.state.lock().unwrap().embed_cost = cost;
    }

    fn sensors(self: &Arc<Self>) -> Sensors {
        Sensors::new(self.clone(), self.clone(), self.clone())
    }
}

// Eye 100px wide with both lids `gap` px apart on a 1024x1024 frame: EAR = gap / 100.
fn eye(gap: f32) -> EyeLandmarks {
    let p = |x: f32, y: f32| Point::new(x / 1024.0, y / 1024.0);
    EyeLandmarks([
        p(100.0, 200.0),
        p(130.0, 200.0 - gap),
        p(170.0, 200.0 - gap),
        p(200.0, 200.0),
        p(170.0, 200.0),
        p(130.0, 200.0),
    ])
}

impl FrameSource for FakeSensors {
    fn next_frame(&self) -> Result<Frame, SensingError> {
        if self.released.load(Ordering::Relaxed) {
            return Err(SensingError::SourceClosed);
        }
        Ok(Frame::new(self.seq.fetch_add(1, Ordering::Relaxed), 1024, 1024))
    }

    fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
    }
}

impl LandmarkDetector for FakeSensors {
    fn detect_face(&self, _frame: &Frame) -> Option<FaceLandmarks> {
        let gap = self.state.lock().unwrap().eye_gap_px?;
        Some(FaceLandmarks {
            left_eye: eye(gap),
            right_eye: eye(gap),
        })
    }

    fn detect_hands(&self, _frame: &Frame) -> bool {
        self.state.lock().unwrap().hand
    }
}

impl FaceEmbedder for FakeSensors {
    fn embed(&self, _frame: &Frame) -> Result<FaceEmbedding, SensingError> {
        let (embedding, confidence, delay, panics, cost) = {
            let state = self.state.lock().unwrap();
            (
                state.embedding.clone(),
                state.confidence,
                state.embed_delay,
                state.embed_panics,
                state.embed_cost.clone(),
            )
        };
        if panics {
            panic!("embedder crashed on frame");
        }
        if let Some((clock, by)) = cost {
            clock.advance(by);
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(FaceEmbedding {
            vector: embedding.ok_or(SensingError::NoFace)?,
            confidence,
        })
    }
}

struct Harness {
    vigil: Vigil,
    clock: Arc<ManualClock>,
    fake: Arc<FakeSensors>,
    events: UnboundedReceiver<AuthEvent>,
    t0: Instant,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryIdentityStore::new();
        store.put(&UserId::from("alice"), ALICE.to_vec()).unwrap();
        Self::with_store(Arc::new(store))
    }

    fn with_store(store: Arc<dyn IdentityStore>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let t0 = Instant::now();
        let clock = Arc::new(ManualClock::starting_at(t0));
        let fake = Arc::new(FakeSensors::new());
        let (observer, events) = ChannelObserver::new();
        let vigil = Vigil::new(VigilConfig::default(), fake.sensors(), store, Arc::new(observer))
            .expect("default config is valid")
            .with_clock(clock.clone());
        Self {
            vigil,
            clock,
            fake,
            events,
            t0,
        }
    }

    fn login_alice(&self) {
        let found = self.vigil.login(Some(&UserId::from("alice"))).expect("alice logs in");
        assert_eq!(found.identity.as_str(), "alice");
    }

    fn at(&self, secs: f32) {
        self.clock.set(self.t0 + Duration::from_secs_f32(secs));
    }

    fn frame(&self) {
        let loop_ = self.vigil.auth_loop();
        let frame = self.fake.next_frame().unwrap();
        loop_.process_frame(&frame);
    }

    fn blink(&self) {
        self.fake.set_eye_gap(Some(10.0));
        for _ in 0..3 {
            self.frame();
        }
        self.fake.set_eye_gap(Some(30.0));
        self.frame();
    }

    fn logouts(&mut self) -> Vec<LogoutReason> {
        let mut reasons = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let AuthEvent::LoggedOut { reason, .. } = event {
                reasons.push(reason);
            }
        }
        reasons
    }

    fn prompts(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events.try_recv() {
            if matches!(event, AuthEvent::BlinkPrompt { .. }) {
                count += 1;
            }
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Blink liveness
// ---------------------------------------------------------------------------

#[test]
fn test_blink_prompt_then_logout() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    h.at(10.0);
    monitor.tick();
    assert!(h.vigil.session().snapshot().unwrap().blink_prompt_active);
    assert_eq!(h.prompts(), 1);

    h.at(14.0);
    assert!(monitor.tick().logout().is_none());
    assert!(h.vigil.session().is_active());

    h.at(15.5);
    let report = monitor.tick();
    assert_eq!(report.logout().map(|n| n.reason), Some(LogoutReason::NoBlinkDetected));
    assert!(!h.vigil.session().is_active());
    assert_eq!(h.logouts(), vec![LogoutReason::NoBlinkDetected]);

    h.at(30.0);
    assert!(monitor.tick().logout().is_none());
    assert!(h.logouts().is_empty());
}

#[test]
fn test_prompt_raised_once_per_window() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    for tenth in 100..150 {
        h.at(tenth as f32 / 10.0);
        monitor.tick();
    }
    assert_eq!(h.prompts(), 1);
    assert!(h.vigil.session().is_active());
}

#[test]
fn test_blink_clears_prompt() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    h.at(10.0);
    monitor.tick();
    h.at(12.0);
    h.blink();

    let snap = h.vigil.session().snapshot().unwrap();
    assert!(!snap.blink_prompt_active);
    assert_eq!(snap.blink_prompt_start, None);
    assert_eq!(snap.last_blink_at, h.t0 + Duration::from_secs(12));

    h.at(16.0);
    monitor.tick();
    assert!(h.vigil.session().is_active());
    assert!(h.logouts().is_empty());
}

#[test]
fn test_short_closure_is_not_a_blink() {
    let h = Harness::new();
    h.login_alice();

    h.at(3.0);
    h.fake.set_eye_gap(Some(10.0));
    h.frame();
    h.frame();
    h.fake.set_eye_gap(Some(30.0));
    h.frame();

    let snap = h.vigil.session().snapshot().unwrap();
    assert_eq!(snap.last_blink_at, h.t0);
    assert_eq!(snap.blink_frame_counter, 0);
}

// ---------------------------------------------------------------------------
// Re-verification
// ---------------------------------------------------------------------------

#[test]
fn test_failing_streak_logs_out_user_changed() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();
    h.fake.show_face(&IMPOSTOR);

    let mut outcomes = Vec::new();
    for second in 1..=15 {
        h.at(second as f32);
        h.blink();
        if let Some(outcome) = monitor.tick().reverify {
            outcomes.push((second, outcome));
        }
    }

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], (5, ReverifyOutcome::StreakStarted));
    assert_eq!(
        outcomes[1],
        (10, ReverifyOutcome::StreakRunning { elapsed: Duration::from_secs(5) })
    );
    match &outcomes[2] {
        (15, ReverifyOutcome::Expired(notice)) => {
            assert_eq!(notice.reason, LogoutReason::UserChanged);
            assert_eq!(notice.identity.as_str(), "alice");
        }
        other => panic!("expected logout at 15s, got {:?}", other),
    }
    assert!(!h.vigil.session().is_active());
    assert_eq!(h.logouts(), vec![LogoutReason::UserChanged]);
}

#[test]
fn test_embedder_panic_counts_as_failed_check() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();
    h.fake.set_embed_panics(true);

    let mut outcomes = Vec::new();
    for second in 1..=15 {
        h.at(second as f32);
        h.blink();
        let report = monitor.tick();
        if let Some(outcome) = report.reverify {
            assert!(report.liveness.is_some() || !h.vigil.session().is_active());
            outcomes.push(outcome);
        }
    }

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], ReverifyOutcome::StreakStarted);
    assert!(matches!(&outcomes[2], ReverifyOutcome::Expired(n) if n.reason == LogoutReason::UserChanged));
    assert_eq!(h.logouts(), vec![LogoutReason::UserChanged]);
}

#[test]
fn test_prompt_timed_after_slow_embedding() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    // Re-verification and the blink prompt fall due on the same tick; the
    // embedding takes two seconds.
    h.fake.set_embed_cost(Some((h.clock.clone(), Duration::from_secs(2))));
    h.at(10.0);
    let report = monitor.tick();
    assert!(matches!(report.reverify, Some(ReverifyOutcome::Passed { .. })));
    let snap = h.vigil.session().snapshot().unwrap();
    assert_eq!(snap.blink_prompt_start, Some(h.t0 + Duration::from_secs(12)));
    assert_eq!(h.prompts(), 1);

    // The full grace window runs from the prompt.
    h.fake.set_embed_cost(None);
    h.at(16.5);
    assert!(monitor.tick().logout().is_none());
    h.at(17.5);
    assert_eq!(
        monitor.tick().logout().map(|n| n.reason),
        Some(LogoutReason::NoBlinkDetected)
    );
}

#[test]
fn test_single_success_resets_streak() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    let check = |second: f32, face: &[f32]| {
        h.fake.show_face(face);
        h.at(second);
        h.blink();
        monitor.tick().reverify
    };

    assert_eq!(check(5.0, &IMPOSTOR), Some(ReverifyOutcome::StreakStarted));
    assert_eq!(
        check(10.0, &ALICE),
        Some(ReverifyOutcome::Passed { cleared_streak: true })
    );
    assert_eq!(check(15.0, &IMPOSTOR), Some(ReverifyOutcome::StreakStarted));
    assert!(matches!(
        check(20.0, &IMPOSTOR),
        Some(ReverifyOutcome::StreakRunning { .. })
    ));
    assert!(matches!(check(25.0, &IMPOSTOR), Some(ReverifyOutcome::Expired(_))));
    assert!(h.logouts().contains(&LogoutReason::UserChanged));
}

#[test]
fn test_streak_state_visible_in_status() {
    let h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    h.fake.show_face(&IMPOSTOR);
    h.at(5.0);
    monitor.tick();

    let snap = h.vigil.session().snapshot().unwrap();
    assert_eq!(snap.logout_grace_start, Some(h.t0 + Duration::from_secs(5)));
    assert_eq!(snap.last_reverify_check, h.t0 + Duration::from_secs(5));
    assert!(h.vigil.session().status(h.clock.now()).unwrap().reverify_failing);
}

#[test]
fn test_low_confidence_and_missing_face_count_as_failures() {
    let mut h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    h.fake.set_confidence(0.5);
    h.at(5.0);
    h.blink();
    assert_eq!(monitor.tick().reverify, Some(ReverifyOutcome::StreakStarted));

    h.fake.set_confidence(0.99);
    h.fake.state.lock().unwrap().embedding = None;
    h.at(10.0);
    h.blink();
    assert!(matches!(monitor.tick().reverify, Some(ReverifyOutcome::StreakRunning { .. })));

    h.at(15.0);
    h.blink();
    assert!(matches!(monitor.tick().reverify, Some(ReverifyOutcome::Expired(_))));
    assert_eq!(h.logouts(), vec![LogoutReason::UserChanged]);
}

#[test]
fn test_missing_stored_identity_resolves_through_logout_timer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.json");
    let store = JsonIdentityStore::new(&path);
    store.put(&UserId::from("alice"), ALICE.to_vec()).unwrap();

    let mut h = Harness::with_store(Arc::new(store));
    h.login_alice();
    let monitor = h.vigil.monitor();

    std::fs::write(&path, "{}").unwrap();

    h.at(5.0);
    h.blink();
    assert_eq!(monitor.tick().reverify, Some(ReverifyOutcome::StreakStarted));
    h.at(15.0);
    h.blink();
    assert!(matches!(monitor.tick().reverify, Some(ReverifyOutcome::Expired(_))));
    assert_eq!(h.logouts(), vec![LogoutReason::UserChanged]);
}

#[test]
fn test_login_and_continuous_thresholds_are_independent() {
    let mut h = Harness::new();
    h.fake.show_face(&LOOKALIKE);
    let found = h.vigil.login(None).expect("0.5 passes the login threshold");
    assert!((found.similarity - 0.5).abs() < 1e-4);

    let monitor = h.vigil.monitor();
    h.at(5.0);
    h.blink();
    assert_eq!(monitor.tick().reverify, Some(ReverifyOutcome::StreakStarted));
    assert!(h.logouts().is_empty());
}

// ---------------------------------------------------------------------------
// Hand presence
// ---------------------------------------------------------------------------

#[test]
fn test_hand_flag_flips_without_logout() {
    let h = Harness::new();
    h.login_alice();
    let monitor = h.vigil.monitor();

    h.fake.set_hand(true);
    h.frame();
    h.fake.set_hand(false);
    assert!(h.vigil.session().snapshot().unwrap().hand_verified);

    h.at(5.0);
    let report = monitor.tick();
    assert!(report.liveness.unwrap().hand_lost);
    assert!(!h.vigil.session().snapshot().unwrap().hand_verified);
    assert!(h.vigil.session().is_active());

    h.at(5.5);
    h.fake.set_hand(true);
    h.frame();
    let snap = h.vigil.session().snapshot().unwrap();
    assert!(snap.hand_verified);
    assert_eq!(snap.last_hand_seen_at, h.t0 + Duration::from_millis(5_500));
}

#[test]
fn test_status_reports_seconds_since_blink() {
    let mut h = Harness::new();
    h.login_alice();
    h.at(7.4);
    h.frame();

    let mut last = None;
    while let Ok(event) = h.events.try_recv() {
        if let AuthEvent::Status(status) = event {
            last = Some(status);
        }
    }
    let status = last.expect("status emitted");
    assert_eq!(status.identity.as_str(), "alice");
    assert_eq!(status.seconds_since_blink, 7);
    assert!(!status.hand_verified);
}

#[test]
fn test_monitor_tick_without_session_is_noop() {
    let h = Harness::new();
    let monitor = h.vigil.monitor();
    h.at(60.0);
    let report = monitor.tick();
    assert!(report.reverify.is_none());
    assert!(report.liveness.is_none());
}

// ---------------------------------------------------------------------------
// Enrollment and login
// ---------------------------------------------------------------------------

#[test]
fn test_enroll_rejects_bad_usernames() {
    let h = Harness::new();
    assert!(matches!(h.vigil.enroll("   "), Err(VigilError::EmptyUsername)));
    assert!(matches!(h.vigil.enroll("alice"), Err(VigilError::UserExists(_))));

    h.fake.show_face(&IMPOSTOR);
    let bob = h.vigil.enroll(" bob ").unwrap();
    assert_eq!(bob.as_str(), "bob");
}

#[test]
fn test_enroll_requires_confident_face() {
    let h = Harness::new();
    h.fake.set_confidence(0.6);
    let err = h.vigil.enroll("carol").unwrap_err();
    assert!(matches!(err, VigilError::Sensing(SensingError::LowConfidence(_))));
}

#[test]
fn test_login_errors() {
    let empty = Harness::with_store(Arc::new(MemoryIdentityStore::new()));
    assert!(matches!(empty.vigil.login(None), Err(VigilError::NoUsersEnrolled)));

    let h = Harness::new();
    assert!(matches!(
        h.vigil.login(Some(&UserId::from("mallory"))),
        Err(VigilError::UnknownUser(_))
    ));

    h.fake.show_face(&IMPOSTOR);
    match h.vigil.login(None) {
        Err(VigilError::FaceNotRecognized { best: Some(best) }) => assert!((best - 0.3).abs() < 1e-4),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!h.vigil.session().is_active());
}

#[test]
fn test_login_picks_best_match() {
    let store = MemoryIdentityStore::new();
    store.put(&UserId::from("alice"), ALICE.to_vec()).unwrap();
    store.put(&UserId::from("bob"), vec![0.0, 1.0]).unwrap();
    let h = Harness::with_store(Arc::new(store));

    h.fake.show_face(&[0.2, 0.98]);
    let found = h.vigil.login(None).unwrap();
    assert_eq!(found.identity.as_str(), "bob");
    assert_eq!(h.vigil.session().current_user().unwrap().as_str(), "bob");

    assert!(matches!(h.vigil.login(None), Err(VigilError::SessionActive(_))));
}

#[test]
fn test_login_starts_all_timers_now() {
    let h = Harness::new();
    h.at(3.0);
    h.login_alice();
    let snap = h.vigil.session().snapshot().unwrap();
    let now = h.t0 + Duration::from_secs(3);
    assert_eq!(snap.started_at, now);
    assert_eq!(snap.last_blink_at, now);
    assert_eq!(snap.last_reverify_check, now);
    assert_eq!(snap.last_hand_seen_at, now);
}

// ---------------------------------------------------------------------------
// Frame loop and shutdown
// ---------------------------------------------------------------------------

fn scripted_vigil(frames: Vec<ScriptedFrame>, looping: bool) -> (Arc<Vigil>, Arc<ScriptedSensors>, UnboundedReceiver<AuthEvent>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = MemoryIdentityStore::new();
    store.put(&UserId::from("alice"), ALICE.to_vec()).unwrap();
    let sensors = Arc::new(
        ScriptedSensors::new(frames)
            .looping(looping)
            .with_frame_interval(Duration::from_millis(1)),
    );
    let (observer, events) = ChannelObserver::new();
    let vigil = Vigil::new(
        VigilConfig::default(),
        sensors.clone().into_sensors(),
        Arc::new(store),
        Arc::new(observer),
    )
    .unwrap();
    (Arc::new(vigil), sensors, events)
}

fn alice_frame() -> ScriptedFrame {
    ScriptedFrame {
        embedding: Some(ALICE.to_vec()),
        hand: true,
        ..Default::default()
    }
}

fn logout_reasons(events: &mut UnboundedReceiver<AuthEvent>) -> (Vec<LogoutReason>, usize) {
    let (mut reasons, mut statuses) = (Vec::new(), 0);
    while let Ok(event) = events.try_recv() {
        match event {
            AuthEvent::LoggedOut { reason, .. } => reasons.push(reason),
            AuthEvent::Status(_) => statuses += 1,
            _ => {}
        }
    }
    (reasons, statuses)
}

#[test]
fn test_stop_request_logs_out_manually() {
    let (vigil, _sensors, mut events) = scripted_vigil(vec![alice_frame()], true);
    vigil.login(None).unwrap();

    let runner = Arc::clone(&vigil);
    let handle = std::thread::spawn(move || runner.continuous_auth());
    std::thread::sleep(Duration::from_millis(50));
    vigil.request_stop();

    assert_eq!(handle.join().unwrap(), LoopExit::Stopped);
    let (reasons, statuses) = logout_reasons(&mut events);
    assert_eq!(reasons, vec![LogoutReason::Manual]);
    assert!(statuses > 0);
    assert!(!vigil.session().is_active());
}

#[test]
fn test_source_closed_ends_session() {
    let mut frames = vec![alice_frame(); 5];
    frames.insert(2, ScriptedFrame {
        unavailable: true,
        ..Default::default()
    });
    let (vigil, _sensors, mut events) = scripted_vigil(frames, false);
    vigil.login(None).unwrap();

    assert_eq!(vigil.continuous_auth(), LoopExit::SourceClosed);
    let (reasons, statuses) = logout_reasons(&mut events);
    assert_eq!(reasons, vec![LogoutReason::SourceClosed]);
    assert_eq!(statuses, 4);
}

#[test]
fn test_loop_exits_when_session_already_ended() {
    let (vigil, _sensors, mut events) = scripted_vigil(vec![alice_frame()], true);
    vigil.login(None).unwrap();
    vigil.logout(LogoutReason::UserChanged);

    assert_eq!(vigil.continuous_auth(), LoopExit::LoggedOut);
    let (reasons, _) = logout_reasons(&mut events);
    assert_eq!(reasons, vec![LogoutReason::UserChanged]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_logout_ends_running_loop() {
    let store = MemoryIdentityStore::new();
    store.put(&UserId::from("alice"), ALICE.to_vec()).unwrap();
    let fake = Arc::new(FakeSensors::new());
    let config = VigilConfig {
        monitor_tick_ms: 10,
        check_interval_ms: 20,
        logout_timer_ms: 50,
        ..Default::default()
    };
    let (observer, mut events) = ChannelObserver::new();
    let vigil = Arc::new(
        Vigil::new(config, fake.sensors(), Arc::new(store), Arc::new(observer)).unwrap(),
    );
    vigil.login(None).unwrap();

    let runner = Arc::clone(&vigil);
    let frame_loop = tokio::task::spawn_blocking(move || runner.continuous_auth());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!frame_loop.is_finished());

    fake.show_face(&IMPOSTOR);
    let monitor = vigil.spawn_monitor();

    let exit = tokio::time::timeout(Duration::from_secs(2), frame_loop)
        .await
        .expect("frame loop noticed the logout")
        .unwrap();
    assert_eq!(exit, LoopExit::LoggedOut);
    assert!(!vigil.session().is_active());
    let (reasons, statuses) = logout_reasons(&mut events);
    assert_eq!(reasons, vec![LogoutReason::UserChanged]);
    assert!(statuses > 0);

    vigil.shutdown();
    monitor.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_both_loops_and_releases_source() {
    let (vigil, sensors, mut events) = scripted_vigil(vec![alice_frame()], true);
    vigil.login(None).unwrap();

    let monitor = vigil.spawn_monitor();
    let runner = Arc::clone(&vigil);
    let frame_loop = tokio::task::spawn_blocking(move || runner.continuous_auth());

    tokio::time::sleep(Duration::from_millis(50)).await;
    vigil.shutdown();

    tokio::time::timeout(Duration::from_secs(2), monitor)
        .await
        .expect("monitor stopped")
        .unwrap();
    let exit = tokio::time::timeout(Duration::from_secs(2), frame_loop)
        .await
        .expect("frame loop stopped")
        .unwrap();

    assert_eq!(exit, LoopExit::Stopped);
    assert!(sensors.is_released());
    let (reasons, _) = logout_reasons(&mut events);
    assert_eq!(reasons, vec![LogoutReason::Manual]);
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_slow_tick() {
    let store = MemoryIdentityStore::new();
    store.put(&UserId::from("alice"), ALICE.to_vec()).unwrap();
    let fake = Arc::new(FakeSensors::new());
    let config = VigilConfig {
        monitor_tick_ms: 20,
        check_interval_ms: 20,
        ..Default::default()
    };
    let vigil = Vigil::new(config, fake.sensors(), Arc::new(store), Arc::new(vigil_core::TracingObserver))
        .unwrap();
    vigil.login(None).unwrap();

    fake.set_embed_delay(Duration::from_secs(1));
    let monitor = vigil.spawn_monitor();
    // Let a tick start and block inside the embedder.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    vigil.shutdown();
    tokio::time::timeout(Duration::from_millis(500), monitor)
        .await
        .expect("monitor did not wait for the in-flight tick")
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
}
