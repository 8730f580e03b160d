//! Session host: clocks on the virtual timeline, roles, evidence, live gates.

use std::time::Duration;

use chrono::NaiveDate;
use clickwork_engine::config::{EngineConfig, QueueConfig, UserEntry, WalkerConfig};
use clickwork_engine::engine::Engine;
use clickwork_engine::error::Error;
use clickwork_engine::event::EventKind;
use clickwork_engine::evidence::{EvidenceBlob, EvidenceRef};
use clickwork_engine::gate::{GateStage, GateStatus};
use clickwork_engine::model::{
    CurrentUser, ItemId, ItemStatus, LinkId, Quality, Rating, ReviewItem, Role, Subtask, SubtaskId,
    Task, UserId, Verdict,
};
use clickwork_engine::queue::{QueuePhase, SessionState};
use serde_json::json;

const REVIEWER: UserId = UserId(1);
const MANAGER: UserId = UserId(2);
const WORKER: UserId = UserId(5);

fn entry(id: UserId, role: Role, team: &[u64]) -> UserEntry {
    UserEntry {
        id,
        role,
        team: team.iter().copied().map(UserId).collect(),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        queue: QueueConfig {
            item_cap_seconds: 600,
            session_cap_seconds: 8 * 60 * 60,
            settle_delay_seconds: 0,
        },
        walker: WalkerConfig {
            default_review_seconds: 30,
            proxy_pool: vec!["proxy-a".into(), "proxy-b".into()],
            mask_base_url: "https://go.test/r".into(),
        },
        users: vec![
            entry(REVIEWER, Role::QcReviewer, &[]),
            entry(MANAGER, Role::Manager, &[5, 6]),
            entry(WORKER, Role::Worker, &[]),
            entry(UserId(6), Role::Worker, &[]),
        ],
        ..EngineConfig::default()
    }
}

fn engine() -> Engine {
    Engine::in_memory(config())
}

fn user(engine: &Engine, id: UserId) -> CurrentUser {
    engine.user(id).unwrap()
}

fn review_items(n: u64) -> Vec<ReviewItem> {
    (1..=n)
        .map(|i| ReviewItem::new(ItemId(i), WORKER, json!({"clip": i})))
        .collect()
}

fn task() -> Task {
    Task::new("t-1")
        .subtask(Subtask::new("s1").link("l1", "https://example.com/a", 3))
        .subtask(Subtask::new("s2").link("l2", "https://example.com/b", 3))
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn png() -> EvidenceBlob {
    EvidenceBlob {
        content_type: "image/png".into(),
        bytes: vec![0x89, b'P', b'N', b'G'],
    }
}

// ---------------------------------------------------------------------------
// Reviewer sessions
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unattended_item_locks_after_its_time_box() {
    let engine = engine();
    let reviewer = user(&engine, REVIEWER);
    let mut events = engine.subscribe();

    engine.enqueue_review_items(REVIEWER, review_items(2)).await.unwrap();
    let snap = engine.start_review_session(&reviewer).await.unwrap();
    assert_eq!(snap.phase, QueuePhase::ItemActive { id: ItemId(1) });

    tokio::time::sleep(Duration::from_millis(599_500)).await;
    let snap = engine.queue_state(&reviewer).await.unwrap();
    assert_eq!(snap.item_remaining_seconds, Some(1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let snap = engine.queue_state(&reviewer).await.unwrap();
    assert_eq!(snap.phase, QueuePhase::ItemLocked { id: ItemId(1) });

    let err = engine.decide(&reviewer, ItemId(1), Verdict::Good).await.unwrap_err();
    assert!(matches!(err, Error::ItemLocked(ItemId(1))));

    let snap = engine.unlock_and_advance(&reviewer).await.unwrap();
    assert_eq!(snap.phase, QueuePhase::ItemActive { id: ItemId(2) });

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(seen.iter().all(|e| e.user_id == REVIEWER));
    assert!(seen.iter().any(|e| e.kind == EventKind::ItemLocked { id: ItemId(1) }));
    assert_eq!(
        seen.last().map(|e| e.kind.clone()),
        Some(EventKind::ItemActivated { id: ItemId(2) })
    );
}

#[tokio::test(start_paused = true)]
async fn paused_session_freezes_both_clocks() {
    let engine = engine();
    let reviewer = user(&engine, REVIEWER);
    engine.enqueue_review_items(REVIEWER, review_items(1)).await.unwrap();
    engine.start_review_session(&reviewer).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    let paused = engine.pause_review_session(&reviewer).await.unwrap();
    assert_eq!(paused.session.state, SessionState::Paused);
    assert_eq!(paused.item_remaining_seconds, Some(595));

    tokio::time::sleep(Duration::from_secs(900)).await;
    let snap = engine.queue_state(&reviewer).await.unwrap();
    assert_eq!(snap.item_remaining_seconds, Some(595));
    assert_eq!(snap.session.elapsed_seconds, 5);
    assert_eq!(snap.phase, QueuePhase::ItemActive { id: ItemId(1) });

    engine.resume_review_session(&reviewer).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let snap = engine.queue_state(&reviewer).await.unwrap();
    assert_eq!(snap.item_remaining_seconds, Some(593));
}

#[tokio::test(start_paused = true)]
async fn decided_items_and_stop() {
    let engine = engine();
    let reviewer = user(&engine, REVIEWER);
    engine.enqueue_review_items(REVIEWER, review_items(2)).await.unwrap();
    engine.start_review_session(&reviewer).await.unwrap();

    let snap = engine.decide(&reviewer, ItemId(1), Verdict::Bad).await.unwrap();
    assert_eq!(snap.items[0].status, ItemStatus::Rejected);
    assert_eq!(snap.phase, QueuePhase::ItemActive { id: ItemId(2) });

    let snap = engine.stop_review_session(&reviewer).await.unwrap();
    assert_eq!(snap.phase, QueuePhase::NoSession);
    assert_eq!(snap.items[1].status, ItemStatus::Pending);

    // No session, so nothing ticks.
    tokio::time::sleep(Duration::from_secs(1_000)).await;
    let snap = engine.queue_state(&reviewer).await.unwrap();
    assert_eq!(snap.items[1].status, ItemStatus::Pending);
}

#[tokio::test]
async fn duplicate_batch_is_refused_whole() {
    let engine = engine();
    let reviewer = user(&engine, REVIEWER);
    engine.enqueue_review_items(REVIEWER, review_items(1)).await.unwrap();

    let batch = vec![
        ReviewItem::new(ItemId(7), WORKER, json!(null)),
        ReviewItem::new(ItemId(1), WORKER, json!(null)),
    ];
    let err = engine.enqueue_review_items(REVIEWER, batch).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(engine.queue_state(&reviewer).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn roles_are_enforced() {
    let engine = engine();
    let reviewer = user(&engine, REVIEWER);
    let worker = user(&engine, WORKER);

    assert!(matches!(
        engine.start_review_session(&worker).await,
        Err(Error::Unauthorized(_))
    ));
    engine.assign_task(WORKER, task()).await.unwrap();
    assert!(matches!(
        engine
            .start_link_review(&reviewer, &SubtaskId::from("s1"), &LinkId::from("l1"))
            .await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(
        engine.gate_state(&worker, day()).await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(engine.user(UserId(99)), Err(Error::Unauthorized(_))));
}

#[tokio::test(start_paused = true)]
async fn restarted_session_gets_a_running_clock() {
    let mut config = config();
    config.queue.session_cap_seconds = 5;
    let engine = Engine::in_memory(config);
    let reviewer = user(&engine, REVIEWER);
    engine.enqueue_review_items(REVIEWER, review_items(1)).await.unwrap();

    for _ in 0..2 {
        let snap = engine.start_review_session(&reviewer).await.unwrap();
        assert_eq!(snap.phase, QueuePhase::ItemActive { id: ItemId(1) });
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        let snap = engine.queue_state(&reviewer).await.unwrap();
        assert_eq!(snap.phase, QueuePhase::NoSession, "cap ends the session");
        assert_eq!(snap.items[0].status, ItemStatus::Pending);
    }
}

// ---------------------------------------------------------------------------
// Worker tasks
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn link_timer_expiry_requires_a_reload() {
    let engine = engine();
    let worker = user(&engine, WORKER);
    let mut events = engine.subscribe();
    let (s1, l1) = (SubtaskId::from("s1"), LinkId::from("l1"));

    engine.assign_task(WORKER, task()).await.unwrap();
    let view = engine.start_link_review(&worker, &s1, &l1).await.unwrap();
    assert_eq!(view.review_remaining_seconds, Some(3));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let view = engine.task_state(&worker).await.unwrap();
    let link = &view.task.subtasks[0].links[0];
    assert!(link.reload_required);
    assert_eq!(view.review_remaining_seconds, Some(0));

    let route = engine.reload_link(&worker, &s1, &l1).await.unwrap();
    assert_eq!(route.proxy_ref, "proxy-b");
    let view = engine.task_state(&worker).await.unwrap();
    assert!(!view.task.subtasks[0].links[0].reload_required);
    assert_eq!(view.review_remaining_seconds, Some(3));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let view = engine.task_state(&worker).await.unwrap();
    assert!(view.task.subtasks[0].links[0].reload_required, "reloaded link keeps ticking");

    let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&EventKind::LinkReviewExpired {
        subtask: s1.clone(),
        link: l1.clone(),
    }));
    assert!(kinds.contains(&EventKind::LinkReloaded {
        subtask: s1,
        link: l1,
        proxy_ref: "proxy-b".into(),
    }));
}

#[tokio::test]
async fn subtask_needs_an_uploaded_screenshot() {
    let engine = engine();
    let worker = user(&engine, WORKER);
    let (s1, l1) = (SubtaskId::from("s1"), LinkId::from("l1"));
    engine.assign_task(WORKER, task()).await.unwrap();
    engine.start_link_review(&worker, &s1, &l1).await.unwrap();
    engine
        .complete_link_review(&worker, &s1, &l1, Quality::Good)
        .await
        .unwrap();

    let err = engine
        .complete_subtask(&worker, &s1, "done", Some(EvidenceRef::from("ev-forged")), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingEvidence(_)));
    let err = engine.complete_subtask(&worker, &s1, "done", None, None).await.unwrap_err();
    assert!(matches!(err, Error::MissingEvidence(_)));

    let shot = engine.upload_evidence(&worker, "s1", png()).await.unwrap();
    let rating = Rating::try_from(4).unwrap();
    let view = engine
        .complete_subtask(&worker, &s1, "all links rated", Some(shot.clone()), Some(rating))
        .await
        .unwrap();
    assert!(view.task.subtasks[0].submission.completed);
    assert_eq!(view.task.subtasks[0].submission.evidence_ref, Some(shot.clone()));
    let evidence = view.evidence.get("s1").unwrap();
    assert_eq!(evidence.screenshot, Some(shot));
    assert_eq!(evidence.rating.map(|r| r.value()), Some(4));
}

#[tokio::test]
async fn uploads_need_a_unit_and_bytes() {
    let engine = engine();
    let worker = user(&engine, WORKER);
    assert!(matches!(
        engine.upload_evidence(&worker, " ", png()).await,
        Err(Error::InvalidInput(_))
    ));
    let empty = EvidenceBlob {
        content_type: "image/png".into(),
        bytes: Vec::new(),
    };
    assert!(matches!(
        engine.upload_evidence(&worker, "s1", empty).await,
        Err(Error::MissingEvidence(_))
    ));
}

#[tokio::test]
async fn one_open_task_per_worker() {
    let engine = engine();
    engine.assign_task(WORKER, task()).await.unwrap();
    assert!(matches!(
        engine.assign_task(WORKER, Task::new("t-2")).await,
        Err(Error::InvalidInput(_))
    ));

    let abandoned = engine.abandon_task(WORKER).await.unwrap();
    assert_eq!(abandoned.id.0, "t-1");
    engine.assign_task(WORKER, Task::new("t-2")).await.unwrap();
}

#[tokio::test]
async fn task_state_without_a_task_is_not_found() {
    let engine = engine();
    let worker = user(&engine, WORKER);
    assert!(matches!(engine.task_state(&worker).await, Err(Error::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Manager gate
// ---------------------------------------------------------------------------

async fn next_status(watcher: &mut clickwork_engine::engine::GateWatcher) -> GateStatus {
    tokio::time::timeout(Duration::from_secs(5), watcher.changed())
        .await
        .expect("gate watcher did not update")
        .unwrap()
        .status
}

#[tokio::test]
async fn watcher_follows_the_managers_day() {
    let engine = engine();
    let manager = user(&engine, MANAGER);
    let worker = user(&engine, WORKER);
    let mut watcher = engine.watch_gate(&manager, day()).await.unwrap();
    assert_eq!(
        watcher.status(),
        GateStatus::Blocked {
            stage: GateStage::SelfAttendance
        }
    );

    engine.mark_attendance(&manager, day()).await.unwrap();
    assert_eq!(
        next_status(&mut watcher).await,
        GateStatus::Blocked {
            stage: GateStage::TeamVerification
        }
    );

    engine.mark_attendance(&worker, day()).await.unwrap();
    engine
        .verify_team_attendance(&manager, day(), &[WORKER, MANAGER])
        .await
        .unwrap();
    assert_eq!(
        next_status(&mut watcher).await,
        GateStatus::Blocked {
            stage: GateStage::Performance
        }
    );

    engine
        .mark_performance(&manager, day(), WORKER, Rating::try_from(4).unwrap(), "solid")
        .await
        .unwrap();
    assert_eq!(next_status(&mut watcher).await, GateStatus::Open);
    assert!(watcher.current().state.performance_complete);
}

#[tokio::test]
async fn managers_only_act_on_their_team() {
    let engine = engine();
    let manager = user(&engine, MANAGER);
    let reviewer = user(&engine, REVIEWER);
    engine.mark_attendance(&reviewer, day()).await.unwrap();

    assert!(matches!(
        engine.approve_attendance(&manager, day(), REVIEWER).await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(
        engine
            .mark_performance(&manager, day(), REVIEWER, Rating::try_from(3).unwrap(), "")
            .await,
        Err(Error::Unauthorized(_))
    ));
}

#[tokio::test]
async fn sweep_defaults_to_the_directory() {
    let engine = engine();
    let worker = user(&engine, WORKER);
    engine.mark_attendance(&worker, day()).await.unwrap();

    let mut marked = engine.sweep_absent(day(), &[]).await.unwrap();
    marked.sort();
    assert_eq!(marked, vec![REVIEWER, MANAGER, UserId(6)]);
}
