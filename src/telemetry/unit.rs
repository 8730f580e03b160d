//! Span helpers for sessions and work units.

use opentelemetry::KeyValue;
use tracing::Span;

use crate::event::EventKind;
use crate::gate::{GateStage, GateStatus};
use crate::model::UserId;

use super::metrics;

/// Span covering one unit of work: a review shift or a task walk.
pub fn start_unit_span(kind: &'static str, user: UserId, unit_id: &str) -> Span {
    tracing::info_span!(
        "clickwork.unit",
        "unit.kind" = kind,
        "unit.id" = unit_id,
        "unit.user" = %user,
        "unit.phase" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("unit.phase", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

/// Feed an engine event into the counters.
pub fn count_event(kind: &EventKind) {
    match kind {
        EventKind::SessionStarted => {
            metrics::review_sessions().add(1, &[KeyValue::new("transition", "started")]);
        }
        EventKind::SessionStopped { reason } => {
            let label = match reason {
                crate::event::StopReason::Requested => "stopped",
                crate::event::StopReason::CapReached => "cap_reached",
            };
            metrics::review_sessions().add(1, &[KeyValue::new("transition", label)]);
        }
        EventKind::ItemDecided { verdict, .. } => {
            metrics::review_decisions().add(1, &[KeyValue::new("verdict", verdict.to_string())]);
        }
        EventKind::ItemLocked { .. } => metrics::review_lockouts().add(1, &[]),
        EventKind::LinkReviewStarted { .. } => {
            metrics::link_reviews().add(1, &[KeyValue::new("outcome", "started")]);
        }
        EventKind::LinkReviewCompleted { .. } => {
            metrics::link_reviews().add(1, &[KeyValue::new("outcome", "completed")]);
        }
        EventKind::LinkReviewExpired { .. } => {
            metrics::link_reviews().add(1, &[KeyValue::new("outcome", "expired")]);
        }
        EventKind::LinkReloaded { .. } => {
            metrics::link_reviews().add(1, &[KeyValue::new("outcome", "reloaded")]);
        }
        EventKind::SubtaskCompleted { .. } => {
            metrics::submissions().add(1, &[KeyValue::new("phase", "subtask")]);
        }
        EventKind::ClickerPhaseCompleted { .. } => {
            metrics::submissions().add(1, &[KeyValue::new("phase", "clicker")]);
        }
        EventKind::TaskCompleted { .. } => {
            metrics::submissions().add(1, &[KeyValue::new("phase", "final")]);
        }
        EventKind::SessionPaused
        | EventKind::SessionResumed
        | EventKind::ItemActivated { .. }
        | EventKind::QueueIdle
        | EventKind::GateChanged { .. } => {}
    }
}

pub fn gate_label(status: GateStatus) -> &'static str {
    match status {
        GateStatus::Open => "open",
        GateStatus::Blocked { stage } => match stage {
            GateStage::SelfAttendance => "self_attendance",
            GateStage::TeamVerification => "team_verification",
            GateStage::Performance => "performance",
        },
    }
}

pub fn count_gate_evaluation(status: GateStatus) {
    metrics::gate_evaluations().add(1, &[KeyValue::new("status", gate_label(status))]);
}
