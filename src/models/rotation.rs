use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationUnit {
    Day,
    Month,
}

/// Rotation policy attached to a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub auto_rotate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<RotationUnit>,
    /// Private certificates only: generate a new key pair on rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate_keys: Option<bool>,
}

impl RotationPolicy {
    pub fn disabled() -> Self {
        Self {
            auto_rotate: false,
            interval: None,
            unit: None,
            rotate_keys: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.auto_rotate {
            return Ok(());
        }
        let (interval, unit) = match (self.interval, self.unit) {
            (Some(i), Some(u)) => (i, u),
            _ => {
                return Err(AppError::validation(
                    "rotation.interval and rotation.unit are required when auto_rotate is true",
                ))
            }
        };
        let max = match unit {
            RotationUnit::Day => 366,
            RotationUnit::Month => 12,
        };
        if interval == 0 || interval > max {
            return Err(AppError::validation(format!(
                "rotation.interval must be between 1 and {max} for unit {:?}",
                unit
            )));
        }
        Ok(())
    }

    /// Next rotation instant counted from `from`, or `None` when the policy
    /// does not auto-rotate.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.auto_rotate {
            return None;
        }
        let interval = self.interval?;
        match self.unit? {
            RotationUnit::Day => from.checked_add_signed(Duration::days(interval as i64)),
            RotationUnit::Month => from.checked_add_months(Months::new(interval)),
        }
    }

    pub fn rotate_keys(&self) -> bool {
        self.rotate_keys.unwrap_or(false)
    }
}

/// Per-secret rotation state machine:
/// `no_policy` → `scheduled(next)` → `rotating(since)` → `scheduled(next)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RotationState {
    NoPolicy,
    Scheduled {
        next_rotation_date: DateTime<Utc>,
    },
    Rotating {
        since: DateTime<Utc>,
        slot: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationTracker {
    pub state: RotationState,
    /// Scheduled instant of the last executed rotation. A slot is never
    /// executed twice.
    #[serde(default)]
    pub last_slot: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_rotated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RotationTracker {
    pub fn new(policy: Option<&RotationPolicy>, from: DateTime<Utc>) -> Self {
        let mut tracker = Self {
            state: RotationState::NoPolicy,
            last_slot: None,
            last_rotated_at: None,
            last_error: None,
        };
        tracker.reschedule(policy, from);
        tracker
    }

    pub fn reschedule(&mut self, policy: Option<&RotationPolicy>, from: DateTime<Utc>) {
        self.state = match policy.and_then(|p| p.next_after(from)) {
            Some(next) => RotationState::Scheduled {
                next_rotation_date: next,
            },
            None => RotationState::NoPolicy,
        };
    }

    pub fn next_rotation_date(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            RotationState::NoPolicy => None,
            RotationState::Scheduled { next_rotation_date } => Some(*next_rotation_date),
            RotationState::Rotating { slot, .. } => Some(*slot),
        }
    }

    /// The slot to execute at `now`, if any. A rotation stuck in
    /// `rotating` for longer than `grace` is handed out again.
    pub fn due_slot(&self, now: DateTime<Utc>, grace: Duration) -> Option<DateTime<Utc>> {
        match &self.state {
            RotationState::NoPolicy => None,
            RotationState::Scheduled { next_rotation_date } => {
                let next = *next_rotation_date;
                (next <= now && self.last_slot != Some(next)).then_some(next)
            }
            RotationState::Rotating { since, slot } => {
                (now - *since >= grace && self.last_slot != Some(*slot)).then_some(*slot)
            }
        }
    }

    pub fn begin(&mut self, slot: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = RotationState::Rotating { since: now, slot };
    }

    pub fn complete(
        &mut self,
        slot: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        policy: Option<&RotationPolicy>,
    ) {
        if slot.is_some() {
            self.last_slot = slot;
        }
        self.last_rotated_at = Some(now);
        self.last_error = None;
        self.reschedule(policy, now);
    }

    /// Keep the slot scheduled so the next tick retries it.
    pub fn fail(&mut self, slot: DateTime<Utc>, error: impl Into<String>) {
        self.state = RotationState::Scheduled {
            next_rotation_date: slot,
        };
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn daily(n: u32) -> RotationPolicy {
        RotationPolicy {
            auto_rotate: true,
            interval: Some(n),
            unit: Some(RotationUnit::Day),
            rotate_keys: None,
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(daily(1).validate().is_ok());
        assert!(daily(0).validate().is_err());
        assert!(daily(367).validate().is_err());
        let monthly = RotationPolicy {
            unit: Some(RotationUnit::Month),
            ..daily(13)
        };
        assert!(monthly.validate().is_err());
        let missing = RotationPolicy {
            interval: None,
            ..daily(1)
        };
        assert!(missing.validate().is_err());
        assert!(RotationPolicy::disabled().validate().is_ok());
    }

    #[test]
    fn test_next_after_months_clamps_to_month_end() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let policy = RotationPolicy {
            unit: Some(RotationUnit::Month),
            ..daily(1)
        };
        let next = policy.next_after(jan31).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_state_machine_executes_slot_once() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut tracker = RotationTracker::new(Some(&daily(1)), t0);
        let slot = tracker.next_rotation_date().unwrap();
        assert_eq!(tracker.due_slot(t0, Duration::minutes(10)), None);

        let now = slot + Duration::minutes(1);
        assert_eq!(tracker.due_slot(now, Duration::minutes(10)), Some(slot));

        tracker.begin(slot, now);
        assert_eq!(tracker.due_slot(now, Duration::minutes(10)), None);

        tracker.complete(Some(slot), now, Some(&daily(1)));
        assert_eq!(tracker.last_slot, Some(slot));
        assert!(tracker.next_rotation_date().unwrap() > now);
        assert_eq!(tracker.due_slot(now, Duration::minutes(10)), None);
    }

    #[test]
    fn test_stuck_rotation_is_retried_after_grace() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut tracker = RotationTracker::new(Some(&daily(1)), t0);
        let slot = tracker.next_rotation_date().unwrap();
        tracker.begin(slot, slot);
        assert_eq!(tracker.due_slot(slot + Duration::minutes(5), Duration::minutes(10)), None);
        assert_eq!(
            tracker.due_slot(slot + Duration::minutes(11), Duration::minutes(10)),
            Some(slot)
        );
    }

    #[test]
    fn test_failed_rotation_stays_due() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut tracker = RotationTracker::new(Some(&daily(1)), t0);
        let slot = tracker.next_rotation_date().unwrap();
        tracker.begin(slot, slot);
        tracker.fail(slot, "engine unavailable");
        assert_eq!(tracker.due_slot(slot, Duration::minutes(10)), Some(slot));
        assert_eq!(tracker.last_error.as_deref(), Some("engine unavailable"));
    }

    #[test]
    fn test_no_policy_never_due() {
        let t0 = Utc::now();
        let tracker = RotationTracker::new(Some(&RotationPolicy::disabled()), t0);
        assert_eq!(tracker.state, RotationState::NoPolicy);
        assert_eq!(tracker.due_slot(t0 + Duration::days(400), Duration::zero()), None);
    }
}
