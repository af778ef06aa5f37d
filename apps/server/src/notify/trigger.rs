use std::fmt;

/// Which kind of appointment change an outbox row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Insert,
    Update,
    /// Synthetic event enqueued by the reminder sweep, not by a status change.
    Reminder,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Reminder => "reminder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(EventType::Insert),
            "update" => Some(EventType::Update),
            "reminder" => Some(EventType::Reminder),
            _ => None,
        }
    }
}

/// Named classification of an appointment change that selects templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCondition {
    BookingConfirmation,
    BookingReminder,
    PostVisitThanks,
    BookingCancelled,
}

impl TriggerCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCondition::BookingConfirmation => "booking_confirmation",
            TriggerCondition::BookingReminder => "booking_reminder",
            TriggerCondition::PostVisitThanks => "post_visit_thanks",
            TriggerCondition::BookingCancelled => "booking_cancelled",
        }
    }
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an appointment change event.
///
/// Only three transitions fire; everything else is a deliberate no-op,
/// not an error.
pub fn route_event(
    event_type: EventType,
    old_status: Option<&str>,
    new_status: &str,
) -> Option<TriggerCondition> {
    match event_type {
        EventType::Insert if new_status == "pending" => {
            Some(TriggerCondition::BookingConfirmation)
        }
        EventType::Update => {
            let old = old_status?;
            if old != "cancelled" && new_status == "cancelled" {
                Some(TriggerCondition::BookingCancelled)
            } else if old != "completed" && new_status == "completed" {
                Some(TriggerCondition::PostVisitThanks)
            } else {
                None
            }
        }
        EventType::Reminder => Some(TriggerCondition::BookingReminder),
        _ => None,
    }
}

// ── Tests ──
