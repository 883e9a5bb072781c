//! Calendar service
//!
//! Turns extracted "YYYY-MM-DD HH:mm" strings (user-local time) into stored
//! events. A bad start time becomes now + 1 hour; a bad end time is dropped.

use crate::extractors::SCHEDULE_TIME_FORMAT;
use crate::models::{CalendarOutcome, CalendarStatus, ScheduleEvent};
use crate::state::StoreTx;
use crate::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::{info, warn};
use uuid::Uuid;

pub struct CalendarService {
    local_offset: FixedOffset,
}

impl CalendarService {
    pub fn new(local_offset: FixedOffset) -> Self {
        Self { local_offset }
    }

    fn parse_local(&self, value: Option<&str>) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(value?.trim(), SCHEDULE_TIME_FORMAT).ok()?;
        self.local_offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_event(
        &self,
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        title: &str,
        start_time: Option<&str>,
        end_time: Option<&str>,
        source_app: &str,
        now: DateTime<Utc>,
    ) -> Result<CalendarOutcome> {
        let (start, start_time_defaulted) = match self.parse_local(start_time) {
            Some(start) => (start, false),
            None => {
                warn!(%user_id, raw = ?start_time, "Start time unparseable, defaulting to now + 1h");
                (now + Duration::hours(1), true)
            }
        };

        // An end that does not come after the start carries no information.
        let end = self.parse_local(end_time).filter(|end| *end > start);
        if end.is_none() && end_time.is_some() {
            warn!(%user_id, raw = ?end_time, "End time dropped");
        }

        let event = ScheduleEvent {
            id: Uuid::new_v4(),
            user_id,
            title: title.trim().to_string(),
            start_time: start,
            end_time: end,
            source_app: source_app.to_string(),
            is_auto_generated: true,
            created_at: now,
        };
        tx.insert_schedule_event(&event).await?;

        info!(%user_id, event_id = %event.id, title = %event.title, "Calendar event created");

        Ok(CalendarOutcome {
            status: CalendarStatus::Created,
            event_id: event.id,
            event_title: event.title,
            start_time: start,
            end_time: end,
            start_time_defaulted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InMemoryStore, Store};

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    async fn create(
        service: &CalendarService,
        store: &InMemoryStore,
        start: Option<&str>,
        end: Option<&str>,
        now: DateTime<Utc>,
    ) -> CalendarOutcome {
        let mut tx = store.begin().await.unwrap();
        let outcome = service
            .create_event(tx.as_mut(), Uuid::new_v4(), " Dentist ", start, end, "Zalo", now)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        outcome
    }

    #[tokio::test]
    async fn test_parses_local_times() {
        let store = InMemoryStore::new();
        let service = CalendarService::new(offset(7));

        let outcome = create(
            &service,
            &store,
            Some("2026-10-17 09:00"),
            Some("2026-10-17 10:30"),
            Utc::now(),
        )
        .await;

        assert_eq!(outcome.status, CalendarStatus::Created);
        assert_eq!(outcome.event_title, "Dentist");
        assert_eq!(outcome.start_time, Utc.with_ymd_and_hms(2026, 10, 17, 2, 0, 0).unwrap());
        assert_eq!(outcome.end_time, Some(Utc.with_ymd_and_hms(2026, 10, 17, 3, 30, 0).unwrap()));
        assert!(!outcome.start_time_defaulted);
    }

    #[tokio::test]
    async fn test_bad_start_defaults_to_next_hour() {
        let store = InMemoryStore::new();
        let service = CalendarService::new(offset(0));
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

        let outcome = create(&service, &store, Some("tomorrow-ish"), None, now).await;

        assert_eq!(outcome.start_time, now + Duration::hours(1));
        assert!(outcome.start_time_defaulted);
        assert_eq!(outcome.end_time, None);
    }

    #[tokio::test]
    async fn test_bad_end_is_dropped_without_fallback() {
        let store = InMemoryStore::new();
        let service = CalendarService::new(offset(0));

        let outcome = create(
            &service,
            &store,
            Some("2026-10-17 09:00"),
            Some("after lunch"),
            Utc::now(),
        )
        .await;
        assert_eq!(outcome.end_time, None);
        assert!(!outcome.start_time_defaulted);

        let reversed = create(
            &service,
            &store,
            Some("2026-10-17 09:00"),
            Some("2026-10-17 08:00"),
            Utc::now(),
        )
        .await;
        assert_eq!(reversed.end_time, None);
    }

    #[tokio::test]
    async fn test_event_is_persisted_on_commit() {
        let store = InMemoryStore::new();
        let service = CalendarService::new(offset(0));
        let user_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        service
            .create_event(tx.as_mut(), user_id, "Standup", Some("2026-10-17 09:00"), None, "Slack", Utc::now())
            .await
            .unwrap();
        assert!(store.schedule_events_for_user(user_id).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        let events = store.schedule_events_for_user(user_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_auto_generated);
        assert_eq!(events[0].source_app, "Slack");
    }
}
