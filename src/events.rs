use arena_state::{DraftMachine, DraftNotification, DraftPick, DraftState, LogLine};
use arena_vision::Identification;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::detection::{CycleOutcome, CycleStatus};

const EVENT_CAPACITY: usize = 256;

/// Everything the tracker reports to its consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TrackerEvent {
    CardsDetected {
        card_ids: Vec<String>,
        identifications: Vec<Identification>,
    },
    StateChanged {
        from: DraftState,
        to: DraftState,
    },
    DraftStarted,
    DraftCompleted {
        picks: Vec<DraftPick>,
    },
    CardPicked(DraftPick),
    HeroSelected {
        hero_id: String,
    },
    DeckCardDetected {
        card_id: String,
    },
    DetectionStatus {
        status: CycleStatus,
        next_poll_ms: Option<u64>,
    },
}

impl From<DraftNotification> for TrackerEvent {
    fn from(notification: DraftNotification) -> Self {
        match notification {
            DraftNotification::StateChanged { from, to } => TrackerEvent::StateChanged { from, to },
            DraftNotification::DraftStarted => TrackerEvent::DraftStarted,
            DraftNotification::DraftCompleted { picks } => TrackerEvent::DraftCompleted { picks },
            DraftNotification::CardPicked(pick) => TrackerEvent::CardPicked(pick),
            DraftNotification::HeroSelected { hero_id } => TrackerEvent::HeroSelected { hero_id },
            DraftNotification::DeckCardDetected { card_id } => {
                TrackerEvent::DeckCardDetected { card_id }
            }
        }
    }
}

/// Shared draft machine plus the broadcast channel every event goes out on. Both
/// the detection loop and the log watcher feed it.
#[derive(Clone)]
pub struct EventSink {
    draft: Arc<Mutex<DraftMachine>>,
    events: broadcast::Sender<TrackerEvent>,
}

impl EventSink {
    pub fn new(draft: DraftMachine) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            draft: Arc::new(Mutex::new(draft)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn draft(&self) -> MutexGuard<'_, DraftMachine> {
        self.draft.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn publish_draft(&self, notifications: Vec<DraftNotification>) {
        for notification in notifications {
            self.send(notification.into());
        }
    }

    /// Feed one parsed log line to the draft machine and publish what it produced.
    pub fn apply_line(&self, line: &LogLine, arrival_ms: u64) {
        let notifications = self.draft().apply(line, arrival_ms);
        self.publish_draft(notifications);
    }

    /// Publish a finished detection cycle. A confirmed card set is also offered to
    /// the draft machine as visual fallback.
    pub fn publish_cycle(&self, outcome: &CycleOutcome, next_poll: Option<Duration>) {
        if let Some(card_ids) = &outcome.confirmed {
            let taken = self.draft().apply_visual(card_ids);
            if let Some(notifications) = taken {
                debug!("Confirmed cards used as draft options: {:?}", card_ids);
                self.publish_draft(notifications);
            }
            self.send(TrackerEvent::CardsDetected {
                card_ids: card_ids.clone(),
                identifications: outcome
                    .identifications
                    .iter()
                    .map(|r| r.identification.clone())
                    .collect(),
            });
        }
        self.send(TrackerEvent::DetectionStatus {
            status: outcome.status,
            next_poll_ms: next_poll.map(|d| d.as_millis() as u64),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_state::LogEvent;
    use arena_vision::ConsensusRule;
    use arena_vision::RegionIdentification;

    fn line(event: LogEvent) -> LogLine {
        LogLine {
            timestamp_ms: None,
            event,
        }
    }

    fn confirmed(ids: &[&str]) -> CycleOutcome {
        let identifications = ids
            .iter()
            .enumerate()
            .map(|(i, id)| RegionIdentification {
                identification: Identification {
                    region: i,
                    card_id: Some(id.to_string()),
                    confidence: 0.9,
                    rule: ConsensusRule::TrustedHash,
                },
                candidates: Vec::new(),
            })
            .collect();
        CycleOutcome {
            status: CycleStatus::Confirmed,
            region_source: None,
            identifications,
            confirmed: Some(ids.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = TrackerEvent::HeroSelected {
            hero_id: "HERO_08".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "hero_selected");
        assert_eq!(value["payload"]["hero_id"], "HERO_08");

        let status = TrackerEvent::DetectionStatus {
            status: CycleStatus::CaptureUnavailable,
            next_poll_ms: Some(2400),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["payload"]["status"], "capture_unavailable");
        assert_eq!(value["payload"]["next_poll_ms"], 2400);
    }

    #[test]
    fn test_draft_lines_publish_notifications() {
        let sink = EventSink::new(DraftMachine::default());
        let mut rx = sink.subscribe();
        sink.apply_line(&line(LogEvent::DraftStarted), 0);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&TrackerEvent::DraftStarted));
        assert!(events.contains(&TrackerEvent::StateChanged {
            from: DraftState::Inactive,
            to: DraftState::Started,
        }));
        assert_eq!(sink.draft().state(), DraftState::Started);
    }

    #[test]
    fn test_confirmed_cycle_emits_cards() {
        let sink = EventSink::new(DraftMachine::default());
        let mut rx = sink.subscribe();
        sink.publish_cycle(&confirmed(&["A", "B", "C"]), Some(Duration::from_millis(1200)));

        match rx.try_recv().unwrap() {
            TrackerEvent::CardsDetected {
                card_ids,
                identifications,
            } => {
                assert_eq!(card_ids, vec!["A", "B", "C"]);
                assert_eq!(identifications.len(), 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            TrackerEvent::DetectionStatus {
                status: CycleStatus::Confirmed,
                next_poll_ms: Some(1200),
            }
        );
        // no draft in progress, so nothing was offered
        assert!(sink.draft().session().pending_options.is_empty());
    }

    #[test]
    fn test_pending_cycle_status_only() {
        let sink = EventSink::new(DraftMachine::default());
        let mut rx = sink.subscribe();
        sink.publish_cycle(&CycleOutcome::bare(CycleStatus::Pending), None);
        assert_eq!(
            rx.try_recv().unwrap(),
            TrackerEvent::DetectionStatus {
                status: CycleStatus::Pending,
                next_poll_ms: None,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_confirmed_cards_fill_pick_options() {
        let sink = EventSink::new(DraftMachine::default());
        sink.apply_line(&line(LogEvent::DraftStarted), 0);
        for hero in ["HERO_01", "HERO_02", "HERO_03"] {
            sink.apply_line(
                &line(LogEvent::CardShown {
                    card_id: hero.to_string(),
                    name: None,
                }),
                10,
            );
        }
        sink.apply_line(
            &line(LogEvent::CardChosen {
                card_id: "HERO_02".to_string(),
            }),
            20,
        );
        assert_eq!(sink.draft().state(), DraftState::CardSelection);

        sink.publish_cycle(&confirmed(&["A", "B", "C"]), None);
        assert_eq!(sink.draft().session().pending_options, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_confirmed_cards_become_hero_options() {
        let sink = EventSink::new(DraftMachine::default());
        sink.apply_line(&line(LogEvent::DraftStarted), 0);
        let mut rx = sink.subscribe();

        sink.publish_cycle(&confirmed(&["HERO_01", "HERO_02", "HERO_03"]), None);
        assert_eq!(
            rx.try_recv().unwrap(),
            TrackerEvent::StateChanged {
                from: DraftState::Started,
                to: DraftState::HeroSelection,
            }
        );
        assert_eq!(
            sink.draft().session().hero_options,
            vec!["HERO_01", "HERO_02", "HERO_03"]
        );

        sink.apply_line(
            &line(LogEvent::CardChosen {
                card_id: "HERO_03".to_string(),
            }),
            20,
        );
        assert_eq!(sink.draft().selected_hero(), Some("HERO_03"));
    }
}
