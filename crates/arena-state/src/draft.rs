use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::events::{LogClock, LogEvent, LogLine};

/// Options offered per pick.
pub const OPTIONS_PER_PICK: usize = 3;
pub const DEFAULT_GROUP_WINDOW_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftState {
    #[default]
    Inactive,
    Started,
    HeroSelection,
    CardSelection,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPick {
    /// 0-based.
    pub pick_number: usize,
    pub offered: Vec<String>,
    pub selected: String,
}

/// Everything tracked for the current draft run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftSession {
    pub state: DraftState,
    pub picks: Vec<DraftPick>,
    pub hero_options: Vec<String>,
    pub selected_hero: Option<String>,
    /// Options of the pick currently on screen, once all three are known.
    pub pending_options: Vec<String>,
    pub seen_deck_cards: BTreeSet<String>,
    pub last_shown_ms: Option<u64>,
    pub pick_counter: usize,
    /// Shown cards collected for the group in progress.
    #[serde(skip)]
    shown_group: Vec<String>,
}

/// Changes worth telling consumers about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DraftNotification {
    StateChanged { from: DraftState, to: DraftState },
    DraftStarted,
    DraftCompleted { picks: Vec<DraftPick> },
    CardPicked(DraftPick),
    HeroSelected { hero_id: String },
    DeckCardDetected { card_id: String },
}

/// Drives a [`DraftSession`] from parsed log lines and confirmed visual detections.
#[derive(Debug, Clone)]
pub struct DraftMachine {
    session: DraftSession,
    group_window_ms: u64,
    clock: LogClock,
}

impl Default for DraftMachine {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_WINDOW_MS)
    }
}

impl DraftMachine {
    pub fn new(group_window_ms: u64) -> Self {
        Self {
            session: DraftSession::default(),
            group_window_ms,
            clock: LogClock::default(),
        }
    }

    pub fn session(&self) -> &DraftSession {
        &self.session
    }

    pub fn state(&self) -> DraftState {
        self.session.state
    }

    pub fn picks(&self) -> &[DraftPick] {
        &self.session.picks
    }

    pub fn selected_hero(&self) -> Option<&str> {
        self.session.selected_hero.as_deref()
    }

    fn transition(&mut self, to: DraftState, out: &mut Vec<DraftNotification>) {
        let from = self.session.state;
        if from != to {
            info!("Draft state {:?} -> {:?}", from, to);
            self.session.state = to;
            out.push(DraftNotification::StateChanged { from, to });
        }
    }

    /// Apply one log line. `arrival_ms` is when the line was read, on any clock that
    /// only moves forward; it places lines that carry no timestamp of their own.
    pub fn apply(&mut self, line: &LogLine, arrival_ms: u64) -> Vec<DraftNotification> {
        let at = self.clock.resolve(line.timestamp_ms, arrival_ms);
        let mut out = Vec::new();

        match &line.event {
            LogEvent::DraftStarted => {
                let from = self.session.state;
                self.session = DraftSession::default();
                self.session.state = from;
                self.transition(DraftState::Started, &mut out);
                out.push(DraftNotification::DraftStarted);
            }
            LogEvent::DraftCompleted => {
                if self.session.state != DraftState::Completed {
                    self.transition(DraftState::Completed, &mut out);
                    out.push(DraftNotification::DraftCompleted {
                        picks: self.session.picks.clone(),
                    });
                }
            }
            LogEvent::CardShown { card_id, .. } => self.on_card_shown(card_id, at, &mut out),
            LogEvent::CardChosen { card_id } => self.on_card_chosen(card_id, &mut out),
            LogEvent::HeroMarker { card_id } => {
                let resumable = matches!(
                    self.session.state,
                    DraftState::Started | DraftState::HeroSelection
                );
                if resumable && self.session.selected_hero.is_none() {
                    self.select_hero(card_id, &mut out);
                }
            }
            LogEvent::DeckCard { card_id } => {
                if self.session.seen_deck_cards.insert(card_id.clone()) {
                    out.push(DraftNotification::DeckCardDetected {
                        card_id: card_id.clone(),
                    });
                }
            }
            LogEvent::MatchStarted => {
                self.session.shown_group.clear();
                self.session.pending_options.clear();
                self.transition(DraftState::Inactive, &mut out);
            }
        }
        out
    }

    fn on_card_shown(&mut self, card_id: &str, at: u64, out: &mut Vec<DraftNotification>) {
        let state = self.session.state;
        if matches!(state, DraftState::Inactive | DraftState::Completed) {
            return;
        }

        let session = &mut self.session;
        let gap_exceeded = session
            .last_shown_ms
            .is_some_and(|last| at.saturating_sub(last) > self.group_window_ms);
        if gap_exceeded || session.shown_group.len() >= OPTIONS_PER_PICK {
            session.shown_group.clear();
        }
        session.shown_group.push(card_id.to_string());
        session.last_shown_ms = Some(at);

        if session.shown_group.len() < OPTIONS_PER_PICK {
            return;
        }
        let group = session.shown_group.clone();
        match state {
            DraftState::Started => {
                debug!("Hero options: {:?}", group);
                session.hero_options = group;
                self.transition(DraftState::HeroSelection, out);
            }
            DraftState::HeroSelection => {
                debug!("Hero options replaced: {:?}", group);
                session.hero_options = group;
            }
            DraftState::CardSelection => {
                debug!("Pick {} options: {:?}", session.pick_counter, group);
                session.pending_options = group;
            }
            DraftState::Inactive | DraftState::Completed => {}
        }
    }

    fn on_card_chosen(&mut self, card_id: &str, out: &mut Vec<DraftNotification>) {
        match self.session.state {
            DraftState::HeroSelection => self.select_hero(card_id, out),
            DraftState::CardSelection => {
                if self.session.pending_options.len() != OPTIONS_PER_PICK {
                    debug!("Choice {} without a complete option group, ignored", card_id);
                    return;
                }
                let pick = DraftPick {
                    pick_number: self.session.pick_counter,
                    offered: std::mem::take(&mut self.session.pending_options),
                    selected: card_id.to_string(),
                };
                info!("Pick {}: {} from {:?}", pick.pick_number, pick.selected, pick.offered);
                self.session.pick_counter += 1;
                self.session.shown_group.clear();
                self.session.picks.push(pick.clone());
                out.push(DraftNotification::CardPicked(pick));
            }
            _ => debug!("Choice {} outside a selection phase, ignored", card_id),
        }
    }

    fn select_hero(&mut self, hero_id: &str, out: &mut Vec<DraftNotification>) {
        info!("Hero selected: {}", hero_id);
        self.session.selected_hero = Some(hero_id.to_string());
        self.session.shown_group.clear();
        out.push(DraftNotification::HeroSelected {
            hero_id: hero_id.to_string(),
        });
        self.transition(DraftState::CardSelection, out);
    }

    /// Use a confirmed visual detection as the option group when the log has not
    /// supplied one. During `Started` the group becomes the hero options and the draft
    /// moves on to hero selection. Returns `None` when the detection was not taken.
    pub fn apply_visual(&mut self, card_ids: &[String]) -> Option<Vec<DraftNotification>> {
        if card_ids.len() != OPTIONS_PER_PICK {
            return None;
        }
        let mut out = Vec::new();
        match self.session.state {
            DraftState::Started => {
                debug!("Hero options from visual detection: {:?}", card_ids);
                self.session.hero_options = card_ids.to_vec();
                self.session.shown_group.clear();
                self.transition(DraftState::HeroSelection, &mut out);
            }
            DraftState::CardSelection if self.session.pending_options.is_empty() => {
                debug!("Pick options from visual detection: {:?}", card_ids);
                self.session.pending_options = card_ids.to_vec();
            }
            _ => return None,
        }
        Some(out)
    }
}
