//! Parsing of draft-related lines from the game's event log.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const TIMESTAMP: &str = r"^D (\d{1,2}):(\d{2}):(\d{2})\.(\d{1,7}) (.*)$";
const DRAFT_MODE: &str = r"SetDraftMode - ([A-Z_]+)";
const CHOICE_SHOWN: &str = r"DraftManager\.OnChoiceShown - Choice: (.+?) \(([A-Za-z0-9_]+)\)\s*$";
const CLIENT_CHOOSES: &str = r"Client chooses: (.+?) \(([A-Za-z0-9_]+)\)\s*$";
const HERO_CHOSEN: &str = r"DraftManager\.OnChosen\(\): hero=([A-Za-z0-9_]+)";
const HERO_MARKER: &str = r"Hero Card = ([A-Za-z0-9_]+)";
const DECK_CARD: &str = r"Draft deck contains card ([A-Za-z0-9_]+)";
const CREATE_GAME: &str = r"GameState\.DebugPrintPower\(\) - CREATE_GAME";

#[derive(Debug, Error)]
pub enum LogParseError {
    #[error("invalid log pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("malformed {kind} line: {line}")]
    Malformed { kind: &'static str, line: String },
}

/// A draft-relevant event recognised in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    DraftStarted,
    DraftCompleted,
    CardShown {
        card_id: String,
        name: Option<String>,
    },
    CardChosen {
        card_id: String,
    },
    HeroMarker {
        card_id: String,
    },
    DeckCard {
        card_id: String,
    },
    MatchStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Milliseconds since midnight, from the line prefix when present.
    pub timestamp_ms: Option<u64>,
    pub event: LogEvent,
}

/// Compiled line patterns. Build once and reuse for every line.
pub struct LogParser {
    timestamp: Regex,
    draft_mode: Regex,
    choice_shown: Regex,
    client_chooses: Regex,
    hero_chosen: Regex,
    hero_marker: Regex,
    deck_card: Regex,
    create_game: Regex,
}

impl LogParser {
    pub fn new() -> Result<Self, LogParseError> {
        Ok(Self {
            timestamp: Regex::new(TIMESTAMP)?,
            draft_mode: Regex::new(DRAFT_MODE)?,
            choice_shown: Regex::new(CHOICE_SHOWN)?,
            client_chooses: Regex::new(CLIENT_CHOOSES)?,
            hero_chosen: Regex::new(HERO_CHOSEN)?,
            hero_marker: Regex::new(HERO_MARKER)?,
            deck_card: Regex::new(DECK_CARD)?,
            create_game: Regex::new(CREATE_GAME)?,
        })
    }

    /// Parse one line. Unrelated lines are `Ok(None)`; lines that carry a known
    /// marker but not the expected shape are `Malformed`.
    pub fn parse_line(&self, line: &str) -> Result<Option<LogLine>, LogParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (timestamp_ms, body) = match self.timestamp.captures(line) {
            Some(caps) => {
                let field = |i: usize| caps.get(i).map_or("", |m| m.as_str());
                (
                    parse_timestamp(field(1), field(2), field(3), field(4)),
                    caps.get(5).map_or("", |m| m.as_str()),
                )
            }
            None => (None, line),
        };

        let Some(event) = self.parse_body(body)? else {
            return Ok(None);
        };
        Ok(Some(LogLine {
            timestamp_ms,
            event,
        }))
    }

    fn parse_body(&self, body: &str) -> Result<Option<LogEvent>, LogParseError> {
        let malformed = |kind: &'static str| LogParseError::Malformed {
            kind,
            line: body.to_string(),
        };
        let capture = |re: &Regex, i: usize| {
            re.captures(body)
                .and_then(|c| c.get(i).map(|m| m.as_str().to_string()))
        };

        if let Some(caps) = self.draft_mode.captures(body) {
            return Ok(match caps.get(1).map(|m| m.as_str()) {
                Some("DRAFTING") => Some(LogEvent::DraftStarted),
                Some("ACTIVE_DRAFT_DECK") => Some(LogEvent::DraftCompleted),
                _ => None,
            });
        }

        if body.contains("OnChoiceShown") {
            let caps = self
                .choice_shown
                .captures(body)
                .ok_or_else(|| malformed("choice shown"))?;
            let card_id = caps.get(2).map(|m| m.as_str().to_string());
            let name = caps.get(1).map(|m| m.as_str().trim().to_string());
            return match card_id {
                Some(card_id) => Ok(Some(LogEvent::CardShown { card_id, name })),
                None => Err(malformed("choice shown")),
            };
        }

        if body.contains("Client chooses:") {
            let card_id =
                capture(&self.client_chooses, 2).ok_or_else(|| malformed("client chooses"))?;
            return Ok(Some(LogEvent::CardChosen { card_id }));
        }

        if body.contains("DraftManager.OnChosen()") {
            let card_id = capture(&self.hero_chosen, 1).ok_or_else(|| malformed("hero chosen"))?;
            return Ok(Some(LogEvent::CardChosen { card_id }));
        }

        if body.contains("Hero Card =") {
            let card_id = capture(&self.hero_marker, 1).ok_or_else(|| malformed("hero card"))?;
            return Ok(Some(LogEvent::HeroMarker { card_id }));
        }

        if body.contains("Draft deck contains card") {
            let card_id = capture(&self.deck_card, 1).ok_or_else(|| malformed("deck card"))?;
            return Ok(Some(LogEvent::DeckCard { card_id }));
        }

        if self.create_game.is_match(body) {
            return Ok(Some(LogEvent::MatchStarted));
        }

        Ok(None)
    }
}

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Puts log time-of-day stamps and local arrival times on one monotonic millisecond
/// clock. A stamp more than half a day behind the previous one is taken as the next
/// day. A line without a stamp is placed after the last stamped line by the arrival
/// time elapsed since that line.
#[derive(Debug, Clone, Default)]
pub struct LogClock {
    day_offset: u64,
    last_stamp: Option<u64>,
    /// Clock value and arrival time of the last stamped line.
    anchor: Option<(u64, u64)>,
}

impl LogClock {
    pub fn resolve(&mut self, stamp: Option<u64>, arrival_ms: u64) -> u64 {
        let Some(stamp) = stamp else {
            return match self.anchor {
                Some((at, arrived)) => at + arrival_ms.saturating_sub(arrived),
                None => arrival_ms,
            };
        };
        if self.last_stamp.is_some_and(|last| stamp + DAY_MS / 2 < last) {
            debug!("Log clock passed midnight");
            self.day_offset += DAY_MS;
        }
        self.last_stamp = Some(stamp);
        let at = self.day_offset + stamp;
        self.anchor = Some((at, arrival_ms));
        at
    }
}

/// `HH:MM:SS.fffffff` to milliseconds since midnight.
fn parse_timestamp(h: &str, m: &str, s: &str, frac: &str) -> Option<u64> {
    let h: u64 = h.parse().ok()?;
    let m: u64 = m.parse().ok()?;
    let s: u64 = s.parse().ok()?;
    if h > 23 || m > 59 || s > 59 {
        return None;
    }
    let millis: String = frac.chars().chain("000".chars()).take(3).collect();
    let ms: u64 = millis.parse().ok()?;
    Some(((h * 60 + m) * 60 + s) * 1000 + ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_wraps_at_midnight() {
        let mut clock = LogClock::default();
        let late = parse_timestamp("23", "59", "59", "5").unwrap();
        let early = parse_timestamp("00", "00", "00", "2").unwrap();
        assert_eq!(clock.resolve(Some(late), 0), late);
        assert_eq!(clock.resolve(Some(early), 0), DAY_MS + early);
        assert_eq!(clock.resolve(Some(early + 100), 0), DAY_MS + early + 100);
        // small reordering is not a new day
        assert_eq!(clock.resolve(Some(early + 50), 0), DAY_MS + early + 50);
    }

    #[test]
    fn test_clock_carries_untimestamped_lines() {
        let mut clock = LogClock::default();
        assert_eq!(clock.resolve(None, 40), 40);
        assert_eq!(clock.resolve(Some(5_000_000), 100), 5_000_000);
        assert_eq!(clock.resolve(None, 350), 5_000_250);
        assert_eq!(clock.resolve(None, 50), 5_000_000);
    }

    fn parse(line: &str) -> Option<LogLine> {
        LogParser::new().unwrap().parse_line(line).unwrap()
    }

    fn event(line: &str) -> Option<LogEvent> {
        parse(line).map(|l| l.event)
    }

    #[test]
    fn test_draft_mode() {
        assert_eq!(
            event("D 20:11:02.1234567 SetDraftMode - DRAFTING"),
            Some(LogEvent::DraftStarted)
        );
        assert_eq!(
            event("SetDraftMode - ACTIVE_DRAFT_DECK"),
            Some(LogEvent::DraftCompleted)
        );
        assert_eq!(event("SetDraftMode - IN_REWARDS"), None);
    }

    #[test]
    fn test_timestamp_prefix() {
        let line = parse("D 01:02:03.4567890 Hero Card = HERO_08").unwrap();
        assert_eq!(line.timestamp_ms, Some(3_723_456));
        assert_eq!(
            line.event,
            LogEvent::HeroMarker {
                card_id: "HERO_08".to_string()
            }
        );
        assert_eq!(parse("Hero Card = HERO_08").unwrap().timestamp_ms, None);
        assert_eq!(parse("D 01:02:03.5 Hero Card = HERO_08").unwrap().timestamp_ms, Some(3_723_500));
    }

    #[test]
    fn test_choice_shown() {
        assert_eq!(
            event("D 20:11:05.0000000 DraftManager.OnChoiceShown - Choice: Ragnaros the Firelord (EX1_298)"),
            Some(LogEvent::CardShown {
                card_id: "EX1_298".to_string(),
                name: Some("Ragnaros the Firelord".to_string())
            })
        );
        // names may contain parentheses of their own
        assert_eq!(
            event("DraftManager.OnChoiceShown - Choice: Mind Control (Tech) (CS1_113)"),
            Some(LogEvent::CardShown {
                card_id: "CS1_113".to_string(),
                name: Some("Mind Control (Tech)".to_string())
            })
        );
    }

    #[test]
    fn test_chosen_variants() {
        assert_eq!(
            event("Client chooses: Fireball (CS2_029)"),
            Some(LogEvent::CardChosen {
                card_id: "CS2_029".to_string()
            })
        );
        assert_eq!(
            event("DraftManager.OnChosen(): hero=HERO_02"),
            Some(LogEvent::CardChosen {
                card_id: "HERO_02".to_string()
            })
        );
    }

    #[test]
    fn test_deck_and_match() {
        assert_eq!(
            event("Draft deck contains card NEW1_021"),
            Some(LogEvent::DeckCard {
                card_id: "NEW1_021".to_string()
            })
        );
        assert_eq!(
            event("D 21:00:00.0000000 GameState.DebugPrintPower() - CREATE_GAME"),
            Some(LogEvent::MatchStarted)
        );
    }

    #[test]
    fn test_unrelated_lines() {
        assert_eq!(event(""), None);
        assert_eq!(event("D 20:11:02.1234567 LoadingScreen.OnScenePreUnload()"), None);
    }

    #[test]
    fn test_malformed_marker() {
        let parser = LogParser::new().unwrap();
        assert!(matches!(
            parser.parse_line("DraftManager.OnChoiceShown - Choice: Fireball"),
            Err(LogParseError::Malformed { .. })
        ));
        assert!(matches!(
            parser.parse_line("Hero Card = "),
            Err(LogParseError::Malformed { .. })
        ));
    }
}
