//! Session discovery and lap loading.
//!
//! [`SessionProvider`] is the seam to whatever timing archive supplies lap
//! rows. [`FileSessionProvider`] reads a directory laid out as
//! `<root>/<year>/schedule.json` plus one `<round:02>_<CODE>.json` per session.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Lap, PaceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    Race,
    Qualifying,
    Sprint,
    Practice1,
    Practice2,
    Practice3,
}

impl SessionKind {
    pub fn code(&self) -> &'static str {
        match self {
            SessionKind::Race => "R",
            SessionKind::Qualifying => "Q",
            SessionKind::Sprint => "S",
            SessionKind::Practice1 => "FP1",
            SessionKind::Practice2 => "FP2",
            SessionKind::Practice3 => "FP3",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionKind::Race => "Race",
            SessionKind::Qualifying => "Qualifying",
            SessionKind::Sprint => "Sprint",
            SessionKind::Practice1 => "Practice 1",
            SessionKind::Practice2 => "Practice 2",
            SessionKind::Practice3 => "Practice 3",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SessionKind {
    type Err = PaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R" | "RACE" => Ok(SessionKind::Race),
            "Q" | "QUALIFYING" => Ok(SessionKind::Qualifying),
            "S" | "SPRINT" => Ok(SessionKind::Sprint),
            "FP1" => Ok(SessionKind::Practice1),
            "FP2" => Ok(SessionKind::Practice2),
            "FP3" => Ok(SessionKind::Practice3),
            other => Err(PaceError::InvalidParameter(format!(
                "unknown session '{}': expected R, Q, S, FP1, FP2 or FP3",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventSelector {
    Round(u32),
    Name(String),
}

impl EventSelector {
    /// Numeric tokens select by round, anything else by event name.
    pub fn parse(token: &str) -> Self {
        match token.trim().parse::<u32>() {
            Ok(round) => EventSelector::Round(round),
            Err(_) => EventSelector::Name(token.trim().to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRef {
    pub year: i32,
    pub event: EventSelector,
    pub session: SessionKind,
}

/// One entry of a season schedule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventInfo {
    pub round: u32,
    pub name: String,
    pub country: String,
    pub date: NaiveDate,
}

/// Descriptive data for titling and file naming; not used by the analysis.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMetadata {
    pub name: String,
    pub date: NaiveDate,
    pub country: String,
    pub round: u32,
    pub session: SessionKind,
}

impl EventMetadata {
    pub fn from_event(event: &EventInfo, session: SessionKind) -> Self {
        Self {
            name: event.name.clone(),
            date: event.date,
            country: event.country.clone(),
            round: event.round,
            session,
        }
    }

    /// `{year}-{country}-{session}`, e.g. `2022-Bahrain-Race`.
    pub fn file_stem(&self) -> String {
        format!(
            "{}-{}-{}",
            self.date.format("%Y"),
            self.country,
            self.session.name()
        )
    }
}

/// Everything loaded for one session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    pub laps: Vec<Lap>,
    /// Driver abbreviations in finishing (or entry) order.
    pub classification: Vec<String>,
}

pub trait SessionProvider {
    fn schedule(&self, year: i32) -> Result<Vec<EventInfo>, PaceError>;

    fn load_session(&self, session: &SessionRef) -> Result<SessionData, PaceError>;

    /// Fails with [`PaceError::SessionUnavailable`] when no lap was recorded.
    fn load_laps(&self, session: &SessionRef) -> Result<Vec<Lap>, PaceError> {
        let data = self.load_session(session)?;
        if data.laps.is_empty() {
            return Err(PaceError::SessionUnavailable(format!(
                "{} {:?} {} has no recorded laps",
                session.year, session.event, session.session
            )));
        }
        Ok(data.laps)
    }

    fn classification(&self, session: &SessionRef) -> Result<Vec<String>, PaceError> {
        Ok(self.load_session(session)?.classification)
    }

    fn event_metadata(&self, session: &SessionRef) -> Result<EventMetadata, PaceError> {
        let schedule = self.schedule(session.year)?;
        let event = select_event(&schedule, &session.event)?;
        Ok(EventMetadata::from_event(event, session.session))
    }
}

/// Find an event by round, exact name, name fragment or country (in that order).
pub fn select_event<'a>(
    schedule: &'a [EventInfo],
    selector: &EventSelector,
) -> Result<&'a EventInfo, PaceError> {
    let found = match selector {
        EventSelector::Round(round) => schedule.iter().find(|e| e.round == *round),
        EventSelector::Name(name) => {
            let needle = name.to_lowercase();
            schedule
                .iter()
                .find(|e| e.name.to_lowercase() == needle)
                .or_else(|| {
                    schedule
                        .iter()
                        .find(|e| e.name.to_lowercase().contains(&needle))
                })
                .or_else(|| {
                    schedule
                        .iter()
                        .find(|e| e.country.to_lowercase().contains(&needle))
                })
        }
    };
    found.ok_or_else(|| PaceError::SessionUnavailable(format!("no event matches {:?}", selector)))
}

/// The last event dated before `today`; the season finale once it has passed.
pub fn latest_completed_event(schedule: &[EventInfo], today: NaiveDate) -> Option<&EventInfo> {
    schedule
        .iter()
        .filter(|e| e.date < today)
        .max_by_key(|e| (e.date, e.round))
}

/// Parse a lap duration: plain seconds (`91.234`), clock form (`1:31.234`,
/// `0:01:31.234`) or a timedelta string (`0 days 00:01:31.234000`).
pub fn parse_lap_time(token: &str) -> Option<f64> {
    let trimmed = token.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nat") {
        return None;
    }

    let mut days = 0.0;
    let mut clock = trimmed;
    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 3 && parts[1].starts_with("day") {
        days = parts[0].parse::<f64>().ok()?;
        clock = parts[2];
    }

    let mut seconds = 0.0;
    let mut unit = 1.0;
    for field in clock.rsplit(':') {
        let value: f64 = field.parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        seconds += value * unit;
        unit *= 60.0;
        if unit > 3600.0 * 60.0 {
            return None;
        }
    }
    Some(days * 86_400.0 + seconds)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeValue {
    Seconds(f64),
    Text(String),
}

impl TimeValue {
    fn seconds(&self) -> Option<f64> {
        match self {
            TimeValue::Seconds(v) if v.is_finite() => Some(*v),
            TimeValue::Seconds(_) => None,
            TimeValue::Text(text) => parse_lap_time(text),
        }
    }
}

#[derive(Deserialize)]
struct LapRow {
    driver: String,
    team: String,
    lap_number: u32,
    #[serde(default)]
    lap_time: Option<TimeValue>,
    #[serde(default)]
    pit_in_time: Option<TimeValue>,
    #[serde(default)]
    pit_out_time: Option<TimeValue>,
}

#[derive(Deserialize)]
struct SessionFile {
    #[serde(default)]
    classification: Vec<String>,
    laps: Vec<LapRow>,
}

/// Decode a session JSON document. A lap is pit-affected when it carries
/// either a pit-in or a pit-out time.
pub fn parse_session(bytes: &[u8]) -> Result<SessionData, PaceError> {
    let file: SessionFile =
        serde_json::from_slice(bytes).map_err(|e| PaceError::Parse(e.to_string()))?;
    let laps = file
        .laps
        .into_iter()
        .map(|row| {
            let pit_affected = row.pit_in_time.as_ref().and_then(TimeValue::seconds).is_some()
                || row.pit_out_time.as_ref().and_then(TimeValue::seconds).is_some();
            Lap {
                driver: row.driver.trim().to_ascii_uppercase(),
                team: row.team,
                lap_number: row.lap_number,
                lap_time_s: row.lap_time.as_ref().and_then(TimeValue::seconds),
                pit_affected,
            }
        })
        .collect();
    let classification = file
        .classification
        .into_iter()
        .map(|d| d.trim().to_ascii_uppercase())
        .collect();
    Ok(SessionData {
        laps,
        classification,
    })
}

/// Reads schedules and sessions from a directory tree.
#[derive(Clone, Debug)]
pub struct FileSessionProvider {
    root: PathBuf,
}

impl FileSessionProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn schedule_path(&self, year: i32) -> PathBuf {
        self.root.join(year.to_string()).join("schedule.json")
    }

    pub fn session_path(&self, session: &SessionRef) -> Result<PathBuf, PaceError> {
        let schedule = self.schedule(session.year)?;
        let event = select_event(&schedule, &session.event)?;
        Ok(self.root.join(session.year.to_string()).join(format!(
            "{:02}_{}.json",
            event.round,
            session.session.code()
        )))
    }

    pub fn read_session_file(path: &Path) -> Result<SessionData, PaceError> {
        let bytes = fs::read(path).map_err(|e| {
            PaceError::SessionUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let data = parse_session(&bytes)?;
        debug!(
            path = %path.display(),
            laps = data.laps.len(),
            "loaded session file"
        );
        Ok(data)
    }
}

impl SessionProvider for FileSessionProvider {
    fn schedule(&self, year: i32) -> Result<Vec<EventInfo>, PaceError> {
        let path = self.schedule_path(year);
        let text = fs::read_to_string(&path).map_err(|e| {
            PaceError::SessionUnavailable(format!(
                "no schedule for {} at {}: {}",
                year,
                path.display(),
                e
            ))
        })?;
        let mut events: Vec<EventInfo> =
            serde_json::from_str(&text).map_err(|e| PaceError::Parse(e.to_string()))?;
        events.sort_by_key(|e| e.round);
        Ok(events)
    }

    fn load_session(&self, session: &SessionRef) -> Result<SessionData, PaceError> {
        let path = self.session_path(session)?;
        Self::read_session_file(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule() -> Vec<EventInfo> {
        vec![
            EventInfo {
                round: 1,
                name: "Bahrain Grand Prix".into(),
                country: "Bahrain".into(),
                date: date(2022, 3, 20),
            },
            EventInfo {
                round: 2,
                name: "Saudi Arabian Grand Prix".into(),
                country: "Saudi Arabia".into(),
                date: date(2022, 3, 27),
            },
            EventInfo {
                round: 3,
                name: "Australian Grand Prix".into(),
                country: "Australia".into(),
                date: date(2022, 4, 10),
            },
        ]
    }

    #[test]
    fn lap_time_formats() {
        assert_relative_eq!(parse_lap_time("91.5").unwrap(), 91.5);
        assert_relative_eq!(parse_lap_time("1:31.234").unwrap(), 91.234, epsilon = 1e-9);
        assert_relative_eq!(parse_lap_time("0:01:31.234").unwrap(), 91.234, epsilon = 1e-9);
        assert_relative_eq!(
            parse_lap_time("0 days 00:01:31.234000").unwrap(),
            91.234,
            epsilon = 1e-9
        );
        assert!(parse_lap_time("NaT").is_none());
        assert!(parse_lap_time("fast").is_none());
        assert!(parse_lap_time("").is_none());
    }

    #[test]
    fn session_codes_parse_case_insensitively() {
        assert_eq!("r".parse::<SessionKind>().unwrap(), SessionKind::Race);
        assert_eq!("fp2".parse::<SessionKind>().unwrap(), SessionKind::Practice2);
        assert!("FP4".parse::<SessionKind>().is_err());
    }

    #[test]
    fn event_selection() {
        let events = schedule();
        assert_eq!(select_event(&events, &EventSelector::parse("2")).unwrap().round, 2);
        assert_eq!(
            select_event(&events, &EventSelector::parse("australian"))
                .unwrap()
                .round,
            3
        );
        assert_eq!(
            select_event(&events, &EventSelector::parse("Saudi Arabia"))
                .unwrap()
                .round,
            2
        );
        assert!(matches!(
            select_event(&events, &EventSelector::parse("Monaco")),
            Err(PaceError::SessionUnavailable(_))
        ));
    }

    #[test]
    fn latest_event_before_today() {
        let events = schedule();
        assert_eq!(
            latest_completed_event(&events, date(2022, 4, 1)).unwrap().round,
            2
        );
        assert_eq!(
            latest_completed_event(&events, date(2023, 1, 1)).unwrap().round,
            3
        );
        assert!(latest_completed_event(&events, date(2022, 1, 1)).is_none());
    }

    #[test]
    fn session_file_marks_pit_laps() {
        let json = r#"{
            "classification": ["ver", "LEC"],
            "laps": [
                {"driver": "VER", "team": "Red Bull Racing", "lap_number": 1, "lap_time": "1:39.100", "pit_out_time": null},
                {"driver": "VER", "team": "Red Bull Racing", "lap_number": 2, "lap_time": 97.5, "pit_in_time": "0 days 01:02:03.000000"},
                {"driver": "LEC", "team": "Ferrari", "lap_number": 1, "lap_time": null}
            ]
        }"#;
        let data = parse_session(json.as_bytes()).unwrap();
        assert_eq!(data.classification, vec!["VER", "LEC"]);
        assert!(!data.laps[0].pit_affected);
        assert_relative_eq!(data.laps[0].lap_time_s.unwrap(), 99.1, epsilon = 1e-9);
        assert!(data.laps[1].pit_affected);
        assert_eq!(data.laps[2].lap_time_s, None);
    }

    #[test]
    fn file_provider_round_trip() {
        let dir = TempDir::new().unwrap();
        let season = dir.path().join("2022");
        fs::create_dir_all(&season).unwrap();
        fs::write(
            season.join("schedule.json"),
            serde_json::to_string(&schedule()).unwrap(),
        )
        .unwrap();
        fs::write(
            season.join("01_R.json"),
            r#"{"classification": ["LEC"], "laps": [
                {"driver": "LEC", "team": "Ferrari", "lap_number": 1, "lap_time": 97.0}
            ]}"#,
        )
        .unwrap();
        fs::write(season.join("02_R.json"), r#"{"laps": []}"#).unwrap();

        let provider = FileSessionProvider::new(dir.path());
        let bahrain = SessionRef {
            year: 2022,
            event: EventSelector::Name("Bahrain".into()),
            session: SessionKind::Race,
        };
        assert_eq!(provider.load_laps(&bahrain).unwrap().len(), 1);
        assert_eq!(provider.classification(&bahrain).unwrap(), vec!["LEC"]);
        let meta = provider.event_metadata(&bahrain).unwrap();
        assert_eq!(meta.name, "Bahrain Grand Prix");
        assert_eq!(meta.file_stem(), "2022-Bahrain-Race");

        let jeddah = SessionRef {
            event: EventSelector::Round(2),
            ..bahrain.clone()
        };
        assert!(matches!(
            provider.load_laps(&jeddah),
            Err(PaceError::SessionUnavailable(_))
        ));
        let jeddah_practice = SessionRef {
            session: SessionKind::Practice1,
            ..jeddah.clone()
        };
        assert_eq!(
            provider.event_metadata(&jeddah_practice).unwrap().file_stem(),
            "2022-Saudi Arabia-Practice 1"
        );

        let melbourne = SessionRef {
            event: EventSelector::Round(3),
            ..bahrain.clone()
        };
        assert!(matches!(
            provider.load_laps(&melbourne),
            Err(PaceError::SessionUnavailable(_))
        ));

        let other_year = SessionRef {
            year: 2021,
            ..bahrain
        };
        assert!(matches!(
            provider.load_laps(&other_year),
            Err(PaceError::SessionUnavailable(_))
        ));
    }
}
