//! Per-entity extract/transform/load units over the source gateway and
//! the relational sink.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use pitwall_core::{Record, SqlValue};
use pitwall_store::{Sink, SourceError, SourceGateway, StoreError};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "pitwall-loaders";

/// A record the transform step refuses to normalize. Always names the
/// offending record; malformed input is never silently dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{entity}: malformed record ({record}): {detail}")]
pub struct TransformError {
    pub entity: &'static str,
    pub record: String,
    pub detail: String,
}

impl TransformError {
    fn new(entity: &'static str, record: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            entity,
            record: record.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One entity's ETL unit. `extract` delegates to the gateway (which owns
/// the retry budget), `transform` is pure, `load` upserts by the entity's
/// natural key so re-runs never duplicate rows.
#[async_trait]
pub trait Loader: Send + Sync {
    fn entity(&self) -> &'static str;
    fn table(&self) -> &'static str;
    fn conflict_key(&self) -> &'static [&'static str];

    async fn extract(
        &self,
        gateway: &dyn SourceGateway,
        year: i32,
        round: Option<i32>,
    ) -> Result<JsonValue, LoadError> {
        Ok(gateway.fetch(self.entity(), year, round).await?)
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError>;

    async fn load(&self, sink: &dyn Sink, records: &[Record]) -> Result<u64, LoadError> {
        Ok(sink
            .upsert(self.table(), self.conflict_key(), records)
            .await?)
    }
}

/// Lookup table from entity name to loader implementation.
pub fn loader_for_entity(entity: &str) -> Option<Box<dyn Loader>> {
    match entity {
        "circuit" => Some(Box::new(CircuitLoader)),
        "season" => Some(Box::new(SeasonLoader)),
        "team" => Some(Box::new(TeamLoader)),
        "driver" => Some(Box::new(DriverLoader)),
        "round" => Some(Box::new(RoundLoader)),
        "session" => Some(Box::new(SessionLoader)),
        "team_driver" => Some(Box::new(TeamDriverLoader)),
        "sprint_result" => Some(Box::new(SprintResultLoader)),
        "qualifying_result" => Some(Box::new(QualifyingResultLoader)),
        "race_result" => Some(Box::new(RaceResultLoader)),
        "driver_championship" => Some(Box::new(DriverChampionshipLoader)),
        "team_championship" => Some(Box::new(TeamChampionshipLoader)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Payload navigation helpers. The API encodes numbers as JSON strings.
// ---------------------------------------------------------------------------

fn require_str<'a>(
    entity: &'static str,
    record: &str,
    value: &'a JsonValue,
    key: &str,
) -> Result<&'a str, TransformError> {
    value[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TransformError::new(entity, record, format!("missing field {key}")))
}

fn require_int(
    entity: &'static str,
    record: &str,
    value: &JsonValue,
    key: &str,
) -> Result<i64, TransformError> {
    let text = require_str(entity, record, value, key)?;
    text.parse::<i64>()
        .map_err(|_| TransformError::new(entity, record, format!("field {key} is not an integer: {text}")))
}

fn opt_str(value: &JsonValue, key: &str) -> SqlValue {
    match value[key].as_str().filter(|s| !s.is_empty()) {
        Some(s) => SqlValue::Text(s.to_string()),
        None => SqlValue::Null,
    }
}

fn opt_int(value: &JsonValue, key: &str) -> SqlValue {
    match value[key].as_str().and_then(|s| s.parse::<i64>().ok()) {
        Some(n) => SqlValue::Int(n),
        None => SqlValue::Null,
    }
}

fn opt_float(value: &JsonValue, key: &str) -> SqlValue {
    match value[key].as_str().and_then(|s| s.parse::<f64>().ok()) {
        Some(n) => SqlValue::Float(n),
        None => SqlValue::Null,
    }
}

fn opt_date(value: &JsonValue, key: &str) -> SqlValue {
    match value[key]
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    {
        Some(date) => SqlValue::Date(date),
        None => SqlValue::Null,
    }
}

/// Combine the API's separate date and time fields into one UTC instant.
/// A missing time falls back to midnight so the calendar stays usable.
fn event_start(value: &JsonValue) -> Option<DateTime<Utc>> {
    let date = value["date"].as_str()?;
    let time = value["time"].as_str().unwrap_or("00:00:00Z");
    let stamped = format!("{date}T{time}");
    DateTime::parse_from_rfc3339(&stamped)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalize an `M:SS.mmm` lap time to whole milliseconds.
pub fn lap_time_to_ms(time: &str) -> Option<i64> {
    let (minutes, seconds) = time.split_once(':')?;
    let minutes = minutes.parse::<i64>().ok()?;
    let seconds = seconds.parse::<f64>().ok()?;
    Some(((minutes * 60) as f64 * 1000.0 + seconds * 1000.0).round() as i64)
}

fn opt_lap_time(value: &JsonValue, key: &str) -> SqlValue {
    match value[key].as_str().and_then(lap_time_to_ms) {
        Some(ms) => SqlValue::Int(ms),
        None => SqlValue::Null,
    }
}

fn races(raw: &JsonValue) -> &[JsonValue] {
    raw["MRData"]["RaceTable"]["Races"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn standings_list(raw: &JsonValue) -> Option<&JsonValue> {
    raw["MRData"]["StandingsTable"]["StandingsLists"]
        .as_array()
        .and_then(|lists| lists.first())
}

fn race_window(
    entity: &'static str,
    race: &JsonValue,
) -> Result<(i64, i64), TransformError> {
    let season = require_int(entity, "race header", race, "season")?;
    let round = require_int(entity, "race header", race, "round")?;
    Ok((season, round))
}

// ---------------------------------------------------------------------------
// Seasonal reference loaders
// ---------------------------------------------------------------------------

pub struct CircuitLoader;

#[async_trait]
impl Loader for CircuitLoader {
    fn entity(&self) -> &'static str {
        "circuit"
    }

    fn table(&self) -> &'static str {
        "circuit"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["reference"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let circuits = raw["MRData"]["CircuitTable"]["Circuits"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(circuits.len());
        for (index, circuit) in circuits.iter().enumerate() {
            let record_id = format!("circuit at index {index}");
            let reference = require_str(self.entity(), &record_id, circuit, "circuitId")?;
            let location = &circuit["Location"];
            records.push(
                Record::new()
                    .set("reference", SqlValue::Text(reference.to_string()))
                    .set("name", opt_str(circuit, "circuitName"))
                    .set("locality", opt_str(location, "locality"))
                    .set("country", opt_str(location, "country"))
                    .set("latitude", opt_float(location, "lat"))
                    .set("longitude", opt_float(location, "long")),
            );
        }
        Ok(records)
    }
}

pub struct SeasonLoader;

#[async_trait]
impl Loader for SeasonLoader {
    fn entity(&self) -> &'static str {
        "season"
    }

    fn table(&self) -> &'static str {
        "season"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["year"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let seasons = raw["MRData"]["SeasonTable"]["Seasons"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(seasons.len());
        for (index, season) in seasons.iter().enumerate() {
            let record_id = format!("season at index {index}");
            let year = require_int(self.entity(), &record_id, season, "season")?;
            records.push(Record::new().set("year", SqlValue::Int(year)));
        }
        Ok(records)
    }
}

pub struct TeamLoader;

#[async_trait]
impl Loader for TeamLoader {
    fn entity(&self) -> &'static str {
        "team"
    }

    fn table(&self) -> &'static str {
        "team"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["reference"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let constructors = raw["MRData"]["ConstructorTable"]["Constructors"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(constructors.len());
        for (index, constructor) in constructors.iter().enumerate() {
            let record_id = format!("constructor at index {index}");
            let reference = require_str(self.entity(), &record_id, constructor, "constructorId")?;
            records.push(
                Record::new()
                    .set("reference", SqlValue::Text(reference.to_string()))
                    .set("name", opt_str(constructor, "name"))
                    .set("nationality", opt_str(constructor, "nationality")),
            );
        }
        Ok(records)
    }
}

pub struct DriverLoader;

#[async_trait]
impl Loader for DriverLoader {
    fn entity(&self) -> &'static str {
        "driver"
    }

    fn table(&self) -> &'static str {
        "driver"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["reference"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let drivers = raw["MRData"]["DriverTable"]["Drivers"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(drivers.len());
        for (index, driver) in drivers.iter().enumerate() {
            let record_id = format!("driver at index {index}");
            let reference = require_str(self.entity(), &record_id, driver, "driverId")?;
            records.push(
                Record::new()
                    .set("reference", SqlValue::Text(reference.to_string()))
                    .set("code", opt_str(driver, "code"))
                    .set("permanent_number", opt_int(driver, "permanentNumber"))
                    .set("given_name", opt_str(driver, "givenName"))
                    .set("family_name", opt_str(driver, "familyName"))
                    .set("date_of_birth", opt_date(driver, "dateOfBirth"))
                    .set("nationality", opt_str(driver, "nationality")),
            );
        }
        Ok(records)
    }
}

pub struct RoundLoader;

#[async_trait]
impl Loader for RoundLoader {
    fn entity(&self) -> &'static str {
        "round"
    }

    fn table(&self) -> &'static str {
        "round"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "number"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let mut records = Vec::new();
        for race in races(raw) {
            let (season, round) = race_window(self.entity(), race)?;
            let record_id = format!("round {round} of {season}");
            let circuit_ref = require_str(self.entity(), &record_id, &race["Circuit"], "circuitId")?;
            let race_start = match event_start(race) {
                Some(start) => SqlValue::Timestamp(start),
                None => SqlValue::Null,
            };
            records.push(
                Record::new()
                    .set("season_year", SqlValue::Int(season))
                    .set("number", SqlValue::Int(round))
                    .set("name", opt_str(race, "raceName"))
                    .set("circuit_ref", SqlValue::Text(circuit_ref.to_string()))
                    .set("date", opt_date(race, "date"))
                    .set("race_start", race_start),
            );
        }
        Ok(records)
    }
}

/// Weekend session blocks in the order they appear on track.
const SESSION_BLOCKS: &[(&str, &str)] = &[
    ("FirstPractice", "P1"),
    ("SecondPractice", "P2"),
    ("ThirdPractice", "P3"),
    ("SprintQualifying", "SQ"),
    ("Sprint", "S"),
    ("Qualifying", "Q"),
];

pub struct SessionLoader;

#[async_trait]
impl Loader for SessionLoader {
    fn entity(&self) -> &'static str {
        "session"
    }

    fn table(&self) -> &'static str {
        "session"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "round_number", "number"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let mut records = Vec::new();
        for race in races(raw) {
            let (season, round) = race_window(self.entity(), race)?;
            let mut number = 0i64;

            let mut push_session = |kind: &str, start: Option<DateTime<Utc>>| {
                number += 1;
                records.push(
                    Record::new()
                        .set("season_year", SqlValue::Int(season))
                        .set("round_number", SqlValue::Int(round))
                        .set("number", SqlValue::Int(number))
                        .set("type", SqlValue::Text(kind.to_string()))
                        .set(
                            "scheduled_start",
                            match start {
                                Some(start) => SqlValue::Timestamp(start),
                                None => SqlValue::Null,
                            },
                        ),
                );
            };

            for &(key, kind) in SESSION_BLOCKS {
                if !race[key].is_null() {
                    push_session(kind, event_start(&race[key]));
                }
            }
            // The grand prix itself is scheduled on the race object.
            push_session("R", event_start(race));
        }
        Ok(records)
    }
}

pub struct TeamDriverLoader;

#[async_trait]
impl Loader for TeamDriverLoader {
    fn entity(&self) -> &'static str {
        "team_driver"
    }

    fn table(&self) -> &'static str {
        "team_driver"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "team_ref", "driver_ref"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let Some(list) = standings_list(raw) else {
            return Ok(Vec::new());
        };
        let season = require_int(self.entity(), "standings header", list, "season")?;
        let standings = list["DriverStandings"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::new();
        for (index, standing) in standings.iter().enumerate() {
            let record_id = format!("standing at index {index}");
            let driver_ref =
                require_str(self.entity(), &record_id, &standing["Driver"], "driverId")?;
            let constructors = standing["Constructors"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for constructor in constructors {
                let team_ref =
                    require_str(self.entity(), &record_id, constructor, "constructorId")?;
                records.push(
                    Record::new()
                        .set("season_year", SqlValue::Int(season))
                        .set("team_ref", SqlValue::Text(team_ref.to_string()))
                        .set("driver_ref", SqlValue::Text(driver_ref.to_string())),
                );
            }
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Incremental result loaders
// ---------------------------------------------------------------------------

/// Sprint and race classifications share a payload shape; only the
/// results key differs.
fn classification_records(
    entity: &'static str,
    raw: &JsonValue,
    results_key: &str,
) -> Result<Vec<Record>, TransformError> {
    let Some(race) = races(raw).first() else {
        return Ok(Vec::new());
    };
    let (season, round) = race_window(entity, race)?;
    let results = race[results_key]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut records = Vec::with_capacity(results.len());
    for (index, result) in results.iter().enumerate() {
        let record_id = format!("result at index {index} of round {round}");
        let driver_ref = require_str(entity, &record_id, &result["Driver"], "driverId")?;
        let team_ref = require_str(entity, &record_id, &result["Constructor"], "constructorId")?;
        let position = require_int(entity, &record_id, result, "position")?;
        let finish_time_ms = match result["Time"]["millis"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
        {
            Some(ms) => SqlValue::Int(ms),
            None => SqlValue::Null,
        };
        records.push(
            Record::new()
                .set("season_year", SqlValue::Int(season))
                .set("round_number", SqlValue::Int(round))
                .set("driver_ref", SqlValue::Text(driver_ref.to_string()))
                .set("team_ref", SqlValue::Text(team_ref.to_string()))
                .set("position", SqlValue::Int(position))
                .set("grid", opt_int(result, "grid"))
                .set("laps", opt_int(result, "laps"))
                .set("points", opt_float(result, "points"))
                .set("status", opt_str(result, "status"))
                .set("finish_time_ms", finish_time_ms),
        );
    }
    Ok(records)
}

pub struct RaceResultLoader;

#[async_trait]
impl Loader for RaceResultLoader {
    fn entity(&self) -> &'static str {
        "race_result"
    }

    fn table(&self) -> &'static str {
        "race_result"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "round_number", "driver_ref"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        classification_records(self.entity(), raw, "Results")
    }
}

pub struct SprintResultLoader;

#[async_trait]
impl Loader for SprintResultLoader {
    fn entity(&self) -> &'static str {
        "sprint_result"
    }

    fn table(&self) -> &'static str {
        "sprint_result"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "round_number", "driver_ref"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        classification_records(self.entity(), raw, "SprintResults")
    }
}

pub struct QualifyingResultLoader;

#[async_trait]
impl Loader for QualifyingResultLoader {
    fn entity(&self) -> &'static str {
        "qualifying_result"
    }

    fn table(&self) -> &'static str {
        "qualifying_result"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "round_number", "driver_ref"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let Some(race) = races(raw).first() else {
            return Ok(Vec::new());
        };
        let (season, round) = race_window(self.entity(), race)?;
        let results = race["QualifyingResults"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(results.len());
        for (index, result) in results.iter().enumerate() {
            let record_id = format!("qualifying result at index {index} of round {round}");
            let driver_ref = require_str(self.entity(), &record_id, &result["Driver"], "driverId")?;
            let team_ref =
                require_str(self.entity(), &record_id, &result["Constructor"], "constructorId")?;
            let position = require_int(self.entity(), &record_id, result, "position")?;
            records.push(
                Record::new()
                    .set("season_year", SqlValue::Int(season))
                    .set("round_number", SqlValue::Int(round))
                    .set("driver_ref", SqlValue::Text(driver_ref.to_string()))
                    .set("team_ref", SqlValue::Text(team_ref.to_string()))
                    .set("position", SqlValue::Int(position))
                    .set("q1_ms", opt_lap_time(result, "Q1"))
                    .set("q2_ms", opt_lap_time(result, "Q2"))
                    .set("q3_ms", opt_lap_time(result, "Q3")),
            );
        }
        Ok(records)
    }
}

pub struct DriverChampionshipLoader;

#[async_trait]
impl Loader for DriverChampionshipLoader {
    fn entity(&self) -> &'static str {
        "driver_championship"
    }

    fn table(&self) -> &'static str {
        "driver_championship"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "round_number", "driver_ref"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let Some(list) = standings_list(raw) else {
            return Ok(Vec::new());
        };
        let season = require_int(self.entity(), "standings header", list, "season")?;
        let round = require_int(self.entity(), "standings header", list, "round")?;
        let standings = list["DriverStandings"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(standings.len());
        for (index, standing) in standings.iter().enumerate() {
            let record_id = format!("driver standing at index {index} of round {round}");
            let driver_ref =
                require_str(self.entity(), &record_id, &standing["Driver"], "driverId")?;
            records.push(
                Record::new()
                    .set("season_year", SqlValue::Int(season))
                    .set("round_number", SqlValue::Int(round))
                    .set("driver_ref", SqlValue::Text(driver_ref.to_string()))
                    .set("position", opt_int(standing, "position"))
                    .set("points", opt_float(standing, "points"))
                    .set("wins", opt_int(standing, "wins")),
            );
        }
        Ok(records)
    }
}

pub struct TeamChampionshipLoader;

#[async_trait]
impl Loader for TeamChampionshipLoader {
    fn entity(&self) -> &'static str {
        "team_championship"
    }

    fn table(&self) -> &'static str {
        "team_championship"
    }

    fn conflict_key(&self) -> &'static [&'static str] {
        &["season_year", "round_number", "team_ref"]
    }

    fn transform(&self, raw: &JsonValue) -> Result<Vec<Record>, TransformError> {
        let Some(list) = standings_list(raw) else {
            return Ok(Vec::new());
        };
        let season = require_int(self.entity(), "standings header", list, "season")?;
        let round = require_int(self.entity(), "standings header", list, "round")?;
        let standings = list["ConstructorStandings"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut records = Vec::with_capacity(standings.len());
        for (index, standing) in standings.iter().enumerate() {
            let record_id = format!("constructor standing at index {index} of round {round}");
            let team_ref =
                require_str(self.entity(), &record_id, &standing["Constructor"], "constructorId")?;
            records.push(
                Record::new()
                    .set("season_year", SqlValue::Int(season))
                    .set("round_number", SqlValue::Int(round))
                    .set("team_ref", SqlValue::Text(team_ref.to_string()))
                    .set("position", opt_int(standing, "position"))
                    .set("points", opt_float(standing, "points"))
                    .set("wins", opt_int(standing, "wins")),
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_core::Registry;
    use serde_json::json;

    #[test]
    fn every_registry_entity_has_a_loader() {
        let registry = Registry::builtin().expect("builtin registry");
        for entity in registry.entities() {
            let loader = loader_for_entity(entity.name)
                .unwrap_or_else(|| panic!("no loader for {}", entity.name));
            assert_eq!(loader.entity(), entity.name);
            assert_eq!(loader.table(), entity.table);
            assert_eq!(loader.conflict_key(), entity.conflict_key);
        }
        assert!(loader_for_entity("pit_stop").is_none());
    }

    #[test]
    fn race_results_normalize_into_keyed_records() {
        let payload = json!({ "MRData": { "RaceTable": { "Races": [{
            "season": "2024", "round": "3",
            "Results": [
                {
                    "position": "1", "points": "25", "grid": "1", "laps": "58",
                    "status": "Finished",
                    "Driver": { "driverId": "max_verstappen" },
                    "Constructor": { "constructorId": "red_bull" },
                    "Time": { "millis": "5412736" }
                },
                {
                    "position": "2", "points": "18", "grid": "4", "laps": "58",
                    "status": "Finished",
                    "Driver": { "driverId": "sainz" },
                    "Constructor": { "constructorId": "ferrari" }
                }
            ]
        }]}}});

        let records = RaceResultLoader.transform(&payload).expect("transform");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.get("season_year"), Some(&SqlValue::Int(2024)));
        assert_eq!(first.get("round_number"), Some(&SqlValue::Int(3)));
        assert_eq!(
            first.get("driver_ref"),
            Some(&SqlValue::Text("max_verstappen".into()))
        );
        assert_eq!(first.get("finish_time_ms"), Some(&SqlValue::Int(5_412_736)));
        assert_eq!(records[1].get("finish_time_ms"), Some(&SqlValue::Null));
    }

    #[test]
    fn malformed_result_names_the_offending_record() {
        let payload = json!({ "MRData": { "RaceTable": { "Races": [{
            "season": "2024", "round": "3",
            "Results": [{
                "position": "1",
                "Driver": {},
                "Constructor": { "constructorId": "red_bull" }
            }]
        }]}}});

        let err = RaceResultLoader.transform(&payload).unwrap_err();
        assert_eq!(err.entity, "race_result");
        assert!(err.record.contains("index 0"));
        assert!(err.detail.contains("driverId"));
    }

    #[test]
    fn empty_window_transforms_to_zero_records() {
        let payload = json!({ "MRData": { "total": "0", "RaceTable": { "Races": [] } } });
        assert!(RaceResultLoader.transform(&payload).expect("transform").is_empty());
        assert!(QualifyingResultLoader.transform(&payload).expect("transform").is_empty());
        assert!(DriverChampionshipLoader.transform(&payload).expect("transform").is_empty());
    }

    #[test]
    fn qualifying_times_convert_to_milliseconds() {
        let payload = json!({ "MRData": { "RaceTable": { "Races": [{
            "season": "2024", "round": "5",
            "QualifyingResults": [{
                "position": "1",
                "Driver": { "driverId": "leclerc" },
                "Constructor": { "constructorId": "ferrari" },
                "Q1": "1:27.805", "Q2": "1:27.093"
            }]
        }]}}});

        let records = QualifyingResultLoader.transform(&payload).expect("transform");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("q1_ms"), Some(&SqlValue::Int(87_805)));
        assert_eq!(records[0].get("q2_ms"), Some(&SqlValue::Int(87_093)));
        assert_eq!(records[0].get("q3_ms"), Some(&SqlValue::Null));
    }

    #[test]
    fn lap_time_conversion_handles_edge_cases() {
        assert_eq!(lap_time_to_ms("1:23.456"), Some(83_456));
        assert_eq!(lap_time_to_ms("0:59.999"), Some(59_999));
        assert_eq!(lap_time_to_ms("not a time"), None);
        assert_eq!(lap_time_to_ms(""), None);
    }

    #[test]
    fn sessions_derive_from_the_weekend_schedule() {
        let payload = json!({ "MRData": { "RaceTable": { "Races": [{
            "season": "2024", "round": "1", "raceName": "Bahrain Grand Prix",
            "date": "2024-03-02", "time": "15:00:00Z",
            "Circuit": { "circuitId": "bahrain" },
            "FirstPractice": { "date": "2024-02-29", "time": "11:30:00Z" },
            "Qualifying": { "date": "2024-03-01", "time": "16:00:00Z" }
        }]}}});

        let records = SessionLoader.transform(&payload).expect("transform");
        let kinds: Vec<_> = records
            .iter()
            .map(|r| r.get("type").cloned().expect("type column"))
            .collect();
        assert_eq!(
            kinds,
            vec![
                SqlValue::Text("P1".into()),
                SqlValue::Text("Q".into()),
                SqlValue::Text("R".into()),
            ]
        );
        assert_eq!(records[0].get("number"), Some(&SqlValue::Int(1)));
        assert_eq!(records[2].get("number"), Some(&SqlValue::Int(3)));
    }

    #[test]
    fn team_driver_pairings_expand_per_constructor() {
        let payload = json!({ "MRData": { "StandingsTable": { "StandingsLists": [{
            "season": "2024", "round": "10",
            "DriverStandings": [{
                "position": "7",
                "points": "45",
                "wins": "0",
                "Driver": { "driverId": "hulkenberg" },
                "Constructors": [
                    { "constructorId": "haas" },
                    { "constructorId": "sauber" }
                ]
            }]
        }]}}});

        let records = TeamDriverLoader.transform(&payload).expect("transform");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("team_ref"), Some(&SqlValue::Text("haas".into())));
        assert_eq!(records[1].get("team_ref"), Some(&SqlValue::Text("sauber".into())));
    }

    #[test]
    fn round_calendar_parses_dates_and_start_instants() {
        let payload = json!({ "MRData": { "RaceTable": { "Races": [{
            "season": "2024", "round": "1", "raceName": "Bahrain Grand Prix",
            "date": "2024-03-02", "time": "15:00:00Z",
            "Circuit": { "circuitId": "bahrain" }
        }]}}});

        let records = RoundLoader.transform(&payload).expect("transform");
        assert_eq!(records.len(), 1);
        match records[0].get("race_start") {
            Some(SqlValue::Timestamp(start)) => {
                assert_eq!(start.to_rfc3339(), "2024-03-02T15:00:00+00:00");
            }
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    struct CountingSink;

    #[async_trait]
    impl Sink for CountingSink {
        async fn upsert(
            &self,
            _table: &str,
            _conflict_key: &[&str],
            rows: &[Record],
        ) -> Result<u64, StoreError> {
            Ok(rows.len() as u64)
        }
    }

    #[tokio::test]
    async fn load_reports_the_sink_row_count() {
        let records = vec![
            Record::new().set("year", SqlValue::Int(2023)),
            Record::new().set("year", SqlValue::Int(2024)),
        ];
        let written = SeasonLoader
            .load(&CountingSink, &records)
            .await
            .expect("load");
        assert_eq!(written, 2);
    }
}
