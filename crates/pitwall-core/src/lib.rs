//! Core domain model for the pitwall sync engine: entity registry,
//! load strategies, sync state and watermarks.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "pitwall-core";

/// How often an entity needs reloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Loaded once per season, when the calendar is stable.
    Seasonal,
    /// Loaded repeatedly as rounds complete.
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Highest (season, round) an entity has been successfully synced through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub season_year: Option<i32>,
    pub round_number: Option<i32>,
}

impl Watermark {
    /// Advance towards the attempted (year, round). Never regresses: a
    /// forced re-run of an older season leaves the watermark untouched.
    pub fn advanced(self, year: i32, round: Option<i32>) -> Self {
        match self.season_year {
            Some(current) if current > year => self,
            Some(current) if current == year => {
                let round_number = match (self.round_number, round) {
                    (Some(existing), Some(attempted)) => Some(existing.max(attempted)),
                    (existing, attempted) => attempted.or(existing),
                };
                Self {
                    season_year: Some(year),
                    round_number,
                }
            }
            _ => Self {
                season_year: Some(year),
                round_number: round,
            },
        }
    }

    pub fn covers_season(&self, year: i32) -> bool {
        self.season_year.map(|y| y >= year).unwrap_or(false)
    }

    /// Last round recorded for the given season; 0 when the watermark is
    /// behind that season entirely.
    pub fn last_round_in(&self, year: i32) -> i32 {
        match self.season_year {
            Some(y) if y == year => self.round_number.unwrap_or(0),
            Some(y) if y > year => i32::MAX,
            _ => 0,
        }
    }
}

/// One row per entity in the metadata store, mutated only by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub entity: String,
    pub status: SyncStatus,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub watermark: Watermark,
    pub total_records: i64,
    pub error_message: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl SyncState {
    pub fn provisioned(entity: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entity: entity.into(),
            status: SyncStatus::Pending,
            last_successful_sync: None,
            watermark: Watermark::default(),
            total_records: 0,
            error_message: None,
            last_updated: now,
        }
    }
}

/// Append-only audit record, one terminal entry per task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub entity: String,
    pub sync_timestamp: DateTime<Utc>,
    pub status: SyncStatus,
    pub records_affected: i64,
    pub duration_seconds: i64,
    pub error_message: Option<String>,
}

/// One planned (entity, window) unit of work. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub entity: &'static str,
    pub year: i32,
    pub round: Option<i32>,
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    PreSeason,
    PostRace,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreSeason => "pre_season",
            Self::PostRace => "post_race",
        }
    }

    /// Strategy this mode restricts the due-set to.
    pub fn strategy(self) -> Strategy {
        match self {
            Self::PreSeason => Strategy::Seasonal,
            Self::PostRace => Strategy::Incremental,
        }
    }
}

/// Typed column value handed from transform to the sink upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

/// One normalized row, ordered columns, ready for upsert-by-natural-key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub columns: Vec<(&'static str, SqlValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &'static str, value: SqlValue) -> Self {
        self.columns.push((column, value));
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }
}

/// Static declaration of one tracked entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    pub strategy: Strategy,
    pub dependencies: &'static [&'static str],
    pub conflict_key: &'static [&'static str],
    pub description: &'static str,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("entity {entity} depends on undeclared entity {dependency}")]
    UnknownDependency { entity: String, dependency: String },
    #[error("dependency cycle involving: {0}")]
    DependencyCycle(String),
}

/// Static entity registry with the topological order computed once at
/// construction. Lookup failures are configuration errors, fatal at
/// startup.
#[derive(Debug, Clone)]
pub struct Registry {
    entities: Vec<EntityDescriptor>,
    topo: Vec<&'static str>,
}

impl Registry {
    pub fn builtin() -> Result<Self, ConfigurationError> {
        Self::from_entities(BUILTIN_ENTITIES.to_vec())
    }

    pub fn from_entities(entities: Vec<EntityDescriptor>) -> Result<Self, ConfigurationError> {
        for entity in &entities {
            for dependency in entity.dependencies {
                if !entities.iter().any(|e| e.name == *dependency) {
                    return Err(ConfigurationError::UnknownDependency {
                        entity: entity.name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }
        let topo = topological_order(&entities)?;
        Ok(Self { entities, topo })
    }

    pub fn get(&self, name: &str) -> Result<&EntityDescriptor, ConfigurationError> {
        self.entities
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ConfigurationError::UnknownEntity(name.to_string()))
    }

    pub fn dependencies_of(&self, name: &str) -> Result<&'static [&'static str], ConfigurationError> {
        Ok(self.get(name)?.dependencies)
    }

    pub fn strategy_of(&self, name: &str) -> Result<Strategy, ConfigurationError> {
        Ok(self.get(name)?.strategy)
    }

    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// Cached topological order over the full registry, dependencies
    /// first, ties broken by declaration order.
    pub fn topological_order(&self) -> &[&'static str] {
        &self.topo
    }

    /// Restrict the cached order to the given subset, preserving it.
    pub fn ordered(&self, subset: &[&'static str]) -> Vec<&'static str> {
        self.topo
            .iter()
            .filter(|name| subset.contains(name))
            .copied()
            .collect()
    }
}

/// Kahn's algorithm over the declaration list. Scanning the declaration
/// order for the next zero-indegree node gives the documented tie-break.
fn topological_order(
    entities: &[EntityDescriptor],
) -> Result<Vec<&'static str>, ConfigurationError> {
    let mut emitted: Vec<&'static str> = Vec::with_capacity(entities.len());

    while emitted.len() < entities.len() {
        let next = entities.iter().find(|entity| {
            !emitted.contains(&entity.name)
                && entity
                    .dependencies
                    .iter()
                    .all(|dependency| emitted.contains(dependency))
        });

        match next {
            Some(entity) => emitted.push(entity.name),
            None => {
                let stuck: Vec<&str> = entities
                    .iter()
                    .map(|e| e.name)
                    .filter(|name| !emitted.contains(name))
                    .collect();
                return Err(ConfigurationError::DependencyCycle(stuck.join(", ")));
            }
        }
    }

    Ok(emitted)
}

/// The tracked entity set. Declaration order doubles as the topological
/// tie-break, so reference tables come first.
pub const BUILTIN_ENTITIES: &[EntityDescriptor] = &[
    EntityDescriptor {
        name: "circuit",
        table: "circuit",
        strategy: Strategy::Seasonal,
        dependencies: &[],
        conflict_key: &["reference"],
        description: "circuits and tracks",
    },
    EntityDescriptor {
        name: "season",
        table: "season",
        strategy: Strategy::Seasonal,
        dependencies: &[],
        conflict_key: &["year"],
        description: "one row per championship year",
    },
    EntityDescriptor {
        name: "team",
        table: "team",
        strategy: Strategy::Seasonal,
        dependencies: &["season"],
        conflict_key: &["reference"],
        description: "teams and constructors",
    },
    EntityDescriptor {
        name: "round",
        table: "round",
        strategy: Strategy::Seasonal,
        dependencies: &["season", "circuit"],
        conflict_key: &["season_year", "number"],
        description: "race calendar",
    },
    EntityDescriptor {
        name: "session",
        table: "session",
        strategy: Strategy::Seasonal,
        dependencies: &["round"],
        conflict_key: &["season_year", "round_number", "number"],
        description: "practice, qualifying and race sessions",
    },
    EntityDescriptor {
        name: "driver",
        table: "driver",
        strategy: Strategy::Seasonal,
        dependencies: &[],
        conflict_key: &["reference"],
        description: "drivers",
    },
    EntityDescriptor {
        name: "team_driver",
        table: "team_driver",
        strategy: Strategy::Seasonal,
        dependencies: &["driver", "team", "season"],
        conflict_key: &["season_year", "team_ref", "driver_ref"],
        description: "driver-team pairings per season",
    },
    EntityDescriptor {
        name: "sprint_result",
        table: "sprint_result",
        strategy: Strategy::Incremental,
        dependencies: &["team", "round", "session"],
        conflict_key: &["season_year", "round_number", "driver_ref"],
        description: "sprint classification",
    },
    EntityDescriptor {
        name: "qualifying_result",
        table: "qualifying_result",
        strategy: Strategy::Incremental,
        dependencies: &["team", "round", "session"],
        conflict_key: &["season_year", "round_number", "driver_ref"],
        description: "qualifying classification",
    },
    EntityDescriptor {
        name: "race_result",
        table: "race_result",
        strategy: Strategy::Incremental,
        dependencies: &["team", "round", "session"],
        conflict_key: &["season_year", "round_number", "driver_ref"],
        description: "race classification",
    },
    EntityDescriptor {
        name: "driver_championship",
        table: "driver_championship",
        strategy: Strategy::Incremental,
        dependencies: &["driver", "round", "session"],
        conflict_key: &["season_year", "round_number", "driver_ref"],
        description: "driver standings after each round",
    },
    EntityDescriptor {
        name: "team_championship",
        table: "team_championship",
        strategy: Strategy::Incremental,
        dependencies: &["team", "round", "session"],
        conflict_key: &["season_year", "round_number", "team_ref"],
        description: "constructor standings after each round",
    },
];
