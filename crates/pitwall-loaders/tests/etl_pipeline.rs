//! End-to-end extract/transform/load pass over fake collaborators.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pitwall_core::Record;
use pitwall_loaders::{loader_for_entity, Loader};
use pitwall_store::{Sink, SourceError, SourceGateway, StoreError};
use serde_json::{json, Value as JsonValue};

struct ScriptedGateway {
    payload: JsonValue,
}

#[async_trait]
impl SourceGateway for ScriptedGateway {
    async fn fetch(
        &self,
        _entity: &str,
        _year: i32,
        _round: Option<i32>,
    ) -> Result<JsonValue, SourceError> {
        Ok(self.payload.clone())
    }
}

#[derive(Default)]
struct KeyedSink {
    rows: Mutex<HashMap<String, Record>>,
}

#[async_trait]
impl Sink for KeyedSink {
    async fn upsert(
        &self,
        _table: &str,
        conflict_key: &[&str],
        rows: &[Record],
    ) -> Result<u64, StoreError> {
        let mut stored = self.rows.lock().unwrap();
        for row in rows {
            let key: Vec<String> = conflict_key
                .iter()
                .map(|column| format!("{:?}", row.get(column)))
                .collect();
            stored.insert(key.join("|"), row.clone());
        }
        Ok(rows.len() as u64)
    }
}

fn race_payload() -> JsonValue {
    json!({ "MRData": { "RaceTable": { "Races": [{
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
                "position": "2", "points": "18", "grid": "2", "laps": "58",
                "status": "Finished",
                "Driver": { "driverId": "leclerc" },
                "Constructor": { "constructorId": "ferrari" }
            }
        ]
    }]}}})
}

#[tokio::test]
async fn race_results_flow_from_gateway_to_sink() {
    let gateway = ScriptedGateway {
        payload: race_payload(),
    };
    let sink = KeyedSink::default();
    let loader = loader_for_entity("race_result").expect("race_result loader");

    let raw = loader.extract(&gateway, 2024, Some(3)).await.expect("extract");
    let records = loader.transform(&raw).expect("transform");
    let written = loader.load(&sink, &records).await.expect("load");

    assert_eq!(written, 2);
    assert_eq!(sink.rows.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn replaying_the_same_window_is_idempotent() {
    let gateway = ScriptedGateway {
        payload: race_payload(),
    };
    let sink = KeyedSink::default();
    let loader = loader_for_entity("race_result").expect("race_result loader");

    for _ in 0..2 {
        let raw = loader.extract(&gateway, 2024, Some(3)).await.expect("extract");
        let records = loader.transform(&raw).expect("transform");
        loader.load(&sink, &records).await.expect("load");
    }

    assert_eq!(sink.rows.lock().unwrap().len(), 2);
}
