//! Typed views over the well-known device paths of the SmartNest tree:
//! temperature/humidity, soil moisture, water level, ultrasonic distance,
//! parking occupancy, and the light/pump switches. Payload shapes and alert
//! thresholds match what the devices already publish.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::store::{SharedStore, StoreError, SubscriptionId};

pub const DHT_PATH: &str = "DHT11";
pub const DHT_HISTORY_PATH: &str = "DHT11/history";
pub const SOIL_PATH: &str = "soilmoisture";
pub const SOIL_HISTORY_PATH: &str = "soilhistory";
pub const WATER_PATH: &str = "Water";
pub const ULTRASONIC_PATH: &str = "Ultrasonic";
pub const LIGHT_PATH: &str = "LightStatus";
pub const PUMP_PATH: &str = "MotorStatus";

/// Distance at or below which the ultrasonic sensor reports an obstacle.
pub const ULTRASONIC_ALERT_METERS: f64 = 2.0;
/// Soil moisture below this needs watering; above the wet bound it is soaked.
pub const SOIL_DRY_BELOW: f64 = 30.0;
pub const SOIL_WET_ABOVE: f64 = 70.0;

pub fn parking_slot_path(slot: u8) -> String {
    format!("parking/slot{}", slot)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchState {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "ON",
            SwitchState::Off => "OFF",
        }
    }

    /// Devices publish the bare strings "ON"/"OFF"; anything else (including an
    /// absent node) reads as OFF, as the dashboard always displayed it.
    pub fn from_value(v: Option<&Value>) -> SwitchState {
        match v.and_then(|v| v.as_str()) {
            Some(s) if s.eq_ignore_ascii_case("on") => SwitchState::On,
            _ => SwitchState::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DhtReading {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub humidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoilStatus {
    #[serde(rename = "DRY")]
    Dry,
    #[serde(rename = "MOIST")]
    Moist,
    #[serde(rename = "WET")]
    Wet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SoilReading {
    pub value: f64,
    pub status: SoilStatus,
}

impl SoilReading {
    pub fn from_percent(value: f64) -> Self {
        let status = if value < SOIL_DRY_BELOW {
            SoilStatus::Dry
        } else if value > SOIL_WET_ABOVE {
            SoilStatus::Wet
        } else {
            SoilStatus::Moist
        };
        Self { value, status }
    }

    /// The sensor publishes either a bare number or `{value}`/`{moisture}`
    /// objects depending on firmware version; accept all three.
    pub fn from_value(v: &Value) -> Option<Self> {
        let value = match v {
            Value::Number(n) => n.as_f64()?,
            Value::Object(m) => m
                .get("value")
                .or_else(|| m.get("moisture"))
                .and_then(|n| n.as_f64())?,
            _ => return None,
        };
        Some(Self::from_percent(value))
    }

    pub fn needs_watering(&self) -> bool {
        self.status == SoilStatus::Dry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterStatus {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "ALERT")]
    Alert,
}

impl WaterStatus {
    pub fn from_value(v: Option<&Value>) -> WaterStatus {
        match v.and_then(|v| v.get("status")).and_then(|s| s.as_str()) {
            Some(s) if s.eq_ignore_ascii_case("alert") => WaterStatus::Alert,
            _ => WaterStatus::Normal,
        }
    }

    pub fn is_alert(&self) -> bool {
        *self == WaterStatus::Alert
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UltrasonicReading {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub status: String,
}

impl UltrasonicReading {
    pub fn is_alert(&self) -> bool {
        self.distance <= ULTRASONIC_ALERT_METERS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParkingSlot {
    #[serde(default)]
    pub occupied: bool,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// One archived soil reading; history entries carry `{soilmoisture}` only,
/// keyed by an opaque id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilSample {
    pub id: String,
    pub moisture: f64,
}

/// Typed facade over the shared device tree.
#[derive(Clone)]
pub struct Telemetry {
    store: SharedStore,
}

impl Telemetry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn dht(&self) -> Option<DhtReading> {
        let v = self.store.read_once(DHT_PATH)?;
        serde_json::from_value(v).ok()
    }

    /// Publish a current reading and append it to the history, keyed by epoch
    /// millis the way device firmware does.
    pub fn record_dht(&self, reading: DhtReading) -> Result<(), StoreError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        // Field-level writes so the history subtree under DHT11 survives.
        self.store.write(&format!("{}/temperature", DHT_PATH), Some(json!(reading.temperature)))?;
        self.store.write(&format!("{}/humidity", DHT_PATH), Some(json!(reading.humidity)))?;
        self.store.write(
            &format!("{}/{}", DHT_HISTORY_PATH, now_ms),
            Some(json!({"temperature": reading.temperature, "humidity": reading.humidity})),
        )
    }

    /// History keyed by epoch-millis timestamps; unreadable entries are skipped.
    pub fn dht_history(&self) -> BTreeMap<i64, DhtReading> {
        let Some(Value::Object(map)) = self.store.read_once(DHT_HISTORY_PATH) else {
            return BTreeMap::new();
        };
        map.into_iter()
            .filter_map(|(k, v)| {
                let ts = k.parse::<i64>().ok()?;
                let reading = serde_json::from_value::<DhtReading>(v).ok()?;
                Some((ts, reading))
            })
            .collect()
    }

    pub fn clear_dht_history(&self) -> bool {
        self.store.write(DHT_HISTORY_PATH, None).is_ok()
    }

    pub fn soil(&self) -> Option<SoilReading> {
        let v = self.store.read_once(SOIL_PATH)?;
        SoilReading::from_value(&v)
    }

    /// Publish the moisture percentage and archive it under a fresh history id.
    pub fn record_soil(&self, percent: f64) -> Result<(), StoreError> {
        self.store.write(SOIL_PATH, Some(json!(percent)))?;
        let id = chrono::Utc::now().timestamp_millis();
        self.store
            .write(&format!("{}/{}", SOIL_HISTORY_PATH, id), Some(json!({"soilmoisture": percent})))
    }

    /// Latest-first list of archived soil readings.
    pub fn soil_history(&self) -> Vec<SoilSample> {
        let Some(Value::Object(map)) = self.store.read_once(SOIL_HISTORY_PATH) else {
            return Vec::new();
        };
        let mut out: Vec<SoilSample> = map
            .into_iter()
            .filter_map(|(id, v)| {
                let moisture = v.get("soilmoisture").and_then(|n| n.as_f64())?;
                Some(SoilSample { id, moisture })
            })
            .collect();
        out.reverse();
        out
    }

    pub fn clear_soil_history(&self) -> bool {
        self.store.write(SOIL_HISTORY_PATH, None).is_ok()
    }

    pub fn water(&self) -> WaterStatus {
        WaterStatus::from_value(self.store.read_once(WATER_PATH).as_ref())
    }

    pub fn ultrasonic(&self) -> Option<UltrasonicReading> {
        let v = self.store.read_once(ULTRASONIC_PATH)?;
        serde_json::from_value(v).ok()
    }

    pub fn parking_slot(&self, slot: u8) -> Option<ParkingSlot> {
        let v = self.store.read_once(&parking_slot_path(slot))?;
        serde_json::from_value(v).ok()
    }

    pub fn light(&self) -> SwitchState {
        SwitchState::from_value(self.store.read_once(LIGHT_PATH).as_ref())
    }

    pub fn set_light(&self, state: SwitchState) -> Result<(), StoreError> {
        self.store.write(LIGHT_PATH, Some(Value::String(state.as_str().to_string())))
    }

    pub fn pump(&self) -> SwitchState {
        SwitchState::from_value(self.store.read_once(PUMP_PATH).as_ref())
    }

    pub fn set_pump(&self, state: SwitchState) -> Result<(), StoreError> {
        self.store.write(PUMP_PATH, Some(Value::String(state.as_str().to_string())))
    }

    /// Watch the soil moisture path, delivering parsed readings.
    pub fn watch_soil<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Option<SoilReading>) + Send + Sync + 'static,
    {
        self.store
            .subscribe(SOIL_PATH, move |v| callback(v.as_ref().and_then(SoilReading::from_value)))
    }

    pub fn unwatch(&self, id: SubscriptionId) {
        self.store.unsubscribe(id);
    }

    /// Snapshot of every typed reading, as served by `GET /sensors`.
    pub fn summary(&self) -> Value {
        json!({
            "dht": self.dht(),
            "soil": self.soil(),
            "water": self.water(),
            "ultrasonic": self.ultrasonic(),
            "parking": {
                "slot1": self.parking_slot(1),
                "slot2": self.parking_slot(2),
            },
            "light": self.light().as_str(),
            "pump": self.pump().as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry() -> Telemetry {
        Telemetry::new(SharedStore::in_memory())
    }

    #[test]
    fn soil_accepts_all_published_shapes() {
        assert_eq!(SoilReading::from_value(&json!(25.0)).unwrap().status, SoilStatus::Dry);
        assert_eq!(SoilReading::from_value(&json!({"value": 50})).unwrap().status, SoilStatus::Moist);
        assert_eq!(
            SoilReading::from_value(&json!({"moisture": 80.5})).unwrap().status,
            SoilStatus::Wet
        );
        assert_eq!(SoilReading::from_value(&json!("n/a")), None);
    }

    #[test]
    fn soil_thresholds() {
        assert!(SoilReading::from_percent(29.9).needs_watering());
        assert!(!SoilReading::from_percent(30.0).needs_watering());
        assert_eq!(SoilReading::from_percent(70.0).status, SoilStatus::Moist);
        assert_eq!(SoilReading::from_percent(70.1).status, SoilStatus::Wet);
    }

    #[test]
    fn ultrasonic_alert_at_two_meters() {
        let near = UltrasonicReading { distance: 2.0, status: "Obstacle".into() };
        let far = UltrasonicReading { distance: 2.1, status: "Clear".into() };
        assert!(near.is_alert());
        assert!(!far.is_alert());
    }

    #[test]
    fn switches_default_off_and_roundtrip() {
        let t = telemetry();
        assert_eq!(t.light(), SwitchState::Off);
        t.set_light(SwitchState::On).unwrap();
        assert_eq!(t.light(), SwitchState::On);
        t.set_pump(SwitchState::On).unwrap();
        assert_eq!(t.pump(), SwitchState::On);
    }

    #[test]
    fn water_defaults_to_normal() {
        let t = telemetry();
        assert_eq!(t.water(), WaterStatus::Normal);
        t.store.write(WATER_PATH, Some(json!({"status": "ALERT"}))).unwrap();
        assert!(t.water().is_alert());
    }

    #[test]
    fn histories_record_and_clear() {
        let t = telemetry();
        t.record_dht(DhtReading { temperature: 21.5, humidity: 40.0 }).unwrap();
        assert_eq!(t.dht().unwrap().temperature, 21.5);
        assert_eq!(t.dht_history().len(), 1);
        assert!(t.clear_dht_history());
        assert!(t.dht_history().is_empty());

        t.record_soil(22.0).unwrap();
        let samples = t.soil_history();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].moisture, 22.0);
        assert!(t.soil().unwrap().needs_watering());
        assert!(t.clear_soil_history());
        assert!(t.soil_history().is_empty());
    }

    #[test]
    fn watch_soil_delivers_parsed_readings() {
        use std::sync::{Arc, Mutex};
        let t = telemetry();
        let last: Arc<Mutex<Option<SoilReading>>> = Arc::new(Mutex::new(None));
        let last2 = last.clone();
        let id = t.watch_soil(move |r| *last2.lock().unwrap() = r);
        t.record_soil(75.0).unwrap();
        assert_eq!(last.lock().unwrap().unwrap().status, SoilStatus::Wet);
        t.unwatch(id);
    }
}
