/*!
Builders de payloads au format wire des modules ESP32

Tous les champs JSON sont en camelCase, comme sur le fil. Les builders
retournent des String prêtes à passer dans un publish MQTT ou dans le
handler d'ingestion.
*/

use serde_json::json;

/// Topic d'une mesure : {module}/{hardware}/{mesure}
pub fn measurement_topic(module_id: &str, hardware_id: &str, measurement: &str) -> String {
    format!("{module_id}/{hardware_id}/{measurement}")
}

/// Payload {module}/system : état temps réel minimal
pub fn system_payload(rssi: i32, heap_free_kb: i64) -> String {
    json!({
        "rssi": rssi,
        "memory": { "heapFreeKb": heap_free_kb }
    })
    .to_string()
}

/// Payload {module}/system/config complet, tel qu'émis au boot
pub fn system_config_payload(ip: &str, mac: &str, module_type: &str, uptime_seconds: i64) -> String {
    json!({
        "ip": ip,
        "mac": mac,
        "moduleType": module_type,
        "uptimeStart": uptime_seconds,
        "flash": { "totalKb": 8192, "usedKb": 1200, "freeKb": 6992 },
        "memory": { "heapTotalKb": 320, "heapFreeKb": 210, "heapMinFreeKb": 180 }
    })
    .to_string()
}

/// Payload {module}/sensors/status au format enveloppé (firmware récent)
pub fn wrapped_status_payload(
    module_id: &str,
    module_type: &str,
    sensor_key: &str,
    status: &str,
    value: Option<f64>,
) -> String {
    json!({
        "moduleId": module_id,
        "moduleType": module_type,
        "sensors": {
            sensor_key: { "status": status, "value": value }
        }
    })
    .to_string()
}

/// Payload {module}/sensors/status au format plat (firmware legacy)
pub fn flat_status_payload(sensor_key: &str, status: &str, value: Option<f64>) -> String {
    json!({ sensor_key: { "status": status, "value": value } }).to_string()
}

/// Payload {module}/sensors/config : intervalles par clé composite
pub fn sensors_config_payload(entries: &[(&str, u32)]) -> String {
    let mut sensors = serde_json::Map::new();
    for (key, interval) in entries {
        sensors.insert((*key).to_string(), json!({ "interval": interval }));
    }
    serde_json::Value::Object(sensors).to_string()
}

/// Payload {module}/hardware/config : descripteur de puce
pub fn hardware_payload(chip_model: &str, cores: i32) -> String {
    json!({
        "chip": {
            "model": chip_model,
            "rev": 1,
            "cpuFreqMhz": 240,
            "flashKb": 8192,
            "cores": cores
        }
    })
    .to_string()
}

/// Payload {module}/logs horodaté au format du firmware
pub fn device_log_payload(level: &str, msg: &str) -> String {
    json!({
        "level": level,
        "msg": msg,
        "time": chrono::Utc::now().to_rfc3339()
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_are_valid_json() {
        for payload in [
            system_payload(-60, 120),
            system_config_payload("10.0.0.12", "a1:b2:c3:d4:e5:f6", "air-quality", 3600),
            wrapped_status_payload("serre", "air-quality", "dht22:temperature", "ok", Some(21.5)),
            flat_status_payload("mq7:co", "warming", None),
            sensors_config_payload(&[("scd41:co2", 60), ("sps30:pm25", 120)]),
            hardware_payload("ESP32-S3", 2),
            device_log_payload("info", "boot complete"),
        ] {
            serde_json::from_str::<serde_json::Value>(&payload).unwrap();
        }
    }

    #[test]
    fn test_wrapped_status_shape() {
        let payload = wrapped_status_payload("serre", "air-quality", "dht22:temperature", "ok", Some(21.5));
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["moduleType"], "air-quality");
        assert_eq!(v["sensors"]["dht22:temperature"]["value"], 21.5);
    }

    #[test]
    fn test_measurement_topic_format() {
        assert_eq!(
            measurement_topic("serre", "bmp280", "pressure"),
            "serre/bmp280/pressure"
        );
    }
}
