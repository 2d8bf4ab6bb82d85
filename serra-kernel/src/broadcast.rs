/**
 * BROADCAST - Fan-out temps réel des messages MQTT vers les clients WebSocket
 *
 * RÔLE :
 * Chaque message MQTT traité est reflété aux clients connectés, que la
 * persistance l'accepte ou non. Le fan-out est fire-and-forget : un
 * client lent qui déborde son buffer perd des messages, jamais le
 * pipeline d'ingestion.
 *
 * FONCTIONNEMENT :
 * - Topic mesure → value = payload décimal
 * - Topic JSON (statuts, configs, logs) → metadata = payload décodé
 * - sensors/status au format enveloppé → metadata = l'objet sensors interne
 * - Émission même si la valeur n'a pas changé (les clients gèrent le dédoublonnage)
 *
 * UTILITÉ DANS SERRA :
 * 🎯 Dashboards live sans polling HTTP
 * 🎯 Zéro couplage : 0 client connecté = 0 travail
 * 🎯 Découplage : la persistance et le temps réel ne se bloquent jamais
 */

use crate::models::LiveUpdate;
use crate::topics::{is_measurement_topic, parse_topic};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Construit le payload temps réel pour un message MQTT brut.
/// Pure, testable sans broker ni client.
pub fn prepare_live_update(topic: &str, payload: &str) -> LiveUpdate {
    let time = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    let is_measurement = parse_topic(topic)
        .map(|p| is_measurement_topic(&p, topic))
        .unwrap_or(false);

    if is_measurement {
        return LiveUpdate {
            topic: topic.to_string(),
            value: payload.trim().parse::<f64>().ok(),
            metadata: None,
            time,
        };
    }

    let metadata = serde_json::from_str::<serde_json::Value>(payload).ok().map(|v| {
        // Format enveloppé de sensors/status : on expose l'objet interne
        if topic.ends_with("/sensors/status") {
            if let Some(sensors) = v.get("sensors") {
                return sensors.clone();
            }
        }
        v
    });

    LiveUpdate {
        topic: topic.to_string(),
        value: None,
        metadata,
        time,
    }
}

/// Canal de diffusion vers les handlers WebSocket
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<LiveUpdate>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveUpdate> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Diffuse un message MQTT brut. No-op sans client connecté.
    pub fn publish_raw(&self, topic: &str, payload: &str) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let update = prepare_live_update(topic, payload);
        // send n'échoue que sans receiver, déjà exclu ci-dessus
        let _ = self.tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_measurement_topic_parses_float_value() {
        let update = prepare_live_update("serre/bmp280/pressure", "1013.2");
        assert_eq!(update.value, Some(1013.2));
        assert!(update.metadata.is_none());
        assert_eq!(update.topic, "serre/bmp280/pressure");
    }

    #[test]
    fn test_measurement_topic_bad_payload_gives_none() {
        let update = prepare_live_update("serre/bmp280/pressure", "not-a-number");
        assert_eq!(update.value, None);
        assert!(update.metadata.is_none());
    }

    #[test]
    fn test_json_topic_goes_to_metadata() {
        let update = prepare_live_update("serre/system", r#"{"rssi":-62}"#);
        assert_eq!(update.value, None);
        assert_eq!(update.metadata, Some(json!({"rssi": -62})));
    }

    #[test]
    fn test_wrapped_sensor_status_unwraps_inner_object() {
        let payload = r#"{"moduleId":"serre","moduleType":"air-quality",
                          "sensors":{"dht22:temperature":{"status":"ok","value":21.5}}}"#;
        let update = prepare_live_update("serre/sensors/status", payload);
        assert_eq!(
            update.metadata,
            Some(json!({"dht22:temperature": {"status": "ok", "value": 21.5}}))
        );
    }

    #[test]
    fn test_flat_sensor_status_kept_as_is() {
        let payload = r#"{"dht22:temperature":{"status":"ok","value":21.5}}"#;
        let update = prepare_live_update("serre/sensors/status", payload);
        assert_eq!(
            update.metadata,
            Some(json!({"dht22:temperature": {"status": "ok", "value": 21.5}}))
        );
    }

    #[test]
    fn test_publish_without_clients_is_noop() {
        let b = Broadcaster::new(16);
        assert_eq!(b.client_count(), 0);
        // Ne doit ni paniquer ni bloquer
        b.publish_raw("serre/bmp280/pressure", "1013.2");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let b = Broadcaster::new(16);
        let mut rx = b.subscribe();
        b.publish_raw("serre/dht22/temperature", "21.5");
        let update = rx.recv().await.unwrap();
        assert_eq!(update.topic, "serre/dht22/temperature");
        assert_eq!(update.value, Some(21.5));
    }
}
