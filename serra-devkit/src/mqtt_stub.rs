/*!
Mock MQTT Client pour développement sans broker

Permet de tester le pipeline d'ingestion et les outils autour du kernel
sans démarrer un broker réel. Enregistre les publications et permet de
simuler la réception de messages.
*/

use crate::fixtures;
use anyhow::Result;
use rumqttc::QoS;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            message_sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock().unwrap() = Some(sender);
        receiver
    }

    /// Simule la publication d'un message (compatible avec AsyncClient)
    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };

        self.published_messages.lock().unwrap().push(message.clone());

        log::info!("📤 [MOCK] published to {}: {} bytes", message.topic, message.payload.len());
        Ok(())
    }

    /// Simule l'abonnement à un topic (compatible avec AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        self.subscriptions.lock().unwrap().push(topic.clone());
        log::info!("📥 [MOCK] subscribed to {}", topic);
        Ok(())
    }

    /// Simule la réception d'un message (pour tests)
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };

        if let Some(sender) = self.message_sender.lock().unwrap().as_ref() {
            sender
                .send(message.clone())
                .map_err(|e| anyhow::anyhow!("send error: {}", e))?;
        }

        log::info!("📨 [MOCK] simulated incoming: {}", message.topic);
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().unwrap().clone()
    }

    /// Messages publiés sur un topic précis
    pub fn messages_on_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Dernier message JSON publié sur un topic, désérialisé.
    /// Pratique pour vérifier une config retained sans décoder à la main.
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.messages_on_topic(topic);
        match messages.last() {
            Some(last) => Ok(Some(serde_json::from_slice(&last.payload)?)),
            None => Ok(None),
        }
    }

    /// Reset complet : messages publiés et abonnements
    pub fn clear(&self) {
        self.published_messages.lock().unwrap().clear();
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulateur d'un module ESP32 : rejoue la séquence de boot puis émet
/// des mesures, le tout via simulate_incoming.
pub struct ModuleSimulator {
    client: MockMqttClient,
    module_id: String,
    module_type: String,
}

impl ModuleSimulator {
    pub fn new(client: MockMqttClient, module_id: &str, module_type: &str) -> Self {
        Self {
            client,
            module_id: module_id.to_string(),
            module_type: module_type.to_string(),
        }
    }

    /// Séquence de boot : system/config, hardware/config, log de démarrage
    pub async fn boot(&self, ip: &str) -> Result<()> {
        self.client
            .simulate_incoming(
                format!("{}/system/config", self.module_id),
                fixtures::system_config_payload(ip, "a1:b2:c3:d4:e5:f6", &self.module_type, 1),
            )
            .await?;
        self.client
            .simulate_incoming(
                format!("{}/hardware/config", self.module_id),
                fixtures::hardware_payload("ESP32-S3", 2),
            )
            .await?;
        self.client
            .simulate_incoming(
                format!("{}/logs", self.module_id),
                fixtures::device_log_payload("info", "boot complete"),
            )
            .await?;
        Ok(())
    }

    /// Émet une mesure sur {module}/{hardware}/{mesure}
    pub async fn send_measurement(
        &self,
        hardware_id: &str,
        measurement: &str,
        value: f64,
    ) -> Result<()> {
        self.client
            .simulate_incoming(
                fixtures::measurement_topic(&self.module_id, hardware_id, measurement),
                value.to_string(),
            )
            .await
    }

    /// Émet un statut capteur au format enveloppé
    pub async fn send_sensor_status(
        &self,
        sensor_key: &str,
        status: &str,
        value: Option<f64>,
    ) -> Result<()> {
        self.client
            .simulate_incoming(
                format!("{}/sensors/status", self.module_id),
                fixtures::wrapped_status_payload(
                    &self.module_id,
                    &self.module_type,
                    sensor_key,
                    status,
                    value,
                ),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_publishes() {
        let client = MockMqttClient::new();
        client
            .publish("serre/sensors/config", QoS::AtLeastOnce, true, "{}")
            .await
            .unwrap();

        let messages = client.messages_on_topic("serre/sensors/config");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].retain);
    }

    #[tokio::test]
    async fn test_last_json_message_decodes_retained_config() {
        let client = MockMqttClient::new();
        client
            .publish(
                "serre/sensors/config",
                QoS::AtLeastOnce,
                true,
                r#"{"sensors":{"dht22":{"interval":60}}}"#,
            )
            .await
            .unwrap();

        let config: serde_json::Value = client
            .get_last_json_message("serre/sensors/config")
            .unwrap()
            .unwrap();
        assert_eq!(config["sensors"]["dht22"]["interval"], 60);

        let none: Option<serde_json::Value> =
            client.get_last_json_message("serre/sensors/reset").unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_clear_resets_messages_and_subscriptions() {
        let client = MockMqttClient::new();
        client.subscribe("#", QoS::AtLeastOnce).await.unwrap();
        client
            .publish("serre/logs", QoS::AtLeastOnce, false, "{}")
            .await
            .unwrap();

        client.clear();
        assert!(client.get_published_messages().is_empty());
        assert!(client.get_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_simulator_boot_sequence() {
        let client = MockMqttClient::new();
        let mut rx = client.setup_receiver();

        let module = ModuleSimulator::new(client.clone(), "serre", "air-quality");
        module.boot("10.0.0.12").await.unwrap();
        module.send_measurement("dht22", "temperature", 21.5).await.unwrap();

        let topics: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.topic)
            .collect();
        assert_eq!(
            topics,
            vec![
                "serre/system/config",
                "serre/hardware/config",
                "serre/logs",
                "serre/dht22/temperature",
            ]
        );
    }
}
