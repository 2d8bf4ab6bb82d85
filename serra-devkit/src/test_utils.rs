/*!
Harness de test pour l'écosystème Serra

Facilite l'écriture de tests autour du kernel avec:
- Setup automatique du mock MQTT et du logging
- Simulateurs de modules ESP32 prêts à l'emploi
- Assertions sur les configs retained publiées vers le firmware
*/

use crate::mqtt_stub::{MockMqttClient, ModuleSimulator};
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

/// Harness de test : un mock client partagé entre les simulateurs et
/// les assertions, logging initialisé une seule fois.
pub struct TestHarness {
    pub client: MockMqttClient,
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok(); // Init logging pour tests
        Self {
            client: MockMqttClient::new(),
        }
    }

    /// Crée un simulateur de module branché sur le mock client
    pub fn module(&self, module_id: &str, module_type: &str) -> ModuleSimulator {
        ModuleSimulator::new(self.client.clone(), module_id, module_type)
    }

    /// Dernière config retained publiée vers un module, décodée
    pub fn last_published_config(&self, module_id: &str) -> Result<Option<Value>> {
        self.client
            .get_last_json_message(&format!("{module_id}/sensors/config"))
    }

    /// Attend qu'un message JSON soit publié sur un topic, avec timeout.
    /// None si rien n'est arrivé à temps.
    pub async fn wait_for_message(&self, topic: &str, timeout_ms: u64) -> Result<Option<Value>> {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if let Some(msg) = self.client.get_last_json_message::<Value>(topic)? {
                log::info!("✅ Received expected message on {}", topic);
                return Ok(Some(msg));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(None)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::QoS;

    #[tokio::test]
    async fn test_harness_tracks_published_config() {
        let harness = TestHarness::new();
        harness
            .client
            .publish(
                "serre/sensors/config",
                QoS::AtLeastOnce,
                true,
                r#"{"sensors":{"bmp280":{"interval":120}}}"#,
            )
            .await
            .unwrap();

        let config = harness.last_published_config("serre").unwrap().unwrap();
        assert_eq!(config["sensors"]["bmp280"]["interval"], 120);
        assert!(harness.last_published_config("croissance").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_message_times_out_quietly() {
        let harness = TestHarness::new();
        let missing = harness
            .wait_for_message("serre/sensors/config", 120)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_module_simulator_wired_to_harness_client() {
        let harness = TestHarness::new();
        let mut rx = harness.client.setup_receiver();

        let module = harness.module("serre", "greenhouse");
        module.send_measurement("bmp280", "pressure", 1013.2).await.unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.topic, "serre/bmp280/pressure");
    }
}
