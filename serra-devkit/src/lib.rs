/*!
# Serra DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement autour du kernel Serra avec:
- Stub MQTT pour tests sans broker
- Builders de payloads au format wire des modules ESP32
- Simulateur de module complet (boot, mesures, statuts)
- Harness de test (logging, simulateurs, assertions sur les configs)
*/

pub mod fixtures;
pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMqttClient, ModuleSimulator};
pub use test_utils::TestHarness;
