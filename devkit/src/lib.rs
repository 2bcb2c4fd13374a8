/*!
# Vigil DevKit - Stubs et utilitaires de test

Bibliothèque facilitant les tests du kernel et de l'agent Vigil :
- Client MQTT simulé, sans broker
- Construction des messages keepalive / résultat / demande de check
*/

pub mod messages;
pub mod mqtt_stub;

pub use messages::MessageBuilder;
pub use mqtt_stub::{MockMessage, MockMqttClient};
