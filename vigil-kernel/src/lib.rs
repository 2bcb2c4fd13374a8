/*!
# Vigil Kernel

Pipeline central de surveillance : réception des keepalives et des résultats
de checks, cycle de vie des événements avec détection de flapping, dispatch
vers les handlers, et moteur de requêtes sur les agrégats.
*/

pub mod aggregates;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod extensions;
pub mod health;
pub mod history;
pub mod http;
pub mod ingest;
pub mod keepalive;
pub mod models;
pub mod mqtt;
pub mod publisher;
pub mod registry;
pub mod store;
