/**
 * AGGREGATES - Moteur de requêtes sur les groupes client:check
 *
 * RÔLE :
 * Un agrégat est un set `aggregates:<name>` de membres "<client>:<check>",
 * alimenté par un collaborateur externe. Le moteur calcule à la demande un
 * résumé par sévérité à partir des derniers résultats (result:<client>:<check>).
 *
 * FONCTIONNEMENT :
 * - Lecture concurrente des résultats de tous les membres (FuturesUnordered)
 * - Un compteur de lectures en attente marque la fin de la collecte,
 *   quel que soit l'ordre d'arrivée
 * - Un membre sans résultat est retiré de l'agrégat (auto-réparation)
 * - max_age : un résultat exécuté avant now - max_age est "stale"
 */

use crate::models::{Check, Severity};
use crate::store::{aggregate_key, result_key, Store, StoreError, WriteOp, AGGREGATES_KEY};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Aggregate not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AggregateError {
    fn into_response(self) -> Response {
        let status = match &self {
            AggregateError::NotFound(_) => StatusCode::NOT_FOUND,
            AggregateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AggregateError::Store(e) => {
                tracing::error!(error = %e, "aggregate query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, axum::Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AggregateName {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResultCounts {
    pub ok: u32,
    pub warning: u32,
    pub critical: u32,
    pub unknown: u32,
    pub total: u32,
    pub stale: u32,
}

impl ResultCounts {
    fn tally(&mut self, severity: Severity) {
        match severity {
            Severity::Ok => self.ok += 1,
            Severity::Warning => self.warning += 1,
            Severity::Critical => self.critical += 1,
            Severity::Unknown => self.unknown += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AggregateSummary {
    pub clients: usize,
    pub checks: usize,
    pub results: ResultCounts,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OutputSummary {
    pub output: String,
    pub total: u32,
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckBreakdown {
    pub check: String,
    pub summary: Vec<OutputSummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientChecks {
    pub name: String,
    pub checks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckClients {
    pub name: String,
    pub clients: Vec<String>,
}

/// Membre d'agrégat décomposé
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Member {
    raw: String,
    client: String,
    check: String,
}

impl Member {
    fn parse(raw: String) -> Option<Self> {
        let (client, check) = raw.split_once(':')?;
        Some(Self { client: client.to_string(), check: check.to_string(), raw })
    }
}

#[derive(Clone)]
pub struct AggregateEngine {
    store: Arc<dyn Store>,
}

impl AggregateEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<AggregateName>, AggregateError> {
        let mut names = self.store.smembers(AGGREGATES_KEY).await?;
        names.sort();
        Ok(names.into_iter().map(|name| AggregateName { name }).collect())
    }

    /// Membres valides ; agrégat vide ou absent -> NotFound
    async fn members(&self, name: &str) -> Result<Vec<Member>, AggregateError> {
        let raw = self.store.smembers(&aggregate_key(name)).await?;
        if raw.is_empty() {
            return Err(AggregateError::NotFound(name.to_string()));
        }

        let mut members = Vec::with_capacity(raw.len());
        for entry in raw {
            match Member::parse(entry.clone()) {
                Some(member) => members.push(member),
                None => tracing::warn!(aggregate = %name, member = %entry, "malformed aggregate member ignored"),
            }
        }
        members.sort();
        Ok(members)
    }

    /// Lit le dernier résultat de chaque membre en parallèle.
    ///
    /// Les membres sans résultat sont retirés de l'agrégat ; un résultat
    /// illisible est ignoré sans toucher à l'appartenance.
    async fn fetch_results(&self, name: &str, members: &[Member]) -> Result<Vec<(Member, Check)>, AggregateError> {
        let mut fetches: FuturesUnordered<_> = members
            .iter()
            .map(|member| async move {
                let key = result_key(&member.client, &member.check);
                (member, self.store.get(&key).await)
            })
            .collect();

        let mut pending = members.len();
        let mut results = Vec::with_capacity(pending);
        let mut stale_members = Vec::new();

        while pending > 0 {
            let Some((member, fetched)) = fetches.next().await else {
                break;
            };
            pending -= 1;

            match fetched? {
                Some(json) => match serde_json::from_str::<Check>(&json) {
                    Ok(check) => results.push((member.clone(), check)),
                    Err(e) => tracing::warn!(member = %member.raw, error = %e, "unreadable result skipped"),
                },
                None => stale_members.push(member.raw.clone()),
            }
        }
        drop(fetches);

        let key = aggregate_key(name);
        for member in stale_members {
            self.store.srem(&key, &member).await?;
            tracing::debug!(aggregate = %name, %member, "pruned member without result");
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    pub async fn summarize(&self, name: &str, max_age: Option<i64>, now: i64) -> Result<AggregateSummary, AggregateError> {
        let members = self.members(name).await?;
        let clients: BTreeSet<&str> = members.iter().map(|m| m.client.as_str()).collect();
        let checks: BTreeSet<&str> = members.iter().map(|m| m.check.as_str()).collect();

        let mut counts = ResultCounts::default();
        let cutoff = max_age.map(|age| now - age);
        for (_, check) in self.fetch_results(name, &members).await? {
            if cutoff.is_some_and(|cutoff| check.executed_at() < cutoff) {
                counts.stale += 1;
                continue;
            }
            counts.tally(check.severity());
        }

        Ok(AggregateSummary {
            clients: clients.len(),
            checks: checks.len(),
            results: counts,
        })
    }

    pub async fn results_by_severity(
        &self,
        name: &str,
        severity: &str,
        max_age: Option<i64>,
        now: i64,
    ) -> Result<Vec<CheckBreakdown>, AggregateError> {
        let severity: Severity = severity.parse().map_err(AggregateError::BadRequest)?;
        let members = self.members(name).await?;
        let cutoff = max_age.map(|age| now - age);

        // check -> output -> clients
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for (member, check) in self.fetch_results(name, &members).await? {
            if check.severity() != severity || cutoff.is_some_and(|cutoff| check.executed_at() < cutoff) {
                continue;
            }
            grouped
                .entry(member.check)
                .or_default()
                .entry(check.output)
                .or_default()
                .push(member.client);
        }

        Ok(grouped
            .into_iter()
            .map(|(check, outputs)| CheckBreakdown {
                check,
                summary: outputs
                    .into_iter()
                    .map(|(output, mut clients)| {
                        clients.sort();
                        OutputSummary { output, total: clients.len() as u32, clients }
                    })
                    .collect(),
            })
            .collect())
    }

    /// Supprime le nom et l'appartenance en un seul lot
    pub async fn delete(&self, name: &str) -> Result<(), AggregateError> {
        if !self.store.sismember(AGGREGATES_KEY, name).await? {
            return Err(AggregateError::NotFound(name.to_string()));
        }
        self.store
            .exec(vec![
                WriteOp::SRem { key: AGGREGATES_KEY.to_string(), member: name.to_string() },
                WriteOp::Del { key: aggregate_key(name) },
            ])
            .await?;
        tracing::info!(aggregate = %name, "aggregate deleted");
        Ok(())
    }

    pub async fn clients(&self, name: &str) -> Result<Vec<ClientChecks>, AggregateError> {
        let mut by_client: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for member in self.members(name).await? {
            by_client.entry(member.client).or_default().push(member.check);
        }
        Ok(by_client.into_iter().map(|(name, checks)| ClientChecks { name, checks }).collect())
    }

    pub async fn checks(&self, name: &str) -> Result<Vec<CheckClients>, AggregateError> {
        let mut by_check: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for member in self.members(name).await? {
            by_check.entry(member.check).or_default().push(member.client);
        }
        Ok(by_check.into_iter().map(|(name, clients)| CheckClients { name, clients }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn seed(store: &MemoryStore, aggregate: &str, results: &[(&str, &str, i64, &str, i64)]) {
        store.sadd(AGGREGATES_KEY, aggregate).await.unwrap();
        for (client, check, status, output, executed) in results {
            let mut c = Check::new(check, *status, output, *executed);
            c.executed = Some(*executed);
            store
                .set(&result_key(client, check), serde_json::to_string(&c).unwrap())
                .await
                .unwrap();
            store.sadd(&aggregate_key(aggregate), &format!("{client}:{check}")).await.unwrap();
        }
    }

    fn engine() -> (Arc<MemoryStore>, AggregateEngine) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), AggregateEngine::new(store))
    }

    #[tokio::test]
    async fn test_summary_counts_by_severity() {
        let (store, engine) = engine();
        seed(&store, "web", &[("a", "http", 0, "ok", 100), ("b", "http", 1, "slow", 100), ("c", "http", 2, "down", 100)]).await;

        let summary = engine.summarize("web", None, 100).await.unwrap();
        assert_eq!(summary.clients, 3);
        assert_eq!(summary.checks, 1);
        assert_eq!(
            summary.results,
            ResultCounts { ok: 1, warning: 1, critical: 1, unknown: 0, total: 3, stale: 0 }
        );
    }

    #[tokio::test]
    async fn test_max_age_marks_old_results_stale() {
        let (store, engine) = engine();
        let now = 1_000;
        seed(&store, "web", &[("a", "http", 2, "down", now - 120), ("b", "http", 0, "ok", now - 10), ("c", "http", 7, "??", now)]).await;

        let summary = engine.summarize("web", Some(60), now).await.unwrap();
        assert_eq!(summary.results.stale, 1);
        assert_eq!(summary.results.total, 2);
        assert_eq!(summary.results.critical, 0);
        assert_eq!(summary.results.unknown, 1);
    }

    #[tokio::test]
    async fn test_members_without_result_are_pruned() {
        let (store, engine) = engine();
        seed(&store, "web", &[("a", "http", 0, "ok", 100)]).await;
        store.sadd("aggregates:web", "gone:http").await.unwrap();

        let summary = engine.summarize("web", None, 100).await.unwrap();
        // compté dans les clients, absent des résultats
        assert_eq!(summary.clients, 2);
        assert_eq!(summary.results.total, 1);
        assert_eq!(store.smembers("aggregates:web").await.unwrap(), vec!["a:http"]);
    }

    #[tokio::test]
    async fn test_unknown_or_empty_aggregate_is_not_found() {
        let (_, engine) = engine();
        assert!(matches!(engine.summarize("nope", None, 0).await, Err(AggregateError::NotFound(_))));
        assert!(matches!(engine.clients("nope").await, Err(AggregateError::NotFound(_))));
        assert!(matches!(engine.checks("nope").await, Err(AggregateError::NotFound(_))));
        assert!(matches!(engine.delete("nope").await, Err(AggregateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_severity_breakdown_groups_and_sorts() {
        let (store, engine) = engine();
        seed(
            &store,
            "web",
            &[
                ("c", "http", 2, "timeout", 100),
                ("a", "http", 2, "timeout", 100),
                ("b", "http", 2, "refused", 100),
                ("a", "disk", 2, "full", 100),
                ("d", "http", 0, "ok", 100),
            ],
        )
        .await;

        let breakdown = engine.results_by_severity("web", "critical", None, 100).await.unwrap();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].check, "disk");
        assert_eq!(breakdown[1].check, "http");
        assert_eq!(
            breakdown[1].summary,
            vec![
                OutputSummary { output: "refused".into(), total: 1, clients: vec!["b".into()] },
                OutputSummary { output: "timeout".into(), total: 2, clients: vec!["a".into(), "c".into()] },
            ]
        );

        let err = engine.results_by_severity("web", "fatal", None, 100).await.unwrap_err();
        assert!(matches!(err, AggregateError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_severity_breakdown_skips_stale_and_maps_unknown() {
        let (store, engine) = engine();
        let now = 1_000;
        seed(
            &store,
            "web",
            &[
                ("a", "http", 2, "down", now - 120),
                ("b", "http", 2, "down", now - 5),
                ("c", "http", 7, "exit 7", now),
                ("d", "http", 3, "no data", now - 300),
            ],
        )
        .await;

        // sans max_age : les deux critiques
        let all = engine.results_by_severity("web", "critical", None, now).await.unwrap();
        assert_eq!(all[0].summary[0].clients, vec!["a".to_string(), "b".to_string()]);

        let fresh = engine.results_by_severity("web", "critical", Some(60), now).await.unwrap();
        assert_eq!(
            fresh,
            vec![CheckBreakdown {
                check: "http".into(),
                summary: vec![OutputSummary { output: "down".into(), total: 1, clients: vec!["b".into()] }],
            }]
        );

        // un statut hors 0..=3 tombe dans unknown, le 3 périmé est exclu
        let unknown = engine.results_by_severity("web", "unknown", Some(60), now).await.unwrap();
        assert_eq!(unknown.len(), 1);
        assert_eq!(
            unknown[0].summary,
            vec![OutputSummary { output: "exit 7".into(), total: 1, clients: vec!["c".into()] }]
        );
        let unknown_all = engine.results_by_severity("web", "unknown", None, now).await.unwrap();
        assert_eq!(unknown_all[0].summary.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_name_and_members() {
        let (store, engine) = engine();
        seed(&store, "web", &[("a", "http", 0, "ok", 100)]).await;

        engine.delete("web").await.unwrap();
        assert!(engine.list().await.unwrap().is_empty());
        assert!(store.smembers("aggregates:web").await.unwrap().is_empty());
        assert!(matches!(engine.summarize("web", None, 100).await, Err(AggregateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_clients_and_checks_views() {
        let (store, engine) = engine();
        seed(&store, "web", &[("a", "http", 0, "ok", 1), ("a", "disk", 0, "ok", 1), ("b", "http", 0, "ok", 1)]).await;

        assert_eq!(
            engine.clients("web").await.unwrap(),
            vec![
                ClientChecks { name: "a".into(), checks: vec!["disk".into(), "http".into()] },
                ClientChecks { name: "b".into(), checks: vec!["http".into()] },
            ]
        );
        assert_eq!(
            engine.checks("web").await.unwrap(),
            vec![
                CheckClients { name: "disk".into(), clients: vec!["a".into()] },
                CheckClients { name: "http".into(), clients: vec!["a".into(), "b".into()] },
            ]
        );
        assert_eq!(engine.list().await.unwrap(), vec![AggregateName { name: "web".into() }]);
    }
}
