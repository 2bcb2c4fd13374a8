/**
 * HISTORY & FLAPPING - Historique borné des statuts et détection d'oscillation
 *
 * Chaque couple (client, check) garde ses 20 derniers statuts dans
 * history:<client>:<check>. À chaque nouveau résultat on empile, et dès que
 * 21 valeurs sont disponibles on calcule un pourcentage de changement
 * d'état pondéré (les changements récents pèsent plus lourd), puis on retire
 * la plus ancienne.
 *
 * Le verdict de flapping applique une hystérésis : au-dessus du seuil haut on
 * passe en flapping, on n'en sort qu'en dessous du seuil bas.
 */

use crate::store::{history_key, Store, StoreError};

pub const HISTORY_LEN: usize = 20;
pub const DEFAULT_HIGH_FLAP_THRESHOLD: u32 = 50;
pub const DEFAULT_LOW_FLAP_THRESHOLD: u32 = 40;

/// Poids initial et pas, en centièmes (0.8 et 0.02)
const INITIAL_WEIGHT: u64 = 80;
const WEIGHT_STEP: u64 = 2;

/// Lecture produite par l'enregistrement d'un statut
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryReading {
    /// Historique après traitement (<= 20 valeurs, plus ancienne en tête)
    pub history: Vec<i64>,
    /// None tant que moins de 21 statuts ont été vus
    pub state_change_percent: Option<u32>,
}

/// Pourcentage de changement d'état pondéré sur une fenêtre complète.
///
/// Calcul en centièmes pour obtenir la valeur exacte de la formule :
/// somme des poids (0.8 + 0.02 * i) aux positions où le statut change,
/// divisée par 20, fois 100, tronquée.
pub fn state_change_percent(statuses: &[i64]) -> u32 {
    let mut weight = INITIAL_WEIGHT;
    let mut changes = 0u64;
    let mut previous: Option<i64> = None;

    for &status in statuses {
        if previous.is_some_and(|p| p != status) {
            changes += weight;
        }
        weight += WEIGHT_STEP;
        previous = Some(status);
    }

    // changes est en centièmes : (changes / 100) / 20 * 100
    (changes / HISTORY_LEN as u64) as u32
}

/// Verdict avec hystérésis
pub fn flapping_verdict(was_flapping: bool, percent: Option<u32>, high: u32, low: u32) -> bool {
    match percent {
        None => was_flapping,
        Some(p) if p >= high => true,
        Some(p) if was_flapping && p <= low => false,
        Some(_) => was_flapping,
    }
}

/// Empile le statut et calcule la lecture de flapping.
///
/// Push, lecture et trim sont trois allers-retours distincts vers le store ;
/// les résultats d'un même couple doivent arriver ici l'un après l'autre
/// (le listener MQTT les consomme dans l'ordre).
pub async fn record_status(
    store: &dyn Store,
    client: &str,
    check: &str,
    status: i64,
) -> Result<HistoryReading, StoreError> {
    let key = history_key(client, check);
    store.rpush(&key, status.to_string()).await?;

    let window = HISTORY_LEN as isize + 1;
    let raw = store.lrange(&key, -window, -1).await?;

    // la taille brute commande le trim, une entrée illisible ne bloque pas la fenêtre
    let full = raw.len() > HISTORY_LEN;
    if full {
        store.lpop(&key).await?;
    }

    let mut statuses = Vec::with_capacity(raw.len());
    for entry in &raw {
        match entry.parse::<i64>() {
            Ok(status) => statuses.push(status),
            Err(e) => tracing::warn!(%key, %entry, error = %e, "skipping unreadable history entry"),
        }
    }

    if !full || statuses.len() != raw.len() {
        let keep = statuses.len().min(HISTORY_LEN);
        let history = statuses.split_off(statuses.len() - keep);
        return Ok(HistoryReading { history, state_change_percent: None });
    }

    let percent = state_change_percent(&statuses);
    Ok(HistoryReading {
        history: statuses[1..].to_vec(),
        state_change_percent: Some(percent),
    })
}
