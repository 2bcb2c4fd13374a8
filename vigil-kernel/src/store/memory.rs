/**
 * STORE MÉMOIRE - Implémentation en processus du Store
 *
 * Toutes les clés vivent dans une map protégée par un seul verrou : chaque
 * opération du trait est donc atomique. Un snapshot JSON optionnel permet de
 * retrouver l'état après redémarrage (chargé au boot, écrit périodiquement
 * et à l'arrêt par le kernel).
 */

use super::{Store, StoreError, WriteOp};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum Entry {
    String(String),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
    Hash(BTreeMap<String, String>),
}

type Keyspace = HashMap<String, Entry>;

pub struct MemoryStore {
    data: Mutex<Keyspace>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Crée un store adossé à un fichier snapshot, chargé s'il existe déjà
    pub fn with_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut data = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if !content.trim().is_empty() {
                data = serde_json::from_str(&content)?;
            }
            tracing::info!(path = %path.display(), keys = data.len(), "store snapshot loaded");
        } else {
            tracing::info!(path = %path.display(), "no store snapshot, starting fresh");
        }

        Ok(Self {
            data: Mutex::new(data),
            snapshot_path: Some(path),
        })
    }

    /// Écrit le snapshot JSON (no-op sans chemin configuré)
    pub async fn save_snapshot(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        // sérialisation sous verrou, écriture disque hors verrou
        let content = {
            let data = self.data.lock();
            serde_json::to_string(&*data)?
        };
        tokio::fs::write(path, content).await?;
        tracing::debug!(path = %path.display(), "store snapshot written");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

fn set_mut<'a>(data: &'a mut Keyspace, key: &str) -> Result<&'a mut BTreeSet<String>, StoreError> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Entry::Set(BTreeSet::new()))
    {
        Entry::Set(set) => Ok(set),
        _ => Err(wrong_type(key)),
    }
}

fn list_mut<'a>(data: &'a mut Keyspace, key: &str) -> Result<&'a mut VecDeque<String>, StoreError> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Entry::List(VecDeque::new()))
    {
        Entry::List(list) => Ok(list),
        _ => Err(wrong_type(key)),
    }
}

fn hash_mut<'a>(data: &'a mut Keyspace, key: &str) -> Result<&'a mut BTreeMap<String, String>, StoreError> {
    match data
        .entry(key.to_string())
        .or_insert_with(|| Entry::Hash(BTreeMap::new()))
    {
        Entry::Hash(hash) => Ok(hash),
        _ => Err(wrong_type(key)),
    }
}

/// Comme Redis, une collection vide n'existe pas
fn drop_if_empty(data: &mut Keyspace, key: &str) {
    let empty = match data.get(key) {
        Some(Entry::Set(s)) => s.is_empty(),
        Some(Entry::List(l)) => l.is_empty(),
        Some(Entry::Hash(h)) => h.is_empty(),
        _ => false,
    };
    if empty {
        data.remove(key);
    }
}

fn srem_locked(data: &mut Keyspace, key: &str, member: &str) -> Result<bool, StoreError> {
    let removed = match data.get_mut(key) {
        None => false,
        Some(Entry::Set(set)) => set.remove(member),
        Some(_) => return Err(wrong_type(key)),
    };
    drop_if_empty(data, key);
    Ok(removed)
}

fn op_key(op: &WriteOp) -> &str {
    match op {
        WriteOp::Set { key, .. } | WriteOp::Del { key } | WriteOp::SAdd { key, .. } | WriteOp::SRem { key, .. } => key,
    }
}

fn apply_op(data: &mut Keyspace, op: WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { key, value } => {
            data.insert(key, Entry::String(value));
        }
        WriteOp::Del { key } => {
            data.remove(&key);
        }
        WriteOp::SAdd { key, member } => {
            set_mut(data, &key)?.insert(member);
        }
        WriteOp::SRem { key, member } => {
            srem_locked(data, &key, &member)?;
        }
    }
    Ok(())
}

/// Convertit les bornes Redis (inclusives, négatives depuis la fin) en range
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.data.lock().get(key) {
            None => Ok(None),
            Some(Entry::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.data.lock().insert(key.to_string(), Entry::String(value));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock();
        Ok(set_mut(&mut data, key)?.insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock();
        srem_locked(&mut data, key, member)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.data.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        match self.data.lock().get(key) {
            None => Ok(false),
            Some(Entry::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn rpush(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let mut data = self.data.lock();
        let list = list_mut(&mut data, key)?;
        list.push_back(value);
        Ok(list.len())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        match self.data.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(list)) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut data = self.data.lock();
        let popped = match data.get_mut(key) {
            None => None,
            Some(Entry::List(list)) => list.pop_front(),
            Some(_) => return Err(wrong_type(key)),
        };
        drop_if_empty(&mut data, key);
        Ok(popped)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        match self.data.lock().get(key) {
            None => Ok(None),
            Some(Entry::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        hash_mut(&mut data, key)?.insert(field.to_string(), value);
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut data = self.data.lock();
        let removed = match data.get_mut(key) {
            None => false,
            Some(Entry::Hash(hash)) => hash.remove(field).is_some(),
            Some(_) => return Err(wrong_type(key)),
        };
        drop_if_empty(&mut data, key);
        Ok(removed)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        match self.data.lock().get(key) {
            None => Ok(false),
            Some(Entry::Hash(hash)) => Ok(hash.contains_key(field)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn exec(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut data = self.data.lock();

        // le lot s'applique sur une copie des clés touchées, publiée seulement si tout passe
        let touched: BTreeSet<String> = ops.iter().map(|op| op_key(op).to_string()).collect();
        let mut staged: Keyspace = touched
            .iter()
            .filter_map(|key| data.get(key).map(|entry| (key.clone(), entry.clone())))
            .collect();
        for op in ops {
            apply_op(&mut staged, op)?;
        }

        for key in touched {
            match staged.remove(&key) {
                Some(entry) => data.insert(key, entry),
                None => data.remove(&key),
            };
        }
        Ok(())
    }
}
