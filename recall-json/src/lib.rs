use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use recall_core::{
    repo::Repository, Card, CardId, CoreError, Deck, DeckId, ReviewLog, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::task;

pub mod paths;

const FILE_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
struct FileImage {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    decks: Vec<Deck>,
    cards: Vec<Card>,
    logs: Vec<ReviewLog>,
}

#[derive(Default, Clone)]
struct State {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    decks: HashMap<DeckId, Deck>,
    cards: HashMap<CardId, Card>,
    logs: HashMap<CardId, Vec<ReviewLog>>,
}

impl State {
    fn new_empty() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            decks: HashMap::new(),
            cards: HashMap::new(),
            logs: HashMap::new(),
        }
    }

    fn to_image(&self) -> FileImage {
        FileImage {
            version: FILE_VERSION,
            created_at: self.created_at,
            updated_at: self.updated_at,
            decks: self.decks.values().cloned().collect(),
            cards: self.cards.values().cloned().collect(),
            logs: self
                .logs
                .values()
                .flat_map(|v| v.clone().into_iter())
                .collect(),
        }
    }

    fn from_image(img: FileImage) -> Self {
        let mut decks = HashMap::new();
        for d in img.decks {
            decks.insert(d.id, d);
        }
        let mut cards = HashMap::new();
        for c in img.cards {
            cards.insert(c.id, c);
        }
        let mut logs: HashMap<CardId, Vec<ReviewLog>> = HashMap::new();
        for l in img.logs {
            logs.entry(l.card_id).or_default().push(l);
        }
        Self {
            created_at: img.created_at,
            updated_at: img.updated_at,
            decks,
            cards,
            logs,
        }
    }

    fn owned_deck(&self, user_id: UserId, id: DeckId) -> Option<&Deck> {
        self.decks
            .get(&id)
            .filter(|d| d.user_id == user_id && !d.is_deleted())
    }

    fn owned_card(&self, user_id: UserId, id: CardId) -> Option<&Card> {
        self.cards
            .get(&id)
            .filter(|c| c.user_id == user_id && !c.is_deleted())
    }
}

pub struct JsonStore {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
    state: RwLock<State>,
}

impl JsonStore {
    pub async fn open_default() -> Result<Self, CoreError> {
        let (file, backups) = paths::default_store_file();
        Self::open_with(file, backups, 10).await
    }

    pub async fn open_with(
        path: PathBuf,
        backups_dir: PathBuf,
        max_backups: usize,
    ) -> Result<Self, CoreError> {
        ensure_parent_dirs(&path)?;
        ensure_dir(&backups_dir)?;
        let state = load_or_init(&path).await?;
        Ok(Self {
            path,
            backups_dir,
            max_backups: max_backups.max(1),
            state: RwLock::new(state),
        })
    }

    async fn save(&self) -> Result<(), CoreError> {
        let snapshot = {
            let mut s = self.state.write();
            s.updated_at = Utc::now();
            s.to_image()
        };
        let path = self.path.clone();
        let backups = self.backups_dir.clone();
        let keep = self.max_backups;

        task::spawn_blocking(move || write_with_backup(&path, &backups, keep, &snapshot))
            .await
            .map_err(|_| CoreError::Storage("io"))?
            .map_err(|_| CoreError::Storage("io"))?;
        Ok(())
    }
}

fn ensure_parent_dirs(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), CoreError> {
    fs::create_dir_all(path).map_err(|_| CoreError::Storage("io"))
}

async fn load_or_init(path: &Path) -> Result<State, CoreError> {
    if path.exists() {
        let p = path.to_path_buf();
        let img: FileImage = task::spawn_blocking(move || {
            let mut f = fs::File::open(&p)?;
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            let v = serde_json::from_str::<FileImage>(&buf)?;
            Ok::<FileImage, std::io::Error>(v)
        })
        .await
        .map_err(|_| CoreError::Storage("io"))
        .and_then(|r| r.map_err(|_| CoreError::Storage("io")))?;
        let mut st = State::from_image(img);
        st.updated_at = Utc::now();
        Ok(st)
    } else {
        let st = State::new_empty();
        let img = st.to_image();
        write_with_backup(path, &path.with_extension("backups"), 1, &img)
            .map_err(|_| CoreError::Storage("io"))?;
        Ok(st)
    }
}

fn write_with_backup(
    path: &Path,
    backups_dir: &Path,
    max_backups: usize,
    img: &FileImage,
) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(backups_dir)?;

    let json = serde_json::to_vec_pretty(img).expect("serialize");
    let mut tmp = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    let _ = fs::remove_file(path);
    tmp.persist(path)?;

    // Backup rotation
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup_name = format!("recall-{ts}.json");
    let backup_path = backups_dir.join(backup_name);
    let mut btmp = NamedTempFile::new_in(backups_dir)?;
    btmp.write_all(&json)?;
    btmp.flush()?;
    let _ = fs::remove_file(&backup_path);
    btmp.persist(&backup_path)?;

    rotate_backups(backups_dir, max_backups)?;

    Ok(())
}

fn rotate_backups(dir: &Path, keep: usize) -> Result<(), std::io::Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    if entries.len() > keep {
        for e in &entries[0..entries.len() - keep] {
            let _ = fs::remove_file(e.path());
        }
    }
    Ok(())
}

use async_trait::async_trait;

#[async_trait]
impl Repository for JsonStore {
    async fn create_deck(&self, user_id: UserId, name: &str) -> Result<Deck, CoreError> {
        let deck = Deck::new(user_id, name);
        {
            let mut s = self.state.write();
            if s.decks.values().any(|d| {
                d.user_id == user_id && !d.is_deleted() && d.name.eq_ignore_ascii_case(name)
            }) {
                return Err(CoreError::Conflict("deck name already exists"));
            }
            s.decks.insert(deck.id, deck.clone());
        }
        self.save().await?;
        Ok(deck)
    }

    async fn get_deck(&self, user_id: UserId, id: DeckId) -> Result<Deck, CoreError> {
        let s = self.state.read();
        s.owned_deck(user_id, id)
            .cloned()
            .ok_or(CoreError::NotFound("deck"))
    }

    async fn list_decks(&self, user_id: UserId) -> Result<Vec<Deck>, CoreError> {
        let s = self.state.read();
        Ok(s.decks
            .values()
            .filter(|d| d.user_id == user_id && !d.is_deleted())
            .cloned()
            .collect())
    }

    async fn delete_deck(&self, user_id: UserId, id: DeckId) -> Result<(), CoreError> {
        {
            let now = Utc::now();
            let mut s = self.state.write();
            match s.decks.get_mut(&id) {
                Some(d) if d.user_id == user_id && !d.is_deleted() => d.deleted_at = Some(now),
                _ => return Err(CoreError::NotFound("deck")),
            }
            let card_ids: Vec<CardId> = s
                .cards
                .values()
                .filter(|c| c.deck_id == id)
                .map(|c| c.id)
                .collect();
            for cid in card_ids {
                if let Some(c) = s.cards.get_mut(&cid) {
                    if c.deleted_at.is_none() {
                        c.deleted_at = Some(now);
                    }
                }
                if let Some(rows) = s.logs.get_mut(&cid) {
                    for row in rows.iter_mut() {
                        if row.deleted_at.is_none() {
                            row.deleted_at = Some(now);
                        }
                    }
                }
            }
        }
        self.save().await
    }

    async fn add_card(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        front: &str,
        back: &str,
    ) -> Result<Card, CoreError> {
        let card = {
            let s = self.state.read();
            if s.owned_deck(user_id, deck_id).is_none() {
                return Err(CoreError::NotFound("deck"));
            }
            Card::new(user_id, deck_id, front, back)
        };
        {
            let mut s = self.state.write();
            s.cards.insert(card.id, card.clone());
        }
        self.save().await?;
        Ok(card)
    }

    async fn get_card(&self, user_id: UserId, id: CardId) -> Result<Card, CoreError> {
        let s = self.state.read();
        s.owned_card(user_id, id)
            .cloned()
            .ok_or(CoreError::NotFound("card"))
    }

    async fn list_cards(
        &self,
        user_id: UserId,
        deck_id: Option<DeckId>,
    ) -> Result<Vec<Card>, CoreError> {
        let s = self.state.read();
        let mut v: Vec<Card> = s
            .cards
            .values()
            .filter(|c| c.user_id == user_id && !c.is_deleted())
            .cloned()
            .collect();
        if let Some(did) = deck_id {
            v.retain(|c| c.deck_id == did);
        }
        Ok(v)
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        {
            let mut s = self.state.write();
            match s.cards.get(&card.id) {
                Some(existing) if existing.user_id == card.user_id && !existing.is_deleted() => {}
                _ => return Err(CoreError::NotFound("card")),
            }
            s.cards.insert(card.id, card.clone());
        }
        self.save().await?;
        Ok(card.clone())
    }

    async fn delete_card(&self, user_id: UserId, id: CardId) -> Result<(), CoreError> {
        {
            let now = Utc::now();
            let mut s = self.state.write();
            match s.cards.get_mut(&id) {
                Some(c) if c.user_id == user_id && !c.is_deleted() => c.deleted_at = Some(now),
                _ => return Err(CoreError::NotFound("card")),
            }
            if let Some(rows) = s.logs.get_mut(&id) {
                for row in rows.iter_mut() {
                    if row.deleted_at.is_none() {
                        row.deleted_at = Some(now);
                    }
                }
            }
        }
        self.save().await
    }

    async fn commit_review(&self, card: &Card, log: &ReviewLog) -> Result<(), CoreError> {
        if card.id != log.card_id {
            return Err(CoreError::InconsistentCommit("card/log id mismatch"));
        }
        {
            // One mutation under one write lock: the file image always
            // carries the card update and its log row together.
            let mut s = self.state.write();
            match s.cards.get(&card.id) {
                Some(existing) if existing.user_id == card.user_id && !existing.is_deleted() => {}
                _ => return Err(CoreError::NotFound("card")),
            }
            let rows = s.logs.entry(log.card_id).or_default();
            if rows.iter().any(|r| r.reviewed_at == log.reviewed_at) {
                return Ok(());
            }
            rows.push(log.clone());
            s.cards.insert(card.id, card.clone());
        }
        self.save().await
    }

    async fn list_review_logs(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> Result<Vec<ReviewLog>, CoreError> {
        let s = self.state.read();
        let mut rows: Vec<ReviewLog> = s
            .logs
            .get(&card_id)
            .map(|v| {
                v.iter()
                    .filter(|r| r.user_id == user_id && r.deleted_at.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|r| (r.reviewed_at, r.id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{MemoryModel, Rating, ReviewRecorder, Scheduler};
    use std::sync::Arc;
    use uuid::Uuid;

    async fn open_temp() -> (JsonStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open_with(
            dir.path().join("recall.json"),
            dir.path().join("backups"),
            3,
        )
        .await
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn review_commit_survives_reload() {
        let (store, dir) = open_temp().await;
        let user = Uuid::new_v4();
        let deck = store.create_deck(user, "Spanish").await.unwrap();
        let card = store.add_card(user, deck.id, "hola", "hello").await.unwrap();

        let now = Utc::now();
        let update = MemoryModel::new()
            .commit(&card, Rating::Good, now)
            .await
            .unwrap();
        let store = Arc::new(store);
        ReviewRecorder::new(store.clone())
            .record(&update, Rating::Good, now)
            .await
            .unwrap();

        // Fresh handle over the same file sees both writes together.
        let reopened = JsonStore::open_with(
            dir.path().join("recall.json"),
            dir.path().join("backups"),
            3,
        )
        .await
        .unwrap();
        let stored = reopened.get_card(user, card.id).await.unwrap();
        assert_eq!(stored.reps, 1);
        let logs = reopened.list_review_logs(user, card.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].reviewed_at, now);
    }

    #[tokio::test]
    async fn soft_deleted_deck_cascades() {
        let (store, _dir) = open_temp().await;
        let user = Uuid::new_v4();
        let deck = store.create_deck(user, "Spanish").await.unwrap();
        let card = store.add_card(user, deck.id, "hola", "hello").await.unwrap();

        store.delete_deck(user, deck.id).await.unwrap();
        assert!(store.get_deck(user, deck.id).await.is_err());
        assert!(store.get_card(user, card.id).await.is_err());
        assert!(store.list_cards(user, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_commit_key_is_idempotent() {
        let (store, _dir) = open_temp().await;
        let user = Uuid::new_v4();
        let deck = store.create_deck(user, "Spanish").await.unwrap();
        let card = store.add_card(user, deck.id, "hola", "hello").await.unwrap();

        let now = Utc::now();
        let update = MemoryModel::new()
            .commit(&card, Rating::Easy, now)
            .await
            .unwrap();
        let store = Arc::new(store);
        let recorder = ReviewRecorder::new(store.clone());
        recorder.record(&update, Rating::Easy, now).await.unwrap();
        recorder.record(&update, Rating::Easy, now).await.unwrap();

        let logs = store.list_review_logs(user, card.id).await.unwrap();
        assert_eq!(logs.len(), 1);
    }
}
