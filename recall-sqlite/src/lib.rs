use chrono::{DateTime, Utc};
use recall_core::{
    repo::Repository, Card, CardId, CardState, CoreError, Deck, DeckId, Rating, ReviewLog, UserId,
};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;

pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|_| CoreError::Storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    pub async fn open_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|_| CoreError::Storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        // Create tables/indexes if they do not exist (mirrors migrations).
        const STMT: &str = r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS decks (
          id          TEXT PRIMARY KEY,
          user_id     TEXT NOT NULL,
          name        TEXT NOT NULL,
          created_at  TEXT NOT NULL,
          deleted_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS cards (
          id              TEXT PRIMARY KEY,
          user_id         TEXT NOT NULL,
          deck_id         TEXT NOT NULL,
          front           TEXT NOT NULL,
          back            TEXT NOT NULL,
          state           INTEGER NOT NULL DEFAULT 0,
          stability       REAL    NOT NULL DEFAULT 0,
          difficulty      REAL    NOT NULL DEFAULT 5,
          elapsed_days    REAL    NOT NULL DEFAULT 0,
          scheduled_days  REAL    NOT NULL DEFAULT 0,
          reps            INTEGER NOT NULL DEFAULT 0,
          lapses          INTEGER NOT NULL DEFAULT 0,
          due             TEXT    NOT NULL,
          last_review     TEXT,
          created_at      TEXT NOT NULL,
          deleted_at      TEXT,
          FOREIGN KEY(deck_id) REFERENCES decks(id)
        );

        CREATE TABLE IF NOT EXISTS review_logs (
          id              TEXT PRIMARY KEY,
          card_id         TEXT NOT NULL,
          user_id         TEXT NOT NULL,
          rating          INTEGER NOT NULL,
          state           INTEGER NOT NULL,
          stability       REAL NOT NULL,
          difficulty      REAL NOT NULL,
          elapsed_days    REAL NOT NULL,
          scheduled_days  REAL NOT NULL,
          last_interval   REAL NOT NULL,
          reviewed_at     TEXT NOT NULL,
          deleted_at      TEXT,
          FOREIGN KEY(card_id) REFERENCES cards(id)
        );

        CREATE INDEX IF NOT EXISTS idx_cards_user_deck_due ON cards (user_id, deck_id, due);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_logs_card_time ON review_logs (card_id, reviewed_at)
        "#;

        // Execute statements one by one for compatibility.
        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|_| CoreError::Storage("sqlite schema"))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Repository for SqliteRepo {
    // ===== Decks =====
    async fn create_deck(&self, user_id: UserId, name: &str) -> Result<Deck, CoreError> {
        let exists = sqlx::query(
            "SELECT 1 FROM decks WHERE user_id=? AND lower(name)=lower(?) AND deleted_at IS NULL LIMIT 1",
        )
        .bind(user_id.to_string())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("read deck"))?
        .is_some();
        if exists {
            return Err(CoreError::Conflict("deck name already exists"));
        }

        let deck = Deck::new(user_id, name);
        sqlx::query("INSERT INTO decks (id,user_id,name,created_at,deleted_at) VALUES (?,?,?,?,NULL)")
            .bind(deck.id.to_string())
            .bind(deck.user_id.to_string())
            .bind(&deck.name)
            .bind(dt_to_str(deck.created_at))
            .execute(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("insert deck"))?;
        Ok(deck)
    }

    async fn get_deck(&self, user_id: UserId, id: DeckId) -> Result<Deck, CoreError> {
        let row = sqlx::query(
            "SELECT id,user_id,name,created_at,deleted_at FROM decks
             WHERE id=? AND user_id=? AND deleted_at IS NULL",
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("read deck"))?;
        let row = row.ok_or(CoreError::NotFound("deck"))?;
        row_into_deck(row)
    }

    async fn list_decks(&self, user_id: UserId) -> Result<Vec<Deck>, CoreError> {
        let rows = sqlx::query(
            "SELECT id,user_id,name,created_at,deleted_at FROM decks
             WHERE user_id=? AND deleted_at IS NULL ORDER BY created_at ASC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("list decks"))?;
        rows.into_iter().map(row_into_deck).collect()
    }

    async fn delete_deck(&self, user_id: UserId, id: DeckId) -> Result<(), CoreError> {
        let now = dt_to_str(Utc::now());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| CoreError::Storage("tx"))?;

        let res = sqlx::query(
            "UPDATE decks SET deleted_at=? WHERE id=? AND user_id=? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("del deck"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("deck"));
        }

        sqlx::query(
            "UPDATE review_logs SET deleted_at=? WHERE deleted_at IS NULL
             AND card_id IN (SELECT id FROM cards WHERE deck_id=?)",
        )
        .bind(&now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("del logs"))?;

        sqlx::query("UPDATE cards SET deleted_at=? WHERE deck_id=? AND deleted_at IS NULL")
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del cards"))?;

        tx.commit()
            .await
            .map_err(|_| CoreError::Storage("tx commit"))
    }

    // ===== Cards =====
    async fn add_card(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        front: &str,
        back: &str,
    ) -> Result<Card, CoreError> {
        let exists = sqlx::query(
            "SELECT 1 FROM decks WHERE id=? AND user_id=? AND deleted_at IS NULL LIMIT 1",
        )
        .bind(deck_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("read deck"))?
        .is_some();
        if !exists {
            return Err(CoreError::NotFound("deck"));
        }

        let card = Card::new(user_id, deck_id, front, back);
        sqlx::query(
            r#"
            INSERT INTO cards (
              id, user_id, deck_id, front, back, state, stability, difficulty,
              elapsed_days, scheduled_days, reps, lapses, due, last_review,
              created_at, deleted_at
            )
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,NULL)
            "#,
        )
        .bind(card.id.to_string())
        .bind(card.user_id.to_string())
        .bind(card.deck_id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.state.as_ordinal())
        .bind(card.stability)
        .bind(card.difficulty)
        .bind(card.elapsed_days)
        .bind(card.scheduled_days)
        .bind(card.reps as i64)
        .bind(card.lapses as i64)
        .bind(dt_to_str(card.due))
        .bind(card.last_review.map(dt_to_str))
        .bind(dt_to_str(card.created_at))
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("insert card"))?;

        Ok(card)
    }

    async fn get_card(&self, user_id: UserId, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(
            &format!("SELECT {CARD_COLS} FROM cards WHERE id=? AND user_id=? AND deleted_at IS NULL"),
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("read card"))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(row)
    }

    async fn list_cards(
        &self,
        user_id: UserId,
        deck_id: Option<DeckId>,
    ) -> Result<Vec<Card>, CoreError> {
        let rows = if let Some(did) = deck_id {
            sqlx::query(&format!(
                "SELECT {CARD_COLS} FROM cards
                 WHERE user_id=? AND deck_id=? AND deleted_at IS NULL ORDER BY created_at ASC"
            ))
            .bind(user_id.to_string())
            .bind(did.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("list cards"))?
        } else {
            sqlx::query(&format!(
                "SELECT {CARD_COLS} FROM cards
                 WHERE user_id=? AND deleted_at IS NULL ORDER BY created_at ASC"
            ))
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("list cards"))?
        };
        rows.into_iter().map(row_into_card).collect()
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              deck_id=?, front=?, back=?, state=?, stability=?, difficulty=?,
              elapsed_days=?, scheduled_days=?, reps=?, lapses=?, due=?,
              last_review=?, created_at=?
            WHERE id=? AND user_id=? AND deleted_at IS NULL
            "#,
        )
        .bind(card.deck_id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(card.state.as_ordinal())
        .bind(card.stability)
        .bind(card.difficulty)
        .bind(card.elapsed_days)
        .bind(card.scheduled_days)
        .bind(card.reps as i64)
        .bind(card.lapses as i64)
        .bind(dt_to_str(card.due))
        .bind(card.last_review.map(dt_to_str))
        .bind(dt_to_str(card.created_at))
        .bind(card.id.to_string())
        .bind(card.user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("update card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, user_id: UserId, id: CardId) -> Result<(), CoreError> {
        let now = dt_to_str(Utc::now());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| CoreError::Storage("tx"))?;
        let res = sqlx::query(
            "UPDATE cards SET deleted_at=? WHERE id=? AND user_id=? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("del card"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        }
        sqlx::query("UPDATE review_logs SET deleted_at=? WHERE card_id=? AND deleted_at IS NULL")
            .bind(&now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del logs"))?;
        tx.commit()
            .await
            .map_err(|_| CoreError::Storage("tx commit"))
    }

    // ===== Reviews =====
    async fn commit_review(&self, card: &Card, log: &ReviewLog) -> Result<(), CoreError> {
        if card.id != log.card_id {
            return Err(CoreError::InconsistentCommit("card/log id mismatch"));
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| CoreError::Storage("tx"))?;

        // Replay guard: the UNIQUE (card_id, reviewed_at) index backs
        // idempotent insertion, so a retried commit is a no-op.
        let replayed = sqlx::query(
            "SELECT 1 FROM review_logs WHERE card_id=? AND reviewed_at=? LIMIT 1",
        )
        .bind(log.card_id.to_string())
        .bind(dt_to_str(log.reviewed_at))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("read log"))?
        .is_some();
        if replayed {
            tx.rollback().await.ok();
            return Ok(());
        }

        let res = sqlx::query(
            r#"
            UPDATE cards SET
              state=?, stability=?, difficulty=?, elapsed_days=?, scheduled_days=?,
              reps=?, lapses=?, due=?, last_review=?
            WHERE id=? AND user_id=? AND deleted_at IS NULL
            "#,
        )
        .bind(card.state.as_ordinal())
        .bind(card.stability)
        .bind(card.difficulty)
        .bind(card.elapsed_days)
        .bind(card.scheduled_days)
        .bind(card.reps as i64)
        .bind(card.lapses as i64)
        .bind(dt_to_str(card.due))
        .bind(card.last_review.map(dt_to_str))
        .bind(card.id.to_string())
        .bind(card.user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("update card"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        }

        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO review_logs (
              id, card_id, user_id, rating, state, stability, difficulty,
              elapsed_days, scheduled_days, last_interval, reviewed_at, deleted_at
            )
            VALUES (?,?,?,?,?,?,?,?,?,?,?,NULL)
            "#,
        )
        .bind(log.id.to_string())
        .bind(log.card_id.to_string())
        .bind(log.user_id.to_string())
        .bind(log.rating.as_ordinal())
        .bind(log.state.as_ordinal())
        .bind(log.stability)
        .bind(log.difficulty)
        .bind(log.elapsed_days)
        .bind(log.scheduled_days)
        .bind(log.last_interval)
        .bind(dt_to_str(log.reviewed_at))
        .execute(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("insert log"))?;
        if res.rows_affected() == 0 {
            // The pre-check said the row was absent; diverging here means
            // the two writes no longer agree.
            tx.rollback().await.ok();
            return Err(CoreError::InconsistentCommit("log insert lost"));
        }

        tx.commit()
            .await
            .map_err(|_| CoreError::Storage("tx commit"))
    }

    async fn list_review_logs(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> Result<Vec<ReviewLog>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT id,card_id,user_id,rating,state,stability,difficulty,
                      elapsed_days,scheduled_days,last_interval,reviewed_at,deleted_at
               FROM review_logs
               WHERE card_id=? AND user_id=? AND deleted_at IS NULL
               ORDER BY reviewed_at ASC"#,
        )
        .bind(card_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("list logs"))?;
        rows.into_iter().map(row_into_log).collect()
    }
}

const CARD_COLS: &str = "id,user_id,deck_id,front,back,state,stability,difficulty,\
elapsed_days,scheduled_days,reps,lapses,due,last_review,created_at,deleted_at";

// ===== Helpers =====
fn uuid_from_str(s: String) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(&s).map_err(|_| CoreError::Invalid("uuid"))
}

fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::Invalid("datetime"))
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_into_deck(row: sqlx::sqlite::SqliteRow) -> Result<Deck, CoreError> {
    Ok(Deck {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        user_id: uuid_from_str(row.get::<String, _>("user_id"))?,
        name: row.get::<String, _>("name"),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        deleted_at: row
            .get::<Option<String>, _>("deleted_at")
            .map(dt_from_str)
            .transpose()?,
    })
}

fn row_into_card(row: sqlx::sqlite::SqliteRow) -> Result<Card, CoreError> {
    Ok(Card {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        user_id: uuid_from_str(row.get::<String, _>("user_id"))?,
        deck_id: uuid_from_str(row.get::<String, _>("deck_id"))?,
        front: row.get::<String, _>("front"),
        back: row.get::<String, _>("back"),
        state: CardState::from_ordinal(row.get::<i64, _>("state"))
            .ok_or(CoreError::Invalid("state"))?,
        stability: row.get::<f64, _>("stability"),
        difficulty: row.get::<f64, _>("difficulty"),
        elapsed_days: row.get::<f64, _>("elapsed_days"),
        scheduled_days: row.get::<f64, _>("scheduled_days"),
        reps: row.get::<i64, _>("reps") as u32,
        lapses: row.get::<i64, _>("lapses") as u32,
        due: dt_from_str(row.get::<String, _>("due"))?,
        last_review: row
            .get::<Option<String>, _>("last_review")
            .map(dt_from_str)
            .transpose()?,
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
        deleted_at: row
            .get::<Option<String>, _>("deleted_at")
            .map(dt_from_str)
            .transpose()?,
    })
}

fn row_into_log(row: sqlx::sqlite::SqliteRow) -> Result<ReviewLog, CoreError> {
    Ok(ReviewLog {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        card_id: uuid_from_str(row.get::<String, _>("card_id"))?,
        user_id: uuid_from_str(row.get::<String, _>("user_id"))?,
        rating: Rating::from_ordinal(row.get::<i64, _>("rating"))
            .ok_or(CoreError::Invalid("rating"))?,
        state: CardState::from_ordinal(row.get::<i64, _>("state"))
            .ok_or(CoreError::Invalid("state"))?,
        stability: row.get::<f64, _>("stability"),
        difficulty: row.get::<f64, _>("difficulty"),
        elapsed_days: row.get::<f64, _>("elapsed_days"),
        scheduled_days: row.get::<f64, _>("scheduled_days"),
        last_interval: row.get::<f64, _>("last_interval"),
        reviewed_at: dt_from_str(row.get::<String, _>("reviewed_at"))?,
        deleted_at: row
            .get::<Option<String>, _>("deleted_at")
            .map(dt_from_str)
            .transpose()?,
    })
}
