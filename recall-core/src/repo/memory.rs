use crate::{Card, CardId, CoreError, Deck, DeckId, ReviewLog, UserId};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryRepo {
    decks: RwLock<HashMap<DeckId, Deck>>,
    cards: RwLock<HashMap<CardId, Card>>,
    logs: RwLock<HashMap<CardId, Vec<ReviewLog>>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned_deck<'a>(
    decks: &'a HashMap<DeckId, Deck>,
    user_id: UserId,
    id: DeckId,
) -> Option<&'a Deck> {
    decks
        .get(&id)
        .filter(|d| d.user_id == user_id && !d.is_deleted())
}

fn owned_card<'a>(
    cards: &'a HashMap<CardId, Card>,
    user_id: UserId,
    id: CardId,
) -> Option<&'a Card> {
    cards
        .get(&id)
        .filter(|c| c.user_id == user_id && !c.is_deleted())
}

#[async_trait]
impl crate::repo::Repository for MemoryRepo {
    async fn create_deck(&self, user_id: UserId, name: &str) -> Result<Deck, CoreError> {
        let deck = Deck::new(user_id, name);
        let mut m = self.decks.write();
        if m.values()
            .any(|d| d.user_id == user_id && !d.is_deleted() && d.name.eq_ignore_ascii_case(name))
        {
            return Err(CoreError::Conflict("deck name already exists"));
        }
        m.insert(deck.id, deck.clone());
        Ok(deck)
    }

    async fn get_deck(&self, user_id: UserId, id: DeckId) -> Result<Deck, CoreError> {
        owned_deck(&self.decks.read(), user_id, id)
            .cloned()
            .ok_or(CoreError::NotFound("deck"))
    }

    async fn list_decks(&self, user_id: UserId) -> Result<Vec<Deck>, CoreError> {
        Ok(self
            .decks
            .read()
            .values()
            .filter(|d| d.user_id == user_id && !d.is_deleted())
            .cloned()
            .collect())
    }

    async fn delete_deck(&self, user_id: UserId, id: DeckId) -> Result<(), CoreError> {
        let now = Utc::now();
        let mut decks = self.decks.write();
        let deck = decks
            .get_mut(&id)
            .filter(|d| d.user_id == user_id && !d.is_deleted())
            .ok_or(CoreError::NotFound("deck"))?;
        deck.deleted_at = Some(now);

        let mut cards = self.cards.write();
        let mut logs = self.logs.write();
        for card in cards.values_mut().filter(|c| c.deck_id == id) {
            if card.deleted_at.is_none() {
                card.deleted_at = Some(now);
            }
            if let Some(rows) = logs.get_mut(&card.id) {
                for row in rows.iter_mut() {
                    if row.deleted_at.is_none() {
                        row.deleted_at = Some(now);
                    }
                }
            }
        }
        Ok(())
    }

    async fn add_card(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        front: &str,
        back: &str,
    ) -> Result<Card, CoreError> {
        if owned_deck(&self.decks.read(), user_id, deck_id).is_none() {
            return Err(CoreError::NotFound("deck"));
        }
        let card = Card::new(user_id, deck_id, front, back);
        self.cards.write().insert(card.id, card.clone());
        Ok(card)
    }

    async fn get_card(&self, user_id: UserId, id: CardId) -> Result<Card, CoreError> {
        owned_card(&self.cards.read(), user_id, id)
            .cloned()
            .ok_or(CoreError::NotFound("card"))
    }

    async fn list_cards(
        &self,
        user_id: UserId,
        deck_id: Option<DeckId>,
    ) -> Result<Vec<Card>, CoreError> {
        let cards = self.cards.read();
        let mut v: Vec<Card> = cards
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
        let mut m = self.cards.write();
        match m.get(&card.id) {
            Some(existing) if existing.user_id == card.user_id && !existing.is_deleted() => {
                m.insert(card.id, card.clone());
                Ok(card.clone())
            }
            _ => Err(CoreError::NotFound("card")),
        }
    }

    async fn delete_card(&self, user_id: UserId, id: CardId) -> Result<(), CoreError> {
        let now = Utc::now();
        let mut cards = self.cards.write();
        let card = cards
            .get_mut(&id)
            .filter(|c| c.user_id == user_id && !c.is_deleted())
            .ok_or(CoreError::NotFound("card"))?;
        card.deleted_at = Some(now);
        if let Some(rows) = self.logs.write().get_mut(&id) {
            for row in rows.iter_mut() {
                if row.deleted_at.is_none() {
                    row.deleted_at = Some(now);
                }
            }
        }
        Ok(())
    }

    async fn commit_review(&self, card: &Card, log: &ReviewLog) -> Result<(), CoreError> {
        if card.id != log.card_id {
            return Err(CoreError::InconsistentCommit("card/log id mismatch"));
        }
        // Both writes happen under the card lock, so no reader can observe
        // the new memory state without the log row or vice versa.
        let mut cards = self.cards.write();
        let mut logs = self.logs.write();
        match cards.get(&card.id) {
            Some(existing) if existing.user_id == card.user_id && !existing.is_deleted() => {}
            _ => return Err(CoreError::NotFound("card")),
        }
        let rows = logs.entry(log.card_id).or_default();
        if rows
            .iter()
            .any(|r| r.card_id == log.card_id && r.reviewed_at == log.reviewed_at)
        {
            // Replayed commit: the pair is already on disk, keep it single.
            return Ok(());
        }
        cards.insert(card.id, card.clone());
        rows.push(log.clone());
        Ok(())
    }

    async fn list_review_logs(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> Result<Vec<ReviewLog>, CoreError> {
        let mut rows: Vec<ReviewLog> = self
            .logs
            .read()
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
