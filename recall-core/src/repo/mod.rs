use crate::{Card, CardId, CoreError, Deck, DeckId, ReviewLog, UserId};
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryRepo;

/// Shared card and review-log store. All reads are scoped to the owning user
/// and exclude soft-deleted rows; `NotFound` covers missing, deleted and
/// unowned rows alike, so callers cannot distinguish the three.
#[async_trait]
pub trait Repository: Send + Sync {
    // Decks
    async fn create_deck(&self, user_id: UserId, name: &str) -> Result<Deck, CoreError>;
    async fn get_deck(&self, user_id: UserId, id: DeckId) -> Result<Deck, CoreError>;
    async fn list_decks(&self, user_id: UserId) -> Result<Vec<Deck>, CoreError>;
    /// Soft-deletes the deck, its cards, and their logs in bulk.
    async fn delete_deck(&self, user_id: UserId, id: DeckId) -> Result<(), CoreError>;

    // Cards
    async fn add_card(
        &self,
        user_id: UserId,
        deck_id: DeckId,
        front: &str,
        back: &str,
    ) -> Result<Card, CoreError>;
    async fn get_card(&self, user_id: UserId, id: CardId) -> Result<Card, CoreError>;
    async fn list_cards(
        &self,
        user_id: UserId,
        deck_id: Option<DeckId>,
    ) -> Result<Vec<Card>, CoreError>;
    async fn update_card(&self, card: &Card) -> Result<Card, CoreError>;
    async fn delete_card(&self, user_id: UserId, id: CardId) -> Result<(), CoreError>;

    // Reviews
    /// Atomically writes the card's new memory state and appends one log row.
    /// A reader must never observe one write without the other. Insertion is
    /// idempotent keyed by `(card_id, reviewed_at)`, so a retried commit
    /// cannot duplicate the log.
    async fn commit_review(&self, card: &Card, log: &ReviewLog) -> Result<(), CoreError>;
    /// Logs for one card, ascending by review time — the read surface for
    /// the statistics collaborator.
    async fn list_review_logs(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> Result<Vec<ReviewLog>, CoreError>;
}
