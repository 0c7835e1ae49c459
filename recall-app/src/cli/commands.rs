use crate::api::server as api_server;
use crate::cli::opts::*;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use recall_core::{
    CoreError, Deck, MemoryModel, Rating, RatingPreviews, Repository, StudySession, UserId,
};
use recall_json::paths::data_root;
use recall_json::JsonStore;
use recall_sqlite::SqliteRepo;
use std::io::{stdin, stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub async fn run_cli(args: Cli) -> Result<()> {
    let user = args.user.unwrap_or(Uuid::nil());
    let repo = open_repo(&args.store, args.db_path.clone()).await?;
    match args.cmd {
        Command::Deck(cmd) => deck_cmd(repo, user, cmd).await,
        Command::Card(cmd) => card_cmd(repo, user, cmd).await,
        Command::Study(cmd) => study_cmd(repo, user, cmd).await,
        Command::Api(api) => {
            let addr: std::net::SocketAddr = api.addr.parse()?;
            api_server::run(repo, addr).await
        }
    }
}

pub async fn open_repo(store: &StoreKind, db_path: Option<PathBuf>) -> Result<Arc<dyn Repository>> {
    match store {
        StoreKind::Json => {
            let s = JsonStore::open_default().await?;
            Ok(Arc::new(s))
        }
        StoreKind::Sqlite => {
            let p = db_path.unwrap_or_else(|| data_root().join("recall.sqlite3"));
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let s = SqliteRepo::open_file(&p).await?;
            Ok(Arc::new(s))
        }
    }
}

async fn deck_cmd(repo: Arc<dyn Repository>, user: UserId, cmd: DeckCmd) -> Result<()> {
    match cmd {
        DeckCmd::Add { name } => {
            let d = repo.create_deck(user, &name).await?;
            println!("{}", d.id);
        }
        DeckCmd::List => {
            let mut v = repo.list_decks(user).await?;
            v.sort_by_key(|d| d.created_at);
            for d in v {
                println!("{}\t{}", d.id, d.name);
            }
        }
        DeckCmd::Rm { deck } => {
            let d = resolve_deck(&*repo, user, &deck).await?;
            repo.delete_deck(user, d.id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn card_cmd(repo: Arc<dyn Repository>, user: UserId, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let deck = resolve_deck(&*repo, user, &a.deck).await?;
            let c = repo.add_card(user, deck.id, &a.front, &a.back).await?;
            println!("{}", c.id);
        }
        CardCmd::List { deck } => {
            let deck_id = if let Some(sel) = deck {
                Some(resolve_deck(&*repo, user, &sel).await?.id)
            } else {
                None
            };
            let mut cards = repo.list_cards(user, deck_id).await?;
            cards.sort_by_key(|c| c.created_at);
            for c in cards {
                println!(
                    "{}\t{}\t{}\tdeck={}\tstate={:?}\tdue={}",
                    c.id, c.front, c.back, c.deck_id, c.state, c.due
                );
            }
        }
        CardCmd::Rm { card_id } => {
            let id = parse_uuid(&card_id)?;
            repo.delete_card(user, id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn study_cmd(repo: Arc<dyn Repository>, user: UserId, cmd: StudyCmd) -> Result<()> {
    let now = Utc::now();
    let deck = resolve_deck(&*repo, user, &cmd.deck).await?;
    let scheduler = Arc::new(MemoryModel::new());
    let mut session =
        StudySession::start(repo, scheduler, user, deck.id, now, cmd.max_new).await;

    if session.is_complete() {
        println!("nothing due");
        return Ok(());
    }

    loop {
        let now = Utc::now();
        let card = match session.peek() {
            Ok(c) => c.clone(),
            Err(CoreError::EmptyQueue) => break,
            Err(e) => return Err(e.into()),
        };

        println!("\n[{} left] {}", session.remaining(), card.id);
        println!("Q: {}", card.front);
        prompt_enter("[enter=show]")?;
        println!("A: {}", card.back);

        let previews = session.preview(now).await?;
        println!("{}", preview_line(&previews, now));
        println!("[1=Again, 2=Hard, 3=Good, 4=Easy, q=quit]");

        let rating = loop {
            let line = read_line("rate> ")?;
            match parse_rating(line.trim()) {
                Some(r) => break r,
                None if line.trim().eq_ignore_ascii_case("q") => return Ok(()),
                None => println!("enter 1/2/3/4 or q"),
            }
        };

        let outcome = session.answer(rating, Utc::now()).await?;
        if outcome.requeued {
            println!("→ back later this session ({})", format_until(outcome.card.due, now));
        } else {
            println!("→ next due {}", format_until(outcome.card.due, now));
        }
    }

    println!("\nsession complete");
    Ok(())
}

pub fn parse_rating(s: &str) -> Option<Rating> {
    match s.to_lowercase().as_str() {
        "1" | "a" | "again" => Some(Rating::Again),
        "2" | "h" | "hard" => Some(Rating::Hard),
        "3" | "g" | "good" => Some(Rating::Good),
        "4" | "e" | "easy" => Some(Rating::Easy),
        _ => None,
    }
}

fn preview_line(p: &RatingPreviews, now: DateTime<Utc>) -> String {
    format!(
        "again {} | hard {} | good {} | easy {}",
        format_until(p.again, now),
        format_until(p.hard, now),
        format_until(p.good, now),
        format_until(p.easy, now),
    )
}

/// Compact "time until due" for the preview line.
pub fn format_until(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let mins = (due - now).num_minutes();
    if mins < 1 {
        "now".to_string()
    } else if mins < 60 {
        format!("{}m", mins)
    } else if mins < 24 * 60 {
        format!("{}h", mins / 60)
    } else {
        let days = mins / (24 * 60);
        if days < 30 {
            format!("{}d", days)
        } else if days < 365 {
            format!("{}mo", days / 30)
        } else {
            format!("{}y", days / 365)
        }
    }
}

// ===== Helpers =====
fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| anyhow!("invalid uuid"))
}

pub async fn resolve_deck<R: Repository + ?Sized>(
    repo: &R,
    user: UserId,
    sel: &str,
) -> Result<Deck> {
    if let Ok(id) = Uuid::parse_str(sel) {
        if let Ok(d) = repo.get_deck(user, id).await {
            return Ok(d);
        }
    }
    let decks = repo.list_decks(user).await?;
    if let Some(d) = decks.into_iter().find(|d| d.name.eq_ignore_ascii_case(sel)) {
        return Ok(d);
    }
    bail!("deck not found: {}", sel)
}

fn prompt_enter(label: &str) -> Result<()> {
    print!("{label}");
    stdout().flush().ok();
    let mut s = String::new();
    stdin().read_line(&mut s)?;
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    stdout().flush().ok();
    let mut s = String::new();
    stdin().read_line(&mut s)?;
    Ok(s)
}
