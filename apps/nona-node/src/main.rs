use anyhow::Context;
use clap::Parser;
use nona_chat::rooms::{compute_expiry_label, created_label};
use nona_chat::{
    Backend, ChatClient, ChatConfig, DrainReport, DurableQueue, InMemoryBackend, MemoryQueue,
    Message, MessageKind, PendingMedia, Room, RoomKind, SendOutcome,
};
use nona_store::{open_database, PersistentQueue, StoreConfig};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Nona - anonymous group chat in the terminal, against an in-process backend
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite file for the offline outbox (kept in memory when omitted)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Create ephemeral rooms with `create` instead of public ones
    #[arg(long)]
    ephemeral: bool,

    /// Upper bound on a single backend call, in seconds
    #[arg(long, default_value = "15")]
    timeout_secs: u64,

    /// Queue a message in the outbox when an online send fails
    #[arg(long)]
    queue_on_failure: bool,
}

fn show_help() {
    println!("\n📖 Available Commands:");
    println!("  help, ?                  Show this help");
    println!("  rooms                    List rooms");
    println!("  create <name> [desc]     Create a room");
    println!("  temp <name> [desc]       Create an ephemeral room");
    println!("  join <room>              Join a room (number or id)");
    println!("  leave <room>             Leave a room");
    println!("  select <room>            Open a room");
    println!("  send <text>              Send to the open room");
    println!("  attach <path>            Send a file to the open room");
    println!("  edit <n> <text>          Edit message n");
    println!("  delete <n>               Delete message n");
    println!("  react <n> <emoji>        React to message n");
    println!("  unreact <n> <emoji>      Withdraw a reaction");
    println!("  typing on|off            Publish typing state");
    println!("  offline / online         Simulate connectivity changes");
    println!("  outage on|off            Make the backend unreachable");
    println!("  pending                  Show queued messages");
    println!("  drain                    Deliver queued messages now");
    println!("  clear                    Discard queued messages");
    println!("  whoami                   Show the current identity");
    println!("  rename <name>            Change display name");
    println!("  quit, exit, q            Exit");
}

/// Prompt carrying the offline indicator and the outbox badge
fn prompt(offline: bool, pending: usize) -> String {
    let mut prompt = String::new();
    if offline {
        prompt.push_str("📴 offline ");
    }
    if pending > 0 {
        prompt.push_str(&format!("[📮 {}] ", pending));
    }
    prompt.push_str("> ");
    prompt
}

struct Repl {
    client: Arc<ChatClient>,
    backend: Arc<InMemoryBackend>,
    default_kind: RoomKind,
}

impl Repl {
    fn resolve_room(&self, reference: &str) -> Option<Room> {
        let rooms = self.client.room_list();
        match reference.parse::<usize>() {
            Ok(n) if n >= 1 => rooms.get(n - 1).cloned(),
            _ => rooms.into_iter().find(|r| r.id == reference),
        }
    }

    fn resolve_message(&self, reference: &str) -> Option<Message> {
        let n: usize = reference.parse().ok()?;
        self.client
            .visible_messages()
            .get(n.checked_sub(1)?)
            .cloned()
    }

    fn print_rooms(&self) {
        let now = chrono::Utc::now();
        let rooms = self.client.room_list();
        if rooms.is_empty() {
            println!("📭 No rooms yet");
            return;
        }
        let (public, ephemeral) = nona_chat::rooms::partition(&rooms);
        let position = |room: &Room| rooms.iter().position(|r| r.id == room.id).unwrap_or(0) + 1;

        println!("\n🏠 Public rooms:");
        for room in &public {
            println!(
                "  {:>2}. {} ({} members, {})",
                position(room),
                room.name,
                room.member_count,
                created_label(room, now)
            );
        }
        println!("⏳ Ephemeral rooms:");
        for room in &ephemeral {
            let expiry = compute_expiry_label(room, now)
                .map(|label| label.to_string())
                .unwrap_or_default();
            println!(
                "  {:>2}. {} ({} members, {})",
                position(room),
                room.name,
                room.member_count,
                expiry
            );
        }
    }

    async fn print_pending(&self) -> anyhow::Result<()> {
        let pending = self.client.outbox().list_pending().await?;
        if pending.is_empty() {
            println!("📭 Outbox is empty");
        }
        for (i, entry) in pending.iter().enumerate() {
            println!(
                "  {:>2}. [{}] {:?} {}",
                i + 1,
                entry.room_id,
                entry.kind,
                entry.content
            );
        }
        Ok(())
    }

    fn report_send(&self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Sent(message) => debug!("Sent {}", message.id),
            SendOutcome::Queued(entry) => println!(
                "📮 Queued (pending: {}) {}",
                self.client.outbox().pending_count(),
                entry.id
            ),
        }
    }

    /// Returns false when the user asked to quit
    async fn process_command(&self, input: &str) -> anyhow::Result<bool> {
        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (input, ""),
        };

        match command {
            "help" | "?" | "h" => show_help(),
            "quit" | "exit" | "q" => return Ok(false),
            "rooms" | "r" => self.print_rooms(),
            "create" | "temp" => {
                let kind = if command == "temp" {
                    RoomKind::Ephemeral
                } else {
                    self.default_kind
                };
                let (name, description) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let room = self.client.rooms().create(name, description, kind).await?;
                println!("✅ Created {:?} room '{}' ({})", room.kind, room.name, room.id);
            }
            "join" | "leave" | "select" => {
                let room = self
                    .resolve_room(rest)
                    .with_context(|| format!("no room '{}'", rest))?;
                match command {
                    "join" => self.client.rooms().join(&room.id).await?,
                    "leave" => self.client.rooms().leave(&room.id).await?,
                    _ => {
                        println!("💬 Now in '{}'", room.name);
                        self.client.select_room(room).await?;
                    }
                }
            }
            "send" | "s" => {
                let outcome = self
                    .client
                    .send_message(rest, MessageKind::Text, None)
                    .await?;
                self.report_send(outcome);
            }
            "attach" => {
                let media = PendingMedia::from_path(rest)
                    .await
                    .with_context(|| format!("cannot read {}", rest))?;
                let kind = MessageKind::from_file_name(&media.file_name);
                let outcome = self.client.send_message("", kind, Some(media)).await?;
                self.report_send(outcome);
            }
            "edit" | "delete" | "react" | "unreact" => {
                let (reference, argument) =
                    rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let message = self
                    .resolve_message(reference)
                    .with_context(|| format!("no message '{}'", reference))?;
                let messages = self.client.messages();
                match command {
                    "edit" => messages.edit(&message.id, argument).await?,
                    "delete" => messages.soft_delete(&message.id).await?,
                    "react" => messages.add_reaction(&message.id, argument.trim()).await?,
                    _ => messages.remove_reaction(&message.id, argument.trim()).await?,
                }
            }
            "typing" => self.client.set_typing(rest == "on").await?,
            "offline" => {
                self.client.set_offline();
                println!("📴 Offline, messages will be queued");
            }
            "online" => {
                self.client.set_online();
                println!("📶 Online");
            }
            "outage" => {
                self.backend.set_available(rest != "on");
                println!("🔌 Backend reachable: {}", rest != "on");
            }
            "pending" => self.print_pending().await?,
            "drain" => match self.client.drain_outbox().await? {
                DrainReport::AlreadyRunning => println!("⏳ A drain is already running"),
                DrainReport::Completed { delivered } => println!("✅ Delivered {}", delivered),
                DrainReport::Halted {
                    delivered,
                    remaining,
                    reason,
                } => println!(
                    "⚠️  Delivered {}, {} still queued: {}",
                    delivered, remaining, reason
                ),
                DrainReport::Cleared { delivered } => {
                    println!("🧹 Outbox cleared mid-drain after {} delivered", delivered)
                }
            },
            "clear" => {
                self.client.outbox().clear().await?;
                println!("🗑️  Outbox cleared");
            }
            "whoami" => match self.client.session().current_user() {
                Some(user) => println!(
                    "👤 {} ({})",
                    user.display_name.unwrap_or_else(|| "unnamed".to_string()),
                    user.uid
                ),
                None => println!("👤 Signed out"),
            },
            "rename" => {
                let user = self.client.session().update_username(rest).await?;
                println!("📝 Now known as {}", user.display_name.unwrap_or_default());
            }
            other => println!("❓ Unknown command '{}', type 'help'", other),
        }
        Ok(true)
    }
}

fn print_new_messages(messages: &[Message], shown: &mut HashSet<String>, self_id: &str) {
    for (i, message) in messages.iter().enumerate() {
        if !shown.insert(message.id.clone()) {
            continue;
        }
        let who = if message.author_id == self_id {
            "me"
        } else {
            message.author_id.as_str()
        };
        let body = match &message.media {
            Some(media) => format!("[{:?}] {}", message.kind, media.file_name),
            None => message.content.clone(),
        };
        let edited = if message.is_edited { " (edited)" } else { "" };
        println!(
            "\r  {:>2}. {} {}: {}{}",
            i + 1,
            message.created_at.format("%H:%M"),
            who,
            body,
            edited
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let queue: Arc<dyn DurableQueue> = match &args.db {
        Some(path) => {
            let db = open_database(&StoreConfig {
                db_path: path.clone(),
            })
            .await?;
            Arc::new(PersistentQueue::new(db))
        }
        None => Arc::new(MemoryQueue::new()),
    };

    let config = ChatConfig {
        remote_timeout: Duration::from_secs(args.timeout_secs),
        queue_on_send_failure: args.queue_on_failure,
        ..ChatConfig::default()
    };

    let backend = Arc::new(InMemoryBackend::new());
    let client = ChatClient::new(Backend::from_shared(backend.clone()), queue, config)
        .await
        .context("Failed to start chat client")?;

    let user = client.session().sign_in_as_guest().await?;
    client.start().await?;
    println!(
        "👋 Welcome, {}! Type 'help' for commands.",
        user.display_name.as_deref().unwrap_or("guest")
    );
    if client.outbox().pending_count() > 0 {
        println!(
            "📮 {} messages from a previous session are waiting, type 'drain'",
            client.outbox().pending_count()
        );
    }

    let repl = Repl {
        client: client.clone(),
        backend,
        default_kind: if args.ephemeral {
            RoomKind::Ephemeral
        } else {
            RoomKind::Public
        },
    };

    let (stdin_sender, mut stdin_receiver) = tokio::sync::mpsc::unbounded_channel::<String>();
    let stdin_handle = tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut stdin = BufReader::new(tokio::io::stdin());
        let mut line = String::new();

        loop {
            line.clear();
            match stdin.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() && stdin_sender.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut messages = client.watch_messages();
    let mut pending = client.outbox().watch_pending();
    let mut current_room = client.watch_current_room();
    let mut shown = HashSet::new();

    let mut running = true;
    while running {
        print!(
            "{}",
            prompt(client.is_offline(), client.outbox().pending_count())
        );
        io::stdout().flush()?;

        tokio::select! {
            Ok(()) = messages.changed() => {
                let self_id = client.session().current_user().map(|u| u.uid).unwrap_or_default();
                let visible = messages.borrow_and_update().clone();
                print_new_messages(&visible, &mut shown, &self_id);
            }

            Ok(()) = current_room.changed() => {
                let _ = current_room.borrow_and_update();
                shown.clear();
            }

            Ok(()) = pending.changed() => {
                let count = *pending.borrow_and_update();
                debug!(count, "Outbox size changed");
                if count == 0 {
                    println!("\r📬 Outbox empty");
                }
            }

            Some(input) = stdin_receiver.recv() => {
                match repl.process_command(&input).await {
                    Ok(keep_going) => running = keep_going,
                    Err(e) => println!("❌ {:#}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                running = false;
            }

            else => running = false,
        }
    }

    println!("\n👋 Goodbye!");
    client.shutdown();
    stdin_handle.abort();
    Ok(())
}
