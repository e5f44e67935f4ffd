use std::sync::Arc;
use std::time;

use eyre::{Context, Result};
use parley::backend::new_backend;
use parley::cli::{Action, Command, EventPrinter, Runner, print_conversations};
use parley::config::{Configuration, init_logger, verbose};
use parley::engine::{ConversationStore, Engine, EngineOptions};
use parley::models::Event;
use parley::storage::{PersistenceService, Snapshot, new_storage};
use tokio::{sync::mpsc, task};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Command::new();
    if cmd.version() {
        cmd.print_version();
        return Ok(());
    }

    std::panic::set_hook(Box::new(|panic_info| {
        better_panic::Settings::auto().create_panic_handler()(panic_info);
    }));

    let config = cmd.get_config()?;
    Configuration::init(config.clone())?;
    init_logger(&config.log)?;
    verbose!("[+] Logger initialized");

    let Some(action) = cmd.action() else {
        eyre::bail!("No action given, see --help");
    };

    verbose!("[+] Initializing storage...");
    let storage = new_storage(&config.storage)
        .await
        .wrap_err("initializing storage")?;
    let conversations = storage
        .load_conversations()
        .await
        .wrap_err("loading conversations")?;
    let selected_ids = storage
        .load_selected_ids()
        .await
        .wrap_err("loading selection")?;
    verbose!("[+] Loaded {} conversations", conversations.len());

    if *action == Action::List {
        return print_conversations(&mut std::io::stdout(), &conversations, &selected_ids);
    }

    verbose!("[+] Initializing backend...");
    let backend = new_backend(&config.backend)?;

    let token = CancellationToken::new();
    let mut task_set = task::JoinSet::new();

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel::<Snapshot>();

    let store = Arc::new(ConversationStore::new(Arc::new(event_tx)).with_persistence(snapshot_tx));
    store.load(conversations, selected_ids).await;

    let mut persistence = PersistenceService::new(storage.clone(), snapshot_rx, token.clone());
    task_set.spawn(async move { persistence.start().await });

    let printer_token = token.clone();
    task_set.spawn(async move {
        EventPrinter::new(std::io::stdout())
            .run(event_rx, printer_token)
            .await
    });

    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        backend,
        EngineOptions::from(&config),
    ));
    let runner = Runner::new(Arc::clone(&engine));

    let run = runner.run(action);
    tokio::pin!(run);
    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping");
            match action {
                Action::Playback { .. } => engine.playback_cancel().await,
                _ => engine.stop_streaming().await,
            }
            run.await
        }
    };

    token.cancel();
    let shutdown = async {
        while let Some(res) = task_set.join_next().await {
            match res {
                Ok(Err(err)) => log::error!("Task error: {}", err),
                Err(err) => log::error!("Task error: {}", err),
                Ok(Ok(_)) => {}
            }
        }
    };
    if tokio::time::timeout(time::Duration::from_secs(15), shutdown)
        .await
        .is_err()
    {
        eprintln!("Shutdown timeout reached");
    }

    result
}
