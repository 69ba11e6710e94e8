//! Terminal front-end: submit one task to a relay and render its progress.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::FutureExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aquarius::config;
use aquarius::reveal::{self, CHAR_INTERVAL};
use aquarius::session::{SessionError, Update};
use aquarius::tracker::CompletionTracker;
use aquarius::{AgentSession, CredentialGate, LogGroup, RelayClient, SessionPhase, SessionState};

#[derive(Parser)]
#[command(name = "aquarius-task")]
#[command(about = "Run a task through an Aquarius relay and watch the agent work")]
#[command(version)]
struct Cli {
    /// Relay base URL
    #[arg(long, env = "AQUARIUS_SERVER", default_value = "http://localhost:3001")]
    server: String,

    /// Print shell output at once instead of typing it out
    #[arg(long)]
    no_typing: bool,

    /// Task description
    #[arg(required = true)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = config::load_dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aquarius=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = dotenv {
        tracing::warn!("Ignoring unreadable .env file: {}", e);
    }

    let cli = Cli::parse();
    let mut session = AgentSession::new(CredentialGate::process().clone());

    if let Some(message) = session.display_error() {
        print_error(message);
        return ExitCode::FAILURE;
    }

    let attempt = match session.start(&cli.query.join(" ")) {
        Ok(attempt) => attempt,
        Err(SessionError::EmptyQuery) => {
            eprintln!("Nothing to do: the task description is empty.");
            return ExitCode::from(2);
        }
        Err(e) => {
            print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };
    println!("▶ {}", attempt.query);
    println!("  {}", session.state().status_message());

    let client = RelayClient::new(cli.server);
    let events = client.generate_task_stream(&attempt.query, attempt.cancel.predicate());
    futures::pin_mut!(events);

    let ctrl_c = tokio::signal::ctrl_c().map(|result| {
        if let Err(e) = result {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        }
    });
    futures::pin_mut!(ctrl_c);

    let interval = if cli.no_typing {
        Duration::ZERO
    } else {
        CHAR_INTERVAL
    };

    while session.state().is_running() {
        let update = session.step(&mut events, &mut ctrl_c).await;
        render(session.state(), update, interval).await;
    }

    match session.phase() {
        SessionPhase::Completed => ExitCode::SUCCESS,
        SessionPhase::Cancelled => ExitCode::from(130),
        _ => {
            if let Some(message) = session.display_error() {
                print_error(message);
            }
            ExitCode::FAILURE
        }
    }
}

async fn render(state: &SessionState, update: Update, interval: Duration) {
    match update {
        Update::Ignored | Update::Errored => {}
        Update::Status => println!("  {}", state.status_message()),
        Update::Completed => println!("✔ {}", state.status_message()),
        Update::Cancelled => println!("■ {}", state.status_message()),
        Update::Architecture => {
            println!("  Project:");
            for entry in state.architecture() {
                if entry.ends_with('/') {
                    println!("    \x1b[1;34m{}\x1b[0m", entry);
                } else {
                    println!("    {}", entry);
                }
            }
        }
        Update::LogAppended { index } => {
            if let Some(group) = state.log_groups().get(index) {
                render_group(Arc::clone(group), interval).await;
            }
        }
    }
}

async fn render_group(group: Arc<LogGroup>, interval: Duration) {
    println!("┌ {}", group.title);
    let mut tracker = CompletionTracker::new(Arc::clone(&group));

    for (index, line) in group.logs.iter().enumerate() {
        if line.is_shell() {
            print!("│ ");
            reveal::type_out(&line.content, interval, |piece| {
                print!("{}", piece);
                let _ = std::io::stdout().flush();
            })
            .await;
            println!();
            tracker.mark_revealed(index);
        } else {
            println!("│ \x1b[2m{}\x1b[0m", line.content);
        }
    }

    if tracker.is_complete() {
        println!("└ ✔ {}", group.title);
    }
}

fn print_error(message: &str) {
    eprintln!("✖ An Error Occurred");
    eprintln!("  {}", message);
}
