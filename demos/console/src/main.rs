//! Interactive trace console for a remote debug server.
//!
//! Run with: cargo run -p trace-console-demo -- [port]
//!
//! The port defaults to `TRACE_CONSOLE_PORT`, then 3000. Type `help` for
//! the command list.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use trace_console_core::{BufferEvent, RecordFilter, TraceBuffer, TraceRecord};
use trace_console_transport::{
    ConnectionConfig, ConnectionManager, ConnectionState, ConsoleEvent, RemoteExecutionChannel,
    WsConnector,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 3000;
const PAYLOAD_LANG: &str = "javascript";

const HELP: &str = "\
commands:
  port <n>       connect to another port
  filter <expr>  filter by call path (text or /regex/flags), empty to reset
  list           list matching records
  show <i>       show record i
  fmt <i>        toggle pretty-printing of record i
  clear          drop all records
  exec <code>    run code remotely
  status         connection state
  quit";

enum Command {
    Port(u16),
    Filter(String),
    List,
    Show(usize),
    Format(usize),
    Clear,
    Exec(String),
    Status,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        Ok(match word {
            "port" => Self::Port(rest.parse().context("port must be a number")?),
            "filter" => Self::Filter(rest.to_string()),
            "list" | "ls" => Self::List,
            "show" => Self::Show(rest.parse().context("index must be a number")?),
            "fmt" => Self::Format(rest.parse().context("index must be a number")?),
            "clear" => Self::Clear,
            "exec" if !rest.is_empty() => Self::Exec(rest.to_string()),
            "exec" => bail!("nothing to execute"),
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command '{other}', try 'help'"),
        })
    }
}

/// What the prompt loop needs after the manager has moved into its task.
struct Console {
    buffer: Arc<TraceBuffer>,
    executor: RemoteExecutionChannel,
    state: watch::Receiver<ConnectionState>,
    port_tx: watch::Sender<u16>,
    filter: String,
}

impl Console {
    fn run(&mut self, command: Command) {
        match command {
            Command::Port(port) => {
                self.port_tx.send_replace(port);
            }
            Command::Filter(expr) => {
                self.filter = expr;
                let count = self.buffer.filtered(&RecordFilter::call_path(&self.filter)).len();
                println!("{count} matching records");
            }
            Command::List => {
                for (position, record) in self.buffer.filtered(&RecordFilter::call_path(&self.filter)) {
                    println!("{position:>4}  {}", summary(&record));
                }
            }
            Command::Show(position) => match self.buffer.get(position) {
                Some(record) => {
                    println!("{}", summary(&record));
                    println!("request:\n{}", record.request_view(PAYLOAD_LANG));
                    println!("response:\n{}", record.response_view(PAYLOAD_LANG));
                }
                None => println!("no record {position}"),
            },
            Command::Format(position) => match self.buffer.get(position) {
                Some(record) => {
                    self.buffer.set_formatted(position, !record.is_formatted);
                }
                None => println!("no record {position}"),
            },
            Command::Clear => self.buffer.clear(),
            Command::Exec(code) => {
                if let Ok(id) = self.executor.execute_remote_code(code) {
                    println!("sent {id}");
                }
            }
            Command::Status => {
                let state = *self.state.borrow();
                match state.port {
                    Some(port) => println!("{:?} (port {port}), {} records", state.phase, self.buffer.len()),
                    None => println!("{:?}, {} records", state.phase, self.buffer.len()),
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }
}

fn summary(record: &TraceRecord) -> String {
    let kind = record.kind.map(|k| format!("{k:?}")).unwrap_or_default();
    let status = record.status.map(|s| format!("{s:?}")).unwrap_or_default();
    format!(
        "{:<10} {:<6} {}",
        kind,
        status,
        record.call_path.as_deref().unwrap_or("<anonymous>")
    )
}

fn initial_port() -> Result<u16> {
    if let Some(arg) = std::env::args().nth(1) {
        return arg.parse().with_context(|| format!("invalid port '{arg}'"));
    }
    match std::env::var("TRACE_CONSOLE_PORT") {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid TRACE_CONSOLE_PORT '{value}'")),
        Err(_) => Ok(DEFAULT_PORT),
    }
}

fn config() -> ConnectionConfig {
    match std::env::var("TRACE_CONSOLE_HOST") {
        Ok(host) => ConnectionConfig::default().with_host(host),
        Err(_) => ConnectionConfig::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port = initial_port()?;
    let manager = ConnectionManager::new(WsConnector, config());
    let (port_tx, port_rx) = watch::channel(port);

    let mut console = Console {
        buffer: manager.buffer(),
        executor: manager.execution_channel(),
        state: manager.state(),
        port_tx,
        filter: String::new(),
    };

    // Print remote console output and execution results as they arrive
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConsoleEvent::RemoteConsole(line) => println!("[{}] {}", line.level, line.content),
                ConsoleEvent::ExecutionFinished(outcome) => {
                    let label = if outcome.success { "result" } else { "error" };
                    println!("{label}: {}", serde_json::to_string_pretty(&outcome.result).unwrap_or_default());
                }
                ConsoleEvent::ExecutionRejected(_) => {}
            }
        }
    });

    // Announce new records
    let mut updates = console.buffer.snapshot_plus_stream();
    tokio::spawn(async move {
        while let Some(event) = updates.next().await {
            if let BufferEvent::Appended { position, record } = event {
                println!("{position:>4}  {}", summary(&record));
            }
        }
    });

    let session = tokio::spawn(async move {
        let mut manager = manager;
        manager.follow_port(port_rx).await;
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => console.run(command),
            Err(e) => println!("{e:#}"),
        }
    }

    // Dropping the port sender ends the session
    drop(console);
    session.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert!(matches!(Command::parse("port 4000").unwrap(), Command::Port(4000)));
        assert!(matches!(Command::parse("  list ").unwrap(), Command::List));
        assert!(matches!(Command::parse("filter").unwrap(), Command::Filter(f) if f.is_empty()));
        assert!(
            matches!(Command::parse("exec 1 + 1").unwrap(), Command::Exec(code) if code == "1 + 1")
        );
        assert!(Command::parse("exec").is_err());
        assert!(Command::parse("port abc").is_err());
        assert!(Command::parse("launch").is_err());
    }

    #[test]
    fn test_summary() {
        let record = TraceRecord::new("users.find", trace_console_core::CallKind::Service);
        assert!(summary(&record).contains("users.find"));
        assert!(summary(&TraceRecord::default()).contains("<anonymous>"));
    }
}
