//! agentx-demo: a small AgentX subagent.
//!
//! Exports a handful of objects under a private enterprise arc and keeps
//! serving (reconnecting on failure) until the master closes the session.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use async_agentx::binding::ObjectSpec;
use async_agentx::handler::SetResult;
use async_agentx::registry::{IndexType, TableSpec};
use async_agentx::{MasterAddress, Oid, Session, SessionBuilder, SessionConfig, Value};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Run a demo AgentX subagent.
#[derive(Debug, Parser)]
#[command(name = "agentx-demo", version, about)]
struct Args {
    /// Master agent address (unix:/path, /path, tcp:host:port or host:port).
    #[arg(short, long, default_value = "unix:/var/agentx/master")]
    master: MasterAddress,

    /// JSON session configuration; overrides --master.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enterprise OID the demo objects live under.
    #[arg(long, default_value = "1.3.6.1.4.1.99999")]
    base: Oid,

    /// Seconds to wait before reconnecting after a failure (0 exits instead).
    #[arg(long, default_value_t = 5)]
    retry: u64,

    /// Print the registered objects as JSON and exit.
    #[arg(long)]
    dump: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn init_tracing(&self) {
        let level = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("async_agentx={level},agentx_demo={level}"))
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    fn builder(&self) -> Result<SessionBuilder, String> {
        let Some(path) = &self.config else {
            return Ok(Session::builder(self.master.clone())
                .agent_id(self.base.clone())
                .description("async-agentx demo"));
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("reading {}: {}", path.display(), e))?;
        let config: SessionConfig = serde_json::from_str(&text)
            .map_err(|e| format!("parsing {}: {}", path.display(), e))?;
        Ok(SessionBuilder::from_config(config))
    }
}

/// Register the demo objects. Returns the tick counter.
async fn populate(session: &Session, base: &Oid) -> async_agentx::Result<async_agentx::BindingHandle> {
    session
        .register_scalar(
            base.concat(&[1, 1, 0]),
            ObjectSpec::display_string("async-agentx demo subagent"),
        )
        .await?;
    let ticks = session
        .register_scalar(base.concat(&[1, 2, 0]), ObjectSpec::counter64(0))
        .await?;
    session
        .register_scalar(
            base.concat(&[1, 3, 0]),
            ObjectSpec::display_string("nobody").read_write().size(0, 64),
        )
        .await?;
    session
        .register_scalar(
            base.concat(&[1, 4, 0]),
            ObjectSpec::integer32(1)
                .read_write()
                .validator(|value| match value {
                    // only the enumerated levels 1..=3
                    Value::Integer(1..=3) => SetResult::Ok,
                    _ => SetResult::WrongValue,
                }),
        )
        .await?;

    let table = session
        .register_table(
            base.concat(&[2, 1]),
            TableSpec::new()
                .index(IndexType::OctetString)
                .column(2, ObjectSpec::integer32(0).read_write())
                .column(3, ObjectSpec::timeticks(0))
                .row_count(base.concat(&[1, 5, 0])),
        )
        .await?;
    for (name, weight) in [("alpha", 10), ("beta", 20), ("gamma", 30)] {
        table.add_row_with(&[name.into()], [(2, Value::Integer(weight))])?;
    }
    Ok(ticks)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    args.init_tracing();

    let builder = match args.builder() {
        Ok(builder) => builder,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut session = builder.build();
    let ticks = match populate(&session, &args.base).await {
        Ok(ticks) => ticks,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.dump {
        let objects: Vec<serde_json::Value> = session
            .registry()
            .registered()
            .into_iter()
            .map(|o| {
                serde_json::json!({
                    "oid": o.oid.to_string(),
                    "type": o.value_type.to_string(),
                    "access": o.access,
                    "value": o.value.to_string(),
                })
            })
            .collect();
        match serde_json::to_string_pretty(&objects) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let ticker = ticks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if let Err(e) = ticker.increment(1) {
                tracing::warn!(error = %e, "tick failed");
            }
        }
    });

    loop {
        match session.reconnect().await {
            Ok(summary) => {
                for (registration, status) in &summary.rejected {
                    tracing::warn!(agentx.oid = %registration.subtree, %status, "not registered");
                }
                match session.run().await {
                    Ok(reason) => {
                        tracing::info!(%reason, "session ended");
                        return ExitCode::SUCCESS;
                    }
                    Err(e) => tracing::warn!(error = %e, "session failed"),
                }
            }
            Err(e) => tracing::warn!(
                error = %e,
                agentx.target = %session.handle().target(),
                "connect failed"
            ),
        }

        if args.retry == 0 {
            return ExitCode::FAILURE;
        }
        tokio::time::sleep(Duration::from_secs(args.retry)).await;
    }
}
