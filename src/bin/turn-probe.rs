use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;
use turn_probe::{init_logging, probe, TurnProbeConfig, VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about = "TURN allocation probe", long_about = None)]
struct Args {
    /// TURN server host name or IP address
    host: String,

    /// TURN server TCP port
    #[arg(short, long, default_value_t = 3478)]
    port: u16,

    /// Deadline for connecting and for each response, in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Long-term credential username
    #[arg(short, long)]
    username: Option<String>,

    /// Long-term credential password
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Peer IP to authorise with CreatePermission after allocating
    #[arg(long)]
    peer: Option<IpAddr>,

    /// Do not send a SOFTWARE attribute
    #[arg(long)]
    no_software: bool,

    /// Pretty-print the JSON result
    #[arg(long)]
    pretty: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> TurnProbeConfig {
        let mut config = TurnProbeConfig::new(self.host)
            .with_port(self.port)
            .with_timeout(Duration::from_millis(self.timeout_ms));
        config.username = self.username;
        config.password = self.password;
        config.peer = self.peer;
        if self.no_software {
            config = config.with_software(None);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    tracing::debug!("turn-probe v{}", VERSION);

    let pretty = args.pretty;
    let config = args.into_config();
    let result = probe(&config).await.context("invalid probe configuration")?;

    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", json);

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
