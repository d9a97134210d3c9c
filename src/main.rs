use openrag::cli::{commands, output::Output, Cli};
use openrag::OpenRagConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    init_tracing(&cli);

    if let Err(e) = commands::run(cli, &output).await {
        output.error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// `--verbose` forces debug. Otherwise `RUST_LOG`, then `server.log_level`.
fn init_tracing(cli: &Cli) {
    let directives = |level: &str| format!("openrag={level},tower_http={level}");
    let filter = if cli.verbose {
        EnvFilter::new(directives("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = OpenRagConfig::load_unvalidated(&cli.config)
                .map(|c| c.server.log_level)
                .unwrap_or_else(|_| "info".to_string());
            EnvFilter::new(directives(&level))
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
