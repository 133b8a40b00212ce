use clap::Parser;
use meshward::{start, Args};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Console output plus a non-blocking file log, both behind one `RUST_LOG`
/// filter installed at the subscriber level.
fn init_logging() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "meshward.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(fmt::layer())
        .init();
    guard
}

#[tokio::main]
async fn main() -> meshward::Result<()> {
    let args = Args::parse();
    let _guard = init_logging();
    start(args).await
}
