//! The `scout` cli
use clap::Parser;
use scout::cmd::DiscoverArgs;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[clap(name = "scout", version, about = "Smart-contract discovery engine")]
pub struct App {
    #[clap(flatten)]
    pub discover: DiscoverArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    scout::cmd::init_tracing();
    let app = App::parse();
    app.discover.run().await
}
