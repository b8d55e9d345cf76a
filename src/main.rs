use anyhow::Error;

use crate::program::Program;

mod ingest;
mod program;

/// Configuration directory used when none is given on the command line.
const DEFAULT_CONFIG_DIR: &str = "./config";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_dir = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());
    let program = Program::new(config_dir);
    program.run().await
}
