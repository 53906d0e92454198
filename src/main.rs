use clap::Parser;

use ecr_tally::config::Cli;

fn main() -> anyhow::Result<()> {
    ecr_tally::run(Cli::parse())
}
