use crate::commands::{run_rank, run_score, run_topics, RankArgs, ScoreArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use district_score::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "District Score",
    about = "Score city districts along subjective topics from open-web evidence",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Score one district, reusing the cached result unless --force is given
    Score(ScoreArgs),
    /// Print cached scores for a city and topic, best first
    Rank(RankArgs),
    /// List the topics with built-in signal schemas
    Topics,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Score(args) => run_score(args).await,
        Command::Rank(args) => run_rank(args),
        Command::Topics => run_topics(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_serve() {
        let cli = Cli::try_parse_from(["district-score-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn score_command_takes_the_unit_and_force_flag() {
        let cli = Cli::try_parse_from([
            "district-score-api",
            "score",
            "--country",
            "Taiwan",
            "--city",
            "Taipei",
            "--district",
            "Xinyi",
            "--topic",
            "air quality",
            "--force",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::Score(args)) => {
                assert_eq!(args.district, "Xinyi");
                assert_eq!(args.topic, "air quality");
                assert!(args.force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rank_command_requires_topic() {
        let err = Cli::try_parse_from([
            "district-score-api",
            "rank",
            "--country",
            "Taiwan",
            "--city",
            "Taipei",
        ])
        .expect_err("topic missing");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
