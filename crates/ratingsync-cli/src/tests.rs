use super::*;

#[test]
fn parses_db_ping_command() {
    let cli =
        Cli::try_parse_from(["ratingsync-cli", "db", "ping"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Ping
        })
    ));
}

#[test]
fn parses_db_migrate_command() {
    let cli =
        Cli::try_parse_from(["ratingsync-cli", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["ratingsync-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn sync_defaults_to_summary_output() {
    let cli = Cli::try_parse_from(["ratingsync-cli", "sync"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Sync { json: false })));
}

#[test]
fn sync_json_flag() {
    let cli = Cli::try_parse_from(["ratingsync-cli", "sync", "--json"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Sync { json: true })));
}

#[test]
fn runs_limit_defaults_to_twenty() {
    let cli = Cli::try_parse_from(["ratingsync-cli", "runs"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Runs { limit: 20 })));
}

#[test]
fn runs_limit_override() {
    let cli = Cli::try_parse_from(["ratingsync-cli", "runs", "--limit", "5"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::Runs { limit: 5 })));
}

#[test]
fn unknown_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["ratingsync-cli", "collect"]).is_err());
}
