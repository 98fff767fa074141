use skitter::commands::command_argument_builder;
use skitter::{handle_init, handle_start, init_tracing};
use skitter_core::print_banner;

#[tokio::main]
async fn main() {
    let mut cmd = command_argument_builder();
    let chosen_command = cmd.clone().get_matches();
    let quiet = chosen_command.get_flag("quiet");

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    init_tracing(chosen_command.get_count("verbose"));

    match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("start", primary_command)) => handle_start(primary_command, quiet).await,
        _ => {
            if let Err(e) = cmd.print_help() {
                eprintln!("{}", e);
            }
        }
    }
}
