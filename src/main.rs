use argh::FromArgs;
use minishell::Interpreter;

const BANNER: &str = "Simple CLI. Type 'exit' to quit.";

#[derive(FromArgs)]
/// A small interactive shell with pipelines.
struct Args {
    #[argh(option, short = 'c')]
    /// run a single command line and exit
    command: Option<String>,

    #[argh(option, default = "String::from(\"> \")")]
    /// prompt printed before each line
    prompt: String,

    #[argh(switch)]
    /// do not print the startup banner
    no_banner: bool,
}

fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args: Args = argh::from_env();

    let mut sh = Interpreter::default();
    let status = match args.command {
        Some(line) => {
            sh.run_line(&line);
            sh.exit_status()
        }
        None => {
            if !args.no_banner {
                println!("{BANNER}");
            }
            match sh.repl(&args.prompt) {
                Ok(status) => status,
                Err(e) => {
                    eprintln!("minishell: {e:#}");
                    1
                }
            }
        }
    };

    log::debug!("exiting with status {status}");
    std::process::ExitCode::from(u8::try_from(status).unwrap_or(1))
}
