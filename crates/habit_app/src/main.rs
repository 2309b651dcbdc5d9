use habit_app::app::{run, AppConfig, Command};

fn main() {
    tracing_subscriber::fmt::init();
    let config = AppConfig::from_env().unwrap_or_default();
    let command = match Command::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err}\n\n{}", Command::USAGE);
            std::process::exit(2);
        }
    };
    if let Err(err) = run(config, command) {
        eprintln!("habit_alarms failed: {err:#}");
        std::process::exit(1);
    }
}
