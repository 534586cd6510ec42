use clap::Parser;

fn main() -> std::process::ExitCode {
    let cli = locktrim::cli::Cli::parse();
    match locktrim::app::run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
