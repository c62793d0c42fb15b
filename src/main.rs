use clap::Parser;
use colored::Colorize;

fn main() {
    let cli = gs::Cli::parse();
    gs::init_logging(cli.verbose);

    if let Err(err) = gs::run(cli) {
        // One line: engine output embedded in errors may span several.
        let message = format!("{err:#}");
        let message = message
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        eprintln!("{} {message}", "error:".red().bold());
        std::process::exit(1);
    }
}
