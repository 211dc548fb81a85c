use avis_loader::config::Config;
use avis_loader::events::Event;
use avis_loader::navigator::Navigator;
use avis_loader::sort::{SortKey, SortOrder};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: avis-loader <path> [--recursive] [--sort name|date|size] [--desc] \
[--ignore <keyword>]... [--keyword <keyword>]... [--watch]";

struct Args {
    path: PathBuf,
    watch: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::new();
    let args = match parse_args(env::args().skip(1).collect(), &mut config) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    config.watch.enabled = args.watch;
    let mut navigator = Navigator::new(config);
    let events = navigator.subscribe();

    if let Err(e) = navigator.load_file(&args.path) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    print_listing(&navigator);

    if !args.watch {
        return ExitCode::SUCCESS;
    }

    //drain what loading the folder produced, only changes are interesting now
    while events.try_recv().is_ok() {}

    println!("Watching for changes, ctrl+c to stop");
    loop {
        navigator.wait_for_message(Duration::from_millis(250));

        while let Ok(event) = events.try_recv() {
            match event {
                Event::FolderUpdated(_) => print_listing(&navigator),
                Event::CurrentReconciled(reconciliation) => println!("{reconciliation}"),
                Event::FileChanged(entry) => println!("Current file -> {}", entry.name()),
                Event::ScanFailed { dir, reason } => {
                    println!("Failure scanning {} -> {reason}", dir.display())
                }
                _ => {}
            }
        }
    }
}

fn parse_args(args: Vec<String>, config: &mut Config) -> Result<Args, String> {
    let mut path = None;
    let mut watch = false;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--recursive" => config.navigation.recursive = true,
            "--desc" => config.sort.order = SortOrder::Descending,
            "--watch" => watch = true,
            "--sort" => {
                config.sort.key = match args.next().as_deref() {
                    Some("name") => SortKey::Name,
                    Some("date") => SortKey::DateModified,
                    Some("size") => SortKey::FileSize,
                    Some(other) => return Err(format!("Invalid sort key: {other}")),
                    None => return Err(String::from("--sort needs a key")),
                }
            }
            "--ignore" => match args.next() {
                Some(keyword) => config.filter.ignore_keywords.push(keyword),
                None => return Err(String::from("--ignore needs a keyword")),
            },
            "--keyword" => match args.next() {
                Some(keyword) => config.filter.keywords.push(keyword),
                None => return Err(String::from("--keyword needs a keyword")),
            },
            flag if flag.starts_with("--") => return Err(format!("Unknown option: {flag}")),
            _ => {
                if path.is_some() {
                    return Err(format!("Unexpected argument: {arg}"));
                }
                path = Some(PathBuf::from(&arg));
            }
        }
    }

    match path {
        Some(path) => Ok(Args { path, watch }),
        None => Err(String::from("Missing path")),
    }
}

fn print_listing(navigator: &Navigator) {
    let current = navigator.current();
    let entries = navigator.entries();

    match navigator.dir() {
        Some(dir) => println!("{} ({} images)", dir.display(), entries.len()),
        None => println!("No folder open"),
    }

    for (i, entry) in entries.iter().enumerate() {
        let marker = match &current {
            Some(current) if current.id() == entry.id() => '>',
            _ => ' ',
        };
        println!("{marker} {:>4} {}", i + 1, entry.name());
    }

    if let (Some(current), None) = (&current, navigator.current_index()) {
        println!(">      {} (not in folder)", current.name());
    }
}
