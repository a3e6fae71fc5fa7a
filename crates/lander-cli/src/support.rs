use lander_engine::Project;
use lander_store::ProjectLayout;
use serde_json::Value;
use std::fmt::Display;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "LANDER_LOG";

/// Logs go to stderr so `--json` stdout stays parseable.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn exit_with(message: impl Display) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

pub fn or_exit<T, E: Display>(result: Result<T, E>) -> T {
    result.unwrap_or_else(|e| exit_with(e))
}

/// `--root` as given, else the nearest ancestor of the working directory
/// holding `.lander/`, else the working directory itself.
pub fn resolve_root(root: Option<String>) -> PathBuf {
    if let Some(root) = root {
        return PathBuf::from(root);
    }
    let cwd = or_exit(std::env::current_dir());
    ProjectLayout::discover(&cwd)
        .map(|layout| layout.root().to_path_buf())
        .unwrap_or(cwd)
}

pub fn open_project_or_exit(root: Option<String>) -> Project {
    let root = resolve_root(root);
    if !ProjectLayout::new(&root).state_dir().is_dir() {
        exit_with(format!(
            "not a lander project: {} (run `lander init`)",
            root.display()
        ));
    }
    or_exit(Project::open(&root))
}

pub fn print_json(payload: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(payload).expect("json serialization")
    );
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

pub fn or_dash(value: Option<impl Display>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
