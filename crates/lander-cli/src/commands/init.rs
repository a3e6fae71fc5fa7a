use crate::support::{exit_with, or_exit, print_json, resolve_root, yes_no};
use lander_engine::Project;
use serde_json::json;
use std::fs;

pub fn run(root: Option<String>, json_output: bool) {
    let root = resolve_root(root);
    if root.exists() && !root.is_dir() {
        exit_with(format!("init path is not a directory: {}", root.display()));
    }
    or_exit(fs::create_dir_all(&root));
    let had_config = lander_store::ProjectLayout::new(&root)
        .config_path()
        .exists();
    let layout = or_exit(Project::init(&root));

    if json_output {
        print_json(&json!({
            "action": "init",
            "root": layout.root().display().to_string(),
            "stateDir": layout.state_dir().display().to_string(),
            "configPath": layout.config_path().display().to_string(),
            "createdConfig": !had_config,
        }));
    } else {
        println!("lander init {}", layout.root().display());
        println!();
        println!("  state dir: {}", layout.state_dir().display());
        println!("  config: {}", layout.config_path().display());
        println!("  created config: {}", yes_no(!had_config));
    }
}
