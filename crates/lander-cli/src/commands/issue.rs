use crate::cli::IssueCommands;
use crate::support::{open_project_or_exit, or_exit, print_json};
use lander_bd::{Issue, JsonlTracker, NewIssue};
use lander_kernel::Tracker;
use serde_json::{Value, json};

pub fn run(root: Option<String>, command: IssueCommands) {
    let project = open_project_or_exit(root);
    let config = project.config();
    let tracker = JsonlTracker::new(
        project.layout().resolve(&config.tracker_path),
        config.lock_timeout(),
    );

    match command {
        IssueCommands::Add {
            title,
            description,
            operation,
            parent,
            priority,
            json,
        } => {
            let issue = or_exit(tracker.create(NewIssue {
                title,
                description,
                operation,
                parent,
                priority,
            }));
            if json {
                print_json(&json!({
                    "action": "issue.add",
                    "issuesPath": tracker.path().display().to_string(),
                    "issue": summary(&issue),
                }));
            } else {
                println!(
                    "lander issue add\n  Added: {} [{}]\n  Path: {}",
                    issue.id,
                    issue.status,
                    tracker.path().display()
                );
            }
        }

        IssueCommands::Close { id, reason, json } => {
            or_exit(tracker.close(&id, &reason));
            done("issue.close", "Closed", &id, json);
        }

        IssueCommands::Reopen { id, json } => {
            or_exit(tracker.reopen(&id));
            done("issue.reopen", "Reopened", &id, json);
        }

        IssueCommands::Block { id, blockers, json } => {
            or_exit(tracker.add_blocked_by(&id, &blockers));
            if json {
                print_json(&json!({ "action": "issue.block", "id": id, "blockedBy": blockers }));
            } else {
                println!(
                    "lander issue block\n  {id} blocked by {}",
                    blockers.join(", ")
                );
            }
        }

        IssueCommands::List { status, json } => {
            let store = or_exit(tracker.snapshot());
            let rows: Vec<&Issue> = store
                .issues()
                .filter(|issue| status.as_ref().is_none_or(|s| issue.status == *s))
                .collect();
            if json {
                let items: Vec<Value> = rows.iter().map(|issue| summary(issue)).collect();
                print_json(&json!({ "action": "issue.list", "count": items.len(), "items": items }));
            } else {
                println!("lander issue list ({} issues)", rows.len());
                for issue in rows {
                    println!("  {:<8} {:<8} {}", issue.id, issue.status, issue.title);
                }
            }
        }
    }
}

fn summary(issue: &Issue) -> Value {
    json!({
        "id": issue.id,
        "title": issue.title,
        "status": issue.status,
        "priority": issue.priority,
        "operation": issue.operation_label(),
    })
}

fn done(action: &str, verb: &str, id: &str, json_output: bool) {
    if json_output {
        print_json(&json!({ "action": action, "id": id }));
    } else {
        println!("lander {}\n  {verb}: {id}", action.replace('.', " "));
    }
}
