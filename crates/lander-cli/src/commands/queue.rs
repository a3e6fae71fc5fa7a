use crate::cli::QueueCommands;
use crate::support::{open_project_or_exit, or_dash, or_exit, print_json};
use lander_engine::{CycleReport, MergeQueue};
use lander_kernel::{EnqueueOutcome, QueueEntry};
use serde_json::{Value, json};

pub fn run(root: Option<String>, command: QueueCommands) {
    let project = open_project_or_exit(root);
    let queue = project.merge_queue();

    match command {
        QueueCommands::Enqueue {
            subject,
            branch,
            priority,
            external_ref,
            json,
        } => {
            let outcome = if branch {
                or_exit(queue.enqueue_branch(&subject, priority, external_ref))
            } else {
                or_exit(queue.enqueue_operation(&subject, priority))
            };
            let verb = match &outcome {
                EnqueueOutcome::Added(_) => "added",
                EnqueueOutcome::Requeued(_) => "requeued",
                EnqueueOutcome::AlreadyQueued(_) => "already_queued",
            };
            let position = or_exit(queue.snapshot()).position(&subject);
            if json {
                print_json(&json!({
                    "action": "queue.enqueue",
                    "outcome": verb,
                    "position": position,
                    "entry": outcome.entry(),
                }));
            } else {
                println!(
                    "lander queue enqueue\n  {}: {} (position {})",
                    subject,
                    verb.replace('_', " "),
                    or_dash(position)
                );
            }
        }

        QueueCommands::List { json } => run_list(&queue, json),

        QueueCommands::Dequeue { subject, json } => {
            let removed = or_exit(queue.dequeue(&subject));
            if json {
                print_json(&json!({ "action": "queue.dequeue", "entry": removed }));
            } else {
                println!(
                    "lander queue dequeue\n  Removed: {} [{}]",
                    removed.subject, removed.status
                );
            }
        }

        QueueCommands::PollOnce { json } => {
            let report = or_exit(queue.run_cycle());
            print_cycle(&report, json);
        }
    }
}

fn run_list(queue: &MergeQueue, json_output: bool) {
    let doc = or_exit(queue.snapshot());
    let mut rows: Vec<&QueueEntry> = doc.pending_in_order();
    rows.extend(
        doc.entries
            .iter()
            .filter(|entry| entry.status != lander_kernel::EntryStatus::Pending),
    );

    if json_output {
        let items: Vec<Value> = rows
            .iter()
            .map(|entry| {
                json!({
                    "subject": entry.subject,
                    "kind": entry.kind,
                    "status": entry.status,
                    "priority": entry.priority,
                    "position": doc.position(&entry.subject),
                    "enqueuedAt": entry.enqueued_at,
                    "externalRef": entry.external_ref,
                    "error": entry.error,
                })
            })
            .collect();
        print_json(&json!({ "action": "queue.list", "count": items.len(), "entries": items }));
        return;
    }

    println!("lander queue list ({} entries)", rows.len());
    for entry in rows {
        println!(
            "  {:<4} {:<28} {:<11} p{}{}",
            or_dash(doc.position(&entry.subject)),
            entry.subject,
            entry.status.as_str(),
            entry.priority,
            entry
                .error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
}

pub fn print_cycle(report: &CycleReport, json_output: bool) {
    if json_output {
        print_json(&json!({ "action": "queue.poll_once", "report": report }));
        return;
    }
    println!("lander queue poll-once");
    if report.is_idle() {
        println!("  idle");
    }
    for action in &report.actions {
        println!("  {action}");
    }
    if let Some(dispatched) = &report.dispatched {
        println!(
            "  {} -> {} (commit {})",
            dispatched.subject,
            dispatched.status,
            or_dash(dispatched.commit.as_ref())
        );
        if let Some(error) = &dispatched.error {
            println!("  error: {error}");
        }
    }
    for error in &report.errors {
        println!("  error: {error}");
    }
    if !report.pruned.is_empty() {
        println!("  pruned: {}", report.pruned.join(", "));
    }
}
