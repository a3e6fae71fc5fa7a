use crate::cli::OpCommands;
use crate::support::{open_project_or_exit, or_dash, or_exit, print_json, yes_no};
use lander_engine::{CreateOptions, StateMachine};
use lander_kernel::{Operation, OperationField, OperationType, Phase};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub fn run(root: Option<String>, command: OpCommands) {
    let project = open_project_or_exit(root);
    let machine = project.machine();

    match command {
        OpCommands::Create {
            name,
            op_type,
            external_ref,
            branch,
            worktree,
            json,
        } => {
            let op_type: OperationType = or_exit(op_type.parse());
            let op = or_exit(machine.create(
                &name,
                op_type,
                CreateOptions {
                    external_ref,
                    branch,
                    worktree_path: worktree.map(PathBuf::from),
                },
            ));
            report("op.create", "Created", &op, json);
        }

        OpCommands::List { phase, json } => run_list(&machine, phase, json),

        OpCommands::Describe { name, json } => {
            let op = or_exit(machine.load(&name));
            if json {
                print_json(&json!({ "action": "op.describe", "operation": op }));
            } else {
                describe(&op);
            }
        }

        OpCommands::Advance { name, phase, json } => {
            let target: Phase = or_exit(phase.parse());
            let op = or_exit(machine.advance(&name, target));
            report("op.advance", "Advanced", &op, json);
        }

        OpCommands::Fail { name, reason, json } => {
            let op = or_exit(machine.fail(&name, &reason));
            report("op.fail", "Failed", &op, json);
        }

        OpCommands::Resume { name, json } => {
            let op = or_exit(machine.resume(&name));
            report("op.resume", "Resumed", &op, json);
        }

        OpCommands::Cancel { name, reason, json } => {
            let op = or_exit(machine.cancel(&name, reason.as_deref()));
            report("op.cancel", "Cancelled", &op, json);
        }

        OpCommands::Hold { name, json } => {
            let op = or_exit(machine.hold(&name));
            report("op.hold", "Held", &op, json);
        }

        OpCommands::Unhold { name, json } => {
            let op = or_exit(machine.unhold(&name));
            report("op.unhold", "Released", &op, json);
        }

        OpCommands::Blocked { name, json } => {
            let blockers = or_exit(machine.blockers(&name));
            if json {
                print_json(&json!({
                    "action": "op.blocked",
                    "name": name,
                    "blocked": !blockers.is_empty(),
                    "blockers": blockers,
                }));
            } else if blockers.is_empty() {
                println!("lander op blocked\n  {name}: not blocked");
            } else {
                let labels: Vec<&str> = blockers.iter().map(|b| b.label.as_str()).collect();
                println!("lander op blocked\n  {name}: blocked by {}", labels.join(", "));
            }
        }

        OpCommands::Ready { name, json } => {
            let reason = machine.merge_ready_reason(&name);
            if json {
                print_json(&json!({
                    "action": "op.ready",
                    "name": name,
                    "ready": reason.is_none(),
                    "guard": reason.as_ref().map(|r| r.guard()),
                    "reason": reason.as_ref().map(ToString::to_string),
                }));
            } else {
                match reason {
                    None => println!("lander op ready\n  {name}: merge-ready"),
                    Some(reason) => println!("lander op ready\n  {name}: not ready ({reason})"),
                }
            }
        }

        OpCommands::Events { name, json } => {
            let events = or_exit(machine.events(&name));
            if json {
                print_json(&json!({ "action": "op.events", "name": name, "events": events }));
            } else {
                println!("lander op events {name}");
                for record in &events {
                    let detail = if record.detail.is_null() {
                        String::new()
                    } else {
                        format!(" {}", record.detail)
                    };
                    println!(
                        "  #{} {} {}{detail}",
                        record.seq,
                        record.at.to_rfc3339(),
                        record.event
                    );
                }
            }
        }

        OpCommands::AttachSession {
            name,
            session,
            json,
        } => {
            let op = or_exit(machine.attach_session(&name, &session));
            report("op.attach_session", "Attached", &op, json);
        }

        OpCommands::DetachSession { name, json } => {
            let op = or_exit(machine.detach_session(&name));
            report("op.detach_session", "Detached", &op, json);
        }

        OpCommands::Workspace {
            name,
            worktree,
            branch,
            json,
        } => {
            let op = or_exit(machine.set_workspace(
                &name,
                worktree.as_deref().map(Path::new),
                branch.as_deref(),
            ));
            report("op.workspace", "Updated", &op, json);
        }

        OpCommands::Read { name, fields } => {
            let fields: Vec<OperationField> = if fields.is_empty() {
                OperationField::ALL.to_vec()
            } else {
                fields.iter().map(|f| or_exit(f.parse())).collect()
            };
            let values = or_exit(machine.store().read(&name, &fields));
            let object: serde_json::Map<String, Value> = values
                .into_iter()
                .map(|(field, value)| (field.key().to_string(), value))
                .collect();
            print_json(&Value::Object(object));
        }

        OpCommands::Write {
            name,
            field,
            value,
            json,
        } => {
            let field: OperationField = or_exit(field.parse());
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            let op = or_exit(machine.store().write(&name, field, value));
            report("op.write", "Written", &op, json);
        }
    }
}

fn run_list(machine: &StateMachine, phase: Option<String>, json_output: bool) {
    let phase: Option<Phase> = phase.map(|p| or_exit(p.parse()));
    let ops: Vec<Operation> = or_exit(machine.operations())
        .into_iter()
        .filter(|op| phase.is_none_or(|p| op.phase == p))
        .collect();

    if json_output {
        let items: Vec<Value> = ops
            .iter()
            .map(|op| {
                json!({
                    "name": op.name,
                    "type": op.op_type,
                    "phase": op.phase,
                    "held": op.held,
                    "externalRef": op.external_ref,
                    "mergeCommit": op.merge_commit,
                })
            })
            .collect();
        print_json(&json!({ "action": "op.list", "count": items.len(), "operations": items }));
        return;
    }

    println!("lander op list ({} operations)", ops.len());
    for op in &ops {
        let held = if op.held { " [held]" } else { "" };
        println!("  {:<24} {:<14} {}{held}", op.name, op.phase.as_str(), op.op_type);
    }
}

fn report(action: &str, verb: &str, op: &Operation, json_output: bool) {
    if json_output {
        print_json(&json!({ "action": action, "operation": op }));
    } else {
        println!(
            "lander {}\n  {verb}: {} [{}]",
            action.replace('.', " "),
            op.name,
            op.phase
        );
    }
}

fn describe(op: &Operation) {
    println!("lander op describe {}", op.name);
    println!();
    println!("  type: {}", op.op_type);
    println!("  phase: {}", op.phase);
    println!("  branch: {}", op.branch_name());
    println!(
        "  worktree: {}",
        or_dash(op.worktree_path.as_ref().map(|p| p.display()))
    );
    println!("  external ref: {}", or_dash(op.external_ref.as_ref()));
    println!("  held: {}", yes_no(op.held));
    println!("  session: {}", or_dash(op.session_id.as_ref()));
    println!("  merge queued: {}", yes_no(op.merge_queued));
    println!(
        "  merge status: {}",
        or_dash(op.merge_status.map(|s| s.as_str()))
    );
    println!("  merge commit: {}", or_dash(op.merge_commit.as_ref()));
    println!("  created: {}", op.created_at.to_rfc3339());
    if let Some(at) = op.completed_at {
        println!("  completed: {}", at.to_rfc3339());
    }
    if let Some(at) = op.merged_at {
        println!("  merged: {}", at.to_rfc3339());
    }
    if let Some(error) = &op.error {
        println!("  error: {error}");
    }
}
