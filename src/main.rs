//! Tally 命令行入口
//!
//! 初始化日志、加载配置、选择远端，然后：
//! - `tally <conversation>`：列出任务、人员与进度
//! - `tally <conversation> complete <task> <person>`
//! - `tally <conversation> uncomplete <task>`

use anyhow::Context;
use tally::config::{load_config, AppConfig};
use tally::core::Transition;
use tally::remote::create_remote_from_config;
use tally::{BoardSettings, TaskBoard};

const USAGE: &str = "usage: tally <conversation> [complete <task> <person> | uncomplete <task>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tally::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(conversation_id) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let remote = create_remote_from_config(&cfg).context("Failed to create remote client")?;
    let board = TaskBoard::new(remote, cfg.session(), BoardSettings::from(&cfg));
    let mut notices = board.subscribe();

    board
        .select_conversation(conversation_id)
        .await
        .with_context(|| format!("Failed to load conversation {}", conversation_id))?;

    let transition = match (args.get(1).map(String::as_str), args.get(2), args.get(3)) {
        (None, _, _) => None,
        (Some("complete"), Some(task_id), Some(person_id)) => Some(
            board
                .complete_task(task_id, person_id)
                .await
                .context("Complete failed")?,
        ),
        (Some("uncomplete"), Some(task_id), _) => Some(
            board
                .uncomplete_task(task_id)
                .await
                .context("Uncomplete failed")?,
        ),
        _ => anyhow::bail!(USAGE),
    };

    if let Some(transition) = transition {
        match &transition {
            Transition::Applied { task, .. } => {
                println!("{} -> {:?}", task.title(), task.status());
                if let Some(entry) = transition.ledger_entry() {
                    println!(
                        "  ledger {} {} {}",
                        entry.direction.tag(),
                        entry.amount,
                        entry.currency
                    );
                }
            }
            Transition::AlreadyInState(status) => println!("already {:?}", status),
            Transition::Busy => println!("another completion is pending, ignored"),
        }
    }

    while let Ok(notice) = notices.try_recv() {
        eprintln!("notice: {:?}", notice);
    }

    println!("Active:");
    for task in board.active_tasks().await {
        println!(
            "  [{}] {} ({} {})",
            task.id(),
            task.title(),
            task.reward_amount(),
            cfg.app.currency
        );
    }
    println!("Completed:");
    for task in board.completed_tasks().await {
        println!(
            "  [{}] {} by {}",
            task.id(),
            task.title(),
            task.completed_by_user_id().unwrap_or("?")
        );
    }
    println!("People:");
    for person in board.people().await {
        let progress = board.progress(&person.id).await;
        println!(
            "  {} ({}) today {} / week {} / month {} / total {} [{:?}]",
            person.display_first_name,
            person.id,
            progress.daily,
            progress.weekly,
            progress.monthly,
            progress.net.lifetime,
            progress.source
        );
    }

    Ok(())
}
