use colored::{ColoredString, Colorize};
use fleetops_engine::{ReconcilePlan, ResourceState};

/// 状態名を健全性に応じて色付け
pub fn colored_state(state: ResourceState) -> ColoredString {
    match state {
        ResourceState::Up => state.as_str().green(),
        ResourceState::Starting | ResourceState::Stopping => state.as_str().yellow(),
        ResourceState::Missing | ResourceState::Stopped => state.as_str().dimmed(),
        ResourceState::Unreachable | ResourceState::Rescue | ResourceState::Unknown => {
            state.as_str().red()
        }
    }
}

pub fn print_plan(plan: &ReconcilePlan) {
    if plan.is_empty() {
        println!("{}", "リソース構成に変更はありません".dimmed());
        return;
    }
    for (name, resource_type) in &plan.create {
        println!("  {} {} ({})", "+".green(), name.cyan(), resource_type);
    }
    for name in &plan.revived {
        println!("  {} {} (再定義)", "~".yellow(), name.cyan());
    }
    for name in &plan.obsolete {
        println!("  {} {} (廃止)", "-".red(), name.cyan());
    }
}

/// 値がなければ "-"
pub fn or_dash(value: Option<impl ToString>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
