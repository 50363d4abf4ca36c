use crate::Selection;
use crate::session::Session;
use crate::utils;
use colored::Colorize;

/// check の終了コード（ビットフラグ）を返す
pub async fn check(session: &Session, selection: &Selection) -> anyhow::Result<i32> {
    let deployment = session.deployment()?;
    let report = deployment
        .check(&selection.include, &selection.exclude)
        .await?;

    let width = deployment.name_width().max("NAME".len());
    println!(
        "{:<width$}  {:<12}  {:<9}  {:<8}  {}",
        "NAME".bold(),
        "STATUS".bold(),
        "REACHABLE".bold(),
        "OUTDATED".bold(),
        "NOTES".bold(),
    );
    for (name, result) in &report.results {
        let reachable = match result.is_reachable {
            Some(true) => "yes".green(),
            Some(false) => "no".red(),
            None => "-".dimmed(),
        };
        let outdated = if result.is_outdated {
            "yes".yellow()
        } else {
            "no".normal()
        };
        println!(
            "{:<width$}  {:<12}  {:<9}  {:<8}  {}",
            name.cyan(),
            utils::colored_state(result.state),
            reachable,
            outdated,
            result.messages.join("; "),
        );
    }
    for (name, error) in &report.errors {
        println!("{:<width$}  {} {}", name.cyan(), "エラー:".red(), error);
    }

    Ok(report.exit_code())
}

pub async fn start(session: &Session, selection: &Selection) -> anyhow::Result<()> {
    session
        .deployment()?
        .start_machines(&selection.include, &selection.exclude)
        .await?;
    println!("{}", "✓ マシンを起動しました".green());
    Ok(())
}

pub async fn stop(session: &Session, selection: &Selection) -> anyhow::Result<()> {
    session
        .deployment()?
        .stop_machines(&selection.include, &selection.exclude)
        .await?;
    println!("{}", "✓ マシンを停止しました".green());
    Ok(())
}

pub async fn reboot(session: &Session, selection: &Selection, hard: bool) -> anyhow::Result<()> {
    session
        .deployment()?
        .reboot_machines(&selection.include, &selection.exclude, hard)
        .await?;
    println!("{}", "✓ マシンを再起動しました".green());
    Ok(())
}

pub async fn backup(session: &Session, selection: &Selection) -> anyhow::Result<()> {
    let backup_id = session
        .deployment()?
        .backup(&selection.include, &selection.exclude)
        .await?;
    eprintln!("{}", "✓ バックアップが完了しました".green());
    println!("{backup_id}");
    Ok(())
}

pub fn list_backups(session: &Session) -> anyhow::Result<()> {
    let backups = session.deployment()?.backups()?;
    if backups.is_empty() {
        println!("{}", "バックアップがありません".dimmed());
        return Ok(());
    }
    for (machine, ids) in backups {
        println!("{}", machine.cyan().bold());
        for id in ids {
            println!("  {id}");
        }
    }
    Ok(())
}

pub async fn restore(
    session: &Session,
    selection: &Selection,
    backup_id: &str,
) -> anyhow::Result<()> {
    session
        .deployment()?
        .restore(&selection.include, &selection.exclude, backup_id)
        .await?;
    println!("{}", format!("✓ バックアップ {backup_id} から復元しました").green());
    Ok(())
}
