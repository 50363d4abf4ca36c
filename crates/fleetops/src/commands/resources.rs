use crate::session::Session;
use colored::Colorize;

pub async fn rename(session: &Session, from: &str, to: &str) -> anyhow::Result<()> {
    let mut deployment = session.deployment()?;
    deployment.rename_resource(from, to).await?;
    println!("{}", format!("✓ {from} を {to} に名前変更しました").green());
    Ok(())
}

pub async fn delete_resources(session: &Session, names: &[String]) -> anyhow::Result<()> {
    let mut deployment = session.deployment()?;
    let removed = deployment.delete_resources(names).await?;
    for name in &removed {
        println!("  {} {}", "-".red(), name.cyan());
    }
    println!(
        "{}",
        format!("✓ {} 件のリソースをステートから削除しました", removed.len()).green()
    );
    Ok(())
}
