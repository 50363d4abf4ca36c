use crate::session::Session;
use crate::utils;
use anyhow::Context;
use colored::Colorize;
use fleetops_engine::{Deployment, DeploymentSpec, import_deployment, list_deployments};
use std::io::Read;
use std::path::{Path, PathBuf};

pub async fn create(
    session: &Session,
    sources: Vec<PathBuf>,
    name: Option<String>,
    description: Option<String>,
) -> anyhow::Result<()> {
    // ソースの存在確認
    for source in &sources {
        if !source.exists() {
            anyhow::bail!("ソース '{}' が存在しません", source.display());
        }
    }
    let spec = DeploymentSpec {
        name,
        description,
        sources,
    };
    let deployment = Deployment::create(session.ctx.clone(), &spec).await?;
    eprintln!("{}", "✓ デプロイメントを作成しました".green());
    println!("{}", deployment.uuid());
    Ok(())
}

pub async fn modify(
    session: &Session,
    sources: Vec<PathBuf>,
    name: Option<String>,
    description: Option<String>,
) -> anyhow::Result<()> {
    let mut deployment = session.deployment()?;
    deployment
        .modify(&DeploymentSpec {
            name,
            description,
            sources,
        })
        .await?;
    eprintln!("{}", "✓ デプロイメントを変更しました".green());
    Ok(())
}

pub async fn clone(session: &Session, name: Option<String>) -> anyhow::Result<()> {
    let deployment = session.deployment()?;
    let cloned = deployment.clone_as(name).await?;
    eprintln!(
        "{}",
        format!("✓ {} を新しいデプロイメントに複製しました", deployment.uuid()).green()
    );
    println!("{}", cloned.uuid());
    Ok(())
}

pub async fn delete(session: &Session, force: bool) -> anyhow::Result<()> {
    let deployment = session.deployment()?;
    let uuid = deployment.uuid();
    deployment.delete(force).await?;
    eprintln!("{}", format!("✓ デプロイメント {uuid} を削除しました").green());
    Ok(())
}

pub fn list(session: &Session) {
    let deployments = list_deployments(session.state());
    if deployments.is_empty() {
        println!("{}", "デプロイメントがありません".dimmed());
        return;
    }
    println!(
        "{:<36}  {:<20}  {:>9}  {}",
        "UUID".bold(),
        "NAME".bold(),
        "RESOURCES".bold(),
        "DESCRIPTION".bold()
    );
    for d in deployments {
        println!(
            "{:<36}  {:<20}  {:>9}  {}",
            d.uuid,
            utils::or_dash(d.name),
            d.resources,
            d.description.unwrap_or_default()
        );
    }
}

pub fn info(session: &Session, json: bool) -> anyhow::Result<()> {
    let deployment = session.deployment()?;
    let resources = deployment.info();

    if json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }

    println!("{}: {}", "UUID".bold(), deployment.uuid());
    println!("{}: {}", "Name".bold(), utils::or_dash(deployment.name()));
    if let Some(description) = deployment.description() {
        println!("{}: {}", "Description".bold(), description);
    }
    for source in deployment.sources()? {
        println!("{}: {}", "Source".bold(), source.display());
    }
    for (key, value) in deployment.args()? {
        println!("{}: {} = {}", "Arg".bold(), key, value);
    }
    println!();

    let width = deployment.name_width().max("NAME".len());
    println!(
        "{:<width$}  {:<12}  {:<30}  {}",
        "NAME".bold(),
        "STATUS".bold(),
        "TYPE".bold(),
        "INDEX".bold(),
    );
    for r in resources {
        let name = if r.obsolete {
            format!("{} (廃止)", r.name).dimmed()
        } else {
            r.name.cyan()
        };
        println!(
            "{:<width$}  {:<12}  {:<30}  {}",
            name,
            utils::colored_state(r.state),
            r.resource_type,
            utils::or_dash(r.index),
        );
    }
    Ok(())
}

pub async fn set_args(
    session: &Session,
    args: &[(String, String)],
    unset: &[String],
) -> anyhow::Result<()> {
    let deployment = session.deployment()?;
    for (key, value) in args {
        deployment.set_arg(key, value).await?;
        eprintln!("  {} = {}", key.cyan(), value);
    }
    for key in unset {
        if !deployment.unset_arg(key).await? {
            eprintln!("  {} {} は設定されていません", "⚠".yellow(), key.cyan());
        }
    }
    Ok(())
}

pub fn export(session: &Session, all: bool) -> anyhow::Result<()> {
    let exported = if all {
        let mut all = serde_json::Map::new();
        for summary in list_deployments(session.state()) {
            let deployment = Deployment::load(session.ctx.clone(), summary.uuid)?;
            all.insert(summary.uuid.to_string(), deployment.export()?);
        }
        serde_json::Value::Object(all)
    } else {
        let deployment = session.deployment()?;
        let mut one = serde_json::Map::new();
        one.insert(deployment.uuid().to_string(), deployment.export()?);
        serde_json::Value::Object(one)
    };
    println!("{}", serde_json::to_string_pretty(&exported)?);
    Ok(())
}

fn read_input(file: &Path) -> anyhow::Result<String> {
    if file == Path::new("-") {
        let mut content = String::new();
        std::io::stdin().read_to_string(&mut content)?;
        return Ok(content);
    }
    std::fs::read_to_string(file).with_context(|| format!("{} を読み込めません", file.display()))
}

/// `export` の出力（UUID → デプロイメントのマップ）を受け付ける
pub async fn import(session: &Session, file: &Path) -> anyhow::Result<()> {
    let content = read_input(file)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let serde_json::Value::Object(deployments) = value else {
        anyhow::bail!("デプロイメントUUIDをキーとするオブジェクトが必要です");
    };
    // UUIDが使用済みなら新しいUUIDで取り込まれる
    let backends = &session.ctx.plugins.backends;
    for (_, exported) in deployments {
        let uuid = import_deployment(session.state(), backends, exported).await?;
        println!("{uuid}");
    }
    Ok(())
}
