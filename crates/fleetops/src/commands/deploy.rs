use crate::session::Session;
use crate::utils;
use crate::{DeployArgs, Selection};
use colored::Colorize;
use fleetops_engine::DeployOptions;

pub async fn deploy(session: &Session, args: &DeployArgs) -> anyhow::Result<()> {
    let mut deployment = session.deployment()?;
    let settings = &session.settings;
    let options = DeployOptions {
        dry_run: args.dry_run,
        build_only: args.build_only,
        create_only: args.create_only,
        copy_only: args.copy_only,
        check: args.check,
        allow_reboot: args.allow_reboot,
        force_reboot: args.force_reboot,
        allow_recreate: args.allow_recreate,
        kill_obsolete: args.kill_obsolete,
        include: args.selection.include.clone(),
        exclude: args.selection.exclude.clone(),
        max_concurrent_copy: args
            .max_concurrent_copy
            .unwrap_or(settings.max_concurrent_copy),
        max_concurrent_activate: args
            .max_concurrent_activate
            .unwrap_or(settings.max_concurrent_activate),
    };

    let report = deployment.deploy(&options).await?;

    // ドライランは計画の表示のみ
    if options.dry_run {
        println!("{}", "変更予定:".bold());
        utils::print_plan(&report.plan);
        return Ok(());
    }

    if !report.destroyed.is_empty() {
        println!("破棄: {}", report.destroyed.join(", "));
    }
    if let Some(build_id) = &report.build_id {
        println!("ビルド: {build_id}");
    }
    if !report.activated.is_empty() {
        println!("有効化: {}", report.activated.join(", ").cyan());
    }
    if let Some(generation) = report.generation {
        println!("世代: {generation}");
    }
    println!("{}", "✓ デプロイが完了しました".green().bold());
    Ok(())
}

pub async fn destroy(
    session: &Session,
    selection: &Selection,
    wipe: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let mut deployment = session.deployment()?;

    // --yes なしでは何も破棄しない
    if !yes {
        println!(
            "{}",
            "⚠ 選択したリソースとその上のデータをすべて破棄します".yellow()
        );
        println!("実行するには --yes オプションを指定してください");
        return Ok(());
    }

    let report = deployment
        .destroy_resources(&selection.include, &selection.exclude, wipe)
        .await?;
    for name in &report.kept {
        println!("  {} {} は残しました", "ℹ".dimmed(), name.cyan());
    }
    println!(
        "{}",
        format!("✓ {} 件のリソースを破棄しました", report.destroyed.len())
            .green()
            .bold()
    );
    Ok(())
}

pub async fn rollback(
    session: &Session,
    generation: i64,
    selection: &Selection,
    allow_reboot: bool,
    force_reboot: bool,
) -> anyhow::Result<()> {
    let deployment = session.deployment()?;
    let options = DeployOptions {
        allow_reboot,
        force_reboot,
        include: selection.include.clone(),
        exclude: selection.exclude.clone(),
        max_concurrent_activate: session.settings.max_concurrent_activate,
        ..Default::default()
    };
    let switched = deployment.rollback(generation, &options).await?;
    println!(
        "{}",
        format!(
            "✓ {} を世代 {generation} にロールバックしました",
            switched.join(", ")
        )
        .green()
        .bold()
    );
    Ok(())
}
