mod commands;
mod session;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use fleetops_config::Settings;
use session::Session;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetops")]
#[command(about = "KDLで記述したマシン群をデプロイ・運用する", long_about = None)]
#[command(version)]
struct Cli {
    /// ステートファイル (デフォルト: ~/.fleetops/deployments.json)
    #[arg(short, long, env = "FLEETOPS_STATE", global = true)]
    state: Option<PathBuf>,

    /// デプロイメント名またはUUID (-d/--deployment フラグ、FLEETOPS_DEPLOYMENT 環境変数)
    #[arg(short, long, env = "FLEETOPS_DEPLOYMENT", global = true)]
    deployment: Option<String>,

    /// 詳細なログを出力
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// リソース名のフィルタ（--include 未指定時は全リソース）
#[derive(Args, Debug, Clone, Default)]
pub struct Selection {
    /// 対象にするリソース
    #[arg(long, value_name = "NAME", num_args = 1..)]
    pub include: Vec<String>,
    /// 除外するリソース
    #[arg(long, value_name = "NAME", num_args = 1..)]
    pub exclude: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// デプロイメントを作成
    Create {
        /// デプロイメントを記述したKDLファイル
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// デプロイメントの名前・説明・ソースを変更
    Modify {
        sources: Vec<PathBuf>,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// 設定をコピーして空のデプロイメントを作成
    Clone {
        #[arg(short, long)]
        name: Option<String>,
    },
    /// デプロイメントを削除
    Delete {
        /// 残っているリソースを破棄せずに忘れる
        #[arg(long)]
        force: bool,
    },
    /// デプロイメントの一覧を表示
    List,
    /// デプロイメントのリソースを表示
    Info {
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// リソースを作成し構成を有効化
    Deploy(DeployArgs),
    /// リソースを破棄
    Destroy {
        #[command(flatten)]
        selection: Selection,
        /// 通常は残るデータも消去する
        #[arg(long)]
        wipe: bool,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// リソースを破棄せずにステートから削除
    #[command(name = "delete-resources")]
    DeleteResources {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// リソースの状態を確認
    Check {
        #[command(flatten)]
        selection: Selection,
    },
    /// マシンを起動
    Start {
        #[command(flatten)]
        selection: Selection,
    },
    /// マシンを停止
    Stop {
        #[command(flatten)]
        selection: Selection,
    },
    /// マシンを再起動し、到達可能になるまで待機
    Reboot {
        #[command(flatten)]
        selection: Selection,
        /// 通常の再起動ではなく電源を入れ直す
        #[arg(long)]
        hard: bool,
    },
    /// マシンをバックアップ
    Backup {
        #[command(flatten)]
        selection: Selection,
    },
    /// バックアップの一覧を表示
    #[command(name = "list-backups")]
    ListBackups,
    /// バックアップからマシンを復元
    Restore {
        #[arg(long)]
        backup_id: String,
        #[command(flatten)]
        selection: Selection,
    },
    /// 以前の世代の構成を有効化
    Rollback {
        generation: i64,
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        allow_reboot: bool,
        #[arg(long)]
        force_reboot: bool,
    },
    /// リソース名を変更
    Rename { from: String, to: String },
    /// デプロイメント引数を設定・解除
    #[command(name = "set-args")]
    SetArgs {
        /// KEY=VALUE
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        args: Vec<(String, String)>,
        #[arg(long, value_name = "KEY")]
        unset: Vec<String>,
    },
    /// デプロイメントをJSONで出力
    Export {
        /// 選択中のものではなく全デプロイメント
        #[arg(long)]
        all: bool,
    },
    /// JSONファイルからデプロイメントを取り込む（`-` で標準入力）
    Import { file: PathBuf },
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub selection: Selection,
    /// 変更内容を表示して終了
    #[arg(long)]
    pub dry_run: bool,
    /// リソースを作成せずに構成のみビルド
    #[arg(long)]
    pub build_only: bool,
    /// リソースの作成のみ（ビルド・有効化はしない）
    #[arg(long)]
    pub create_only: bool,
    /// 構成のコピーまで（有効化はしない）
    #[arg(long)]
    pub copy_only: bool,
    /// リモートにリソースが残っているか確認
    #[arg(long)]
    pub check: bool,
    #[arg(long)]
    pub allow_reboot: bool,
    #[arg(long)]
    pub force_reboot: bool,
    /// リモートで消えたリソースを再作成
    #[arg(long)]
    pub allow_recreate: bool,
    /// 定義から外れたリソースを破棄
    #[arg(long)]
    pub kill_obsolete: bool,
    /// -1 でマシンごとに1ワーカー
    #[arg(long, allow_negative_numbers = true)]
    pub max_concurrent_copy: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    pub max_concurrent_activate: Option<i64>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("KEY=VALUE 形式で指定してください: '{s}'")),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

/// コマンドに必要なロック
fn lock_mode(command: &Commands) -> (&'static str, bool) {
    match command {
        Commands::List => ("list", false),
        Commands::Info { .. } => ("info", false),
        Commands::ListBackups => ("list-backups", false),
        Commands::Export { .. } => ("export", false),
        Commands::Create { .. } => ("create", true),
        Commands::Modify { .. } => ("modify", true),
        Commands::Clone { .. } => ("clone", true),
        Commands::Delete { .. } => ("delete", true),
        Commands::Deploy(_) => ("deploy", true),
        Commands::Destroy { .. } => ("destroy", true),
        Commands::DeleteResources { .. } => ("delete-resources", true),
        Commands::Check { .. } => ("check", true),
        Commands::Start { .. } => ("start", true),
        Commands::Stop { .. } => ("stop", true),
        Commands::Reboot { .. } => ("reboot", true),
        Commands::Backup { .. } => ("backup", true),
        Commands::Restore { .. } => ("restore", true),
        Commands::Rollback { .. } => ("rollback", true),
        Commands::Rename { .. } => ("rename", true),
        Commands::SetArgs { .. } => ("set-args", true),
        Commands::Import { .. } => ("import", true),
    }
}

/// コマンドを実行し、終了コードを返す
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut settings = Settings::load()?;
    if let Some(state) = cli.state {
        settings.state_file = Some(state);
    }
    if let Some(deployment) = cli.deployment {
        settings.deployment = Some(deployment);
    }

    let (description, exclusive) = lock_mode(&cli.command);
    let session = Session::open(settings, description, exclusive).await?;

    let code = match cli.command {
        Commands::Create {
            sources,
            name,
            description,
        } => {
            commands::deployments::create(&session, sources, name, description).await?;
            0
        }
        Commands::Modify {
            sources,
            name,
            description,
        } => {
            commands::deployments::modify(&session, sources, name, description).await?;
            0
        }
        Commands::Clone { name } => {
            commands::deployments::clone(&session, name).await?;
            0
        }
        Commands::Delete { force } => {
            commands::deployments::delete(&session, force).await?;
            0
        }
        Commands::List => {
            commands::deployments::list(&session);
            0
        }
        Commands::Info { json } => {
            commands::deployments::info(&session, json)?;
            0
        }
        Commands::Deploy(args) => {
            commands::deploy::deploy(&session, &args).await?;
            0
        }
        Commands::Destroy {
            selection,
            wipe,
            yes,
        } => {
            commands::deploy::destroy(&session, &selection, wipe, yes).await?;
            0
        }
        Commands::DeleteResources { names } => {
            commands::resources::delete_resources(&session, &names).await?;
            0
        }
        Commands::Check { selection } => commands::machines::check(&session, &selection).await?,
        Commands::Start { selection } => {
            commands::machines::start(&session, &selection).await?;
            0
        }
        Commands::Stop { selection } => {
            commands::machines::stop(&session, &selection).await?;
            0
        }
        Commands::Reboot { selection, hard } => {
            commands::machines::reboot(&session, &selection, hard).await?;
            0
        }
        Commands::Backup { selection } => {
            commands::machines::backup(&session, &selection).await?;
            0
        }
        Commands::ListBackups => {
            commands::machines::list_backups(&session)?;
            0
        }
        Commands::Restore {
            backup_id,
            selection,
        } => {
            commands::machines::restore(&session, &selection, &backup_id).await?;
            0
        }
        Commands::Rollback {
            generation,
            selection,
            allow_reboot,
            force_reboot,
        } => {
            commands::deploy::rollback(
                &session,
                generation,
                &selection,
                allow_reboot,
                force_reboot,
            )
            .await?;
            0
        }
        Commands::Rename { from, to } => {
            commands::resources::rename(&session, &from, &to).await?;
            0
        }
        Commands::SetArgs { args, unset } => {
            commands::deployments::set_args(&session, &args, &unset).await?;
            0
        }
        Commands::Export { all } => {
            commands::deployments::export(&session, all)?;
            0
        }
        Commands::Import { file } => {
            commands::deployments::import(&session, &file).await?;
            0
        }
    };

    session.close().await?;
    Ok(code)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "エラー:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}
