//! Everything one command needs: settings, plugins, the locked state file

use anyhow::Context;
use fleetops_backends::{BuiltinPlugin, SshOptions, SshTransport};
use fleetops_config::Settings;
use fleetops_core::KdlEvaluator;
use fleetops_engine::{
    BundleBuilder, Deployment, DeploymentContext, Interrupt, PluginRegistry, WaitConfig,
};
use fleetops_state::{LockGuard, StateFile, acquire};
use std::sync::Arc;

pub struct Session {
    pub settings: Settings,
    pub ctx: DeploymentContext,
    lock: LockGuard,
}

fn ssh_options(settings: &Settings) -> SshOptions {
    SshOptions {
        identity_file: settings.ssh.identity_file.clone(),
        connect_timeout: settings.ssh.connect_timeout,
        strict_host_key_checking: settings.ssh.strict_host_key_checking,
        extra_args: settings.ssh.extra_args.clone(),
    }
}

impl Session {
    /// コマンド実行中はステートファイルをロックして読み込む
    pub async fn open(settings: Settings, description: &str, exclusive: bool) -> anyhow::Result<Self> {
        let state_path = settings.state_file()?;
        let transport = Arc::new(SshTransport::new(ssh_options(&settings)));
        let plugin = BuiltinPlugin::new(transport.clone());
        let plugins = PluginRegistry::with_plugins(&[&plugin]);

        let storage = plugins.storage(&settings.storage, &state_path)?;
        let lock_backend = plugins.lock(&settings.lock, &state_path)?;
        let lock = acquire(lock_backend.clone(), description, exclusive)
            .await
            .with_context(|| format!("{} をロックできません", state_path.display()))?;

        let state = StateFile::open(&state_path, storage, lock_backend)
            .await
            .with_context(|| format!("{} を開けません", state_path.display()))?;
        tracing::debug!(state = ?state, command = description, "Session opened");

        let interrupt = Interrupt::new();
        interrupt.install_ctrl_c();

        let ctx = DeploymentContext {
            state: Arc::new(state),
            plugins: Arc::new(plugins),
            evaluator: Arc::new(KdlEvaluator::new().with_env_variables()),
            transport,
            builder: Arc::new(BundleBuilder::new(settings.build_dir()?)),
            interrupt,
            wait: WaitConfig::default(),
        };

        Ok(Self {
            settings,
            ctx,
            lock,
        })
    }

    /// `--deployment` で選択したデプロイメント（1つしかなければそれ）
    pub fn deployment(&self) -> anyhow::Result<Deployment> {
        let selector = self.settings.deployment.as_deref();
        Deployment::find(self.ctx.clone(), selector).with_context(|| match selector {
            Some(selector) => format!("デプロイメント '{selector}' を読み込めません"),
            None => "--deployment または FLEETOPS_DEPLOYMENT でデプロイメントを指定してください".to_string(),
        })
    }

    pub fn state(&self) -> &StateFile {
        &self.ctx.state
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.lock.release().await?;
        Ok(())
    }
}
