//! # frame-host
//!
//! ## 用法
//!
//! ```bash
//! cargo run -p frame-host -- run --scenario scenarios/landing.json
//! cargo run -p frame-host -- run --scenario scenarios/landing.json --fps 30 --jitter-ms 4 --json
//! cargo run -p frame-host -- check scenarios/*.json
//! cargo run -p frame-host -- default-config > config.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frame_host::{AppConfig, Scenario, run_scenario};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "frame-host")]
#[command(about = "帧调度无界面宿主 - 回放场景并输出遥测报告")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 日志级别（覆盖配置文件）
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行场景
    Run {
        /// 场景文件
        #[arg(short, long)]
        scenario: PathBuf,

        /// 配置文件（默认：config.json）
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// 覆盖目标帧率
        #[arg(long)]
        fps: Option<f64>,

        /// 覆盖帧间隔抖动（毫秒）
        #[arg(long)]
        jitter_ms: Option<f64>,

        /// 以 JSON 输出报告
        #[arg(long)]
        json: bool,
    },

    /// 检查场景文件
    Check {
        /// 场景文件列表
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// 输出默认配置
    DefaultConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "执行失败");
            eprintln!("错误: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            scenario,
            config,
            fps,
            jitter_ms,
            json,
        } => {
            // 日志系统初始化之后再报告配置加载结果
            let (mut app_config, load_error) = match AppConfig::try_load(&config) {
                Ok(loaded) => (loaded, None),
                Err(e) => (AppConfig::default(), Some(e)),
            };
            if let Some(level) = cli.log_level {
                app_config.debug.log_level = level;
            }
            if let Some(fps) = fps {
                app_config.clock.fps = fps;
            }
            if let Some(jitter_ms) = jitter_ms {
                app_config.clock.jitter_ms = jitter_ms;
            }
            init_logging(&app_config)?;
            match load_error {
                None => info!(path = ?config, "配置文件加载成功"),
                Some(e) => warn!(error = %e, "配置文件不可用，使用默认配置"),
            }
            app_config.validate().context("配置无效")?;

            let scenario = Scenario::load(&scenario)
                .with_context(|| format!("无法加载场景 {}", scenario.display()))?;
            let report = run_scenario(scenario, app_config)?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.summary());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { files } => {
            let mut config = AppConfig::default();
            if let Some(level) = cli.log_level {
                config.debug.log_level = level;
            }
            init_logging(&config)?;

            let mut failed = 0;
            for file in &files {
                match Scenario::load(file) {
                    Ok(scenario) => {
                        info!(path = ?file, name = %scenario.name, "场景检查通过");
                        println!("✅ {}", file.display());
                    }
                    Err(e) => {
                        failed += 1;
                        println!("❌ {}: {e}", file.display());
                    }
                }
            }
            println!("检查 {} 个场景，{failed} 个失败", files.len());
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::DefaultConfig => {
            println!("{}", AppConfig::default().to_json()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 初始化日志（输出到 stderr，stdout 留给报告）
fn init_logging(config: &AppConfig) -> Result<()> {
    let level = config.log_level()?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
