//! # xtask - 开发辅助工具
//!
//! 提供本地质量门禁与开发辅助命令。
//!
//! ## 命令
//!
//! - `check-all`: 运行 fmt、clippy、test
//! - `cov-core`: 运行 frame-sched 覆盖率
//! - `cov-workspace`: 运行 workspace 覆盖率
//! - `scenario-check`: 检查场景文件（结构、引用、可回放）

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use frame_host::{AppConfig, Scenario, run_scenario};
use walkdir::WalkDir;
use xshell::{Shell, cmd};

fn ensure_cargo_llvm_cov_available(sh: &Shell) -> anyhow::Result<()> {
    if cmd!(sh, "cargo llvm-cov --version").quiet().read().is_ok() {
        return Ok(());
    }
    anyhow::bail!(
        "cargo llvm-cov 不可用。\n\
请先安装：\n\
  - cargo install cargo-llvm-cov\n\
  - rustup component add llvm-tools-preview\n\
然后重试。"
    )
}

fn main() -> ExitCode {
    if let Err(e) = real_main() {
        eprintln!("xtask error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::from(0)
}

fn real_main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let sub = args.next().unwrap_or_else(|| "help".to_string());
    let sh = Shell::new()?;

    match sub.as_str() {
        "check-all" => {
            eprintln!("\n==> cargo fmt --all -- --check");
            cmd!(sh, "cargo fmt --all -- --check").run()?;

            eprintln!("\n==> cargo clippy --workspace --all-targets");
            cmd!(sh, "cargo clippy --workspace --all-targets").run()?;

            eprintln!("\n==> cargo test --workspace");
            cmd!(sh, "cargo test --workspace").run()?;
        }
        "cov-core" => {
            ensure_cargo_llvm_cov_available(&sh)?;

            eprintln!("\n==> cargo llvm-cov -p frame-sched --html");
            cmd!(sh, "cargo llvm-cov -p frame-sched --html").run()?;

            eprintln!("\nCoverage HTML: target/llvm-cov/html/index.html");
        }
        "cov-workspace" => {
            ensure_cargo_llvm_cov_available(&sh)?;

            // 排除 xtask，避免稀释调度核心与宿主的信号
            eprintln!("\n==> cargo llvm-cov --workspace --exclude xtask --html");
            cmd!(sh, "cargo llvm-cov --workspace --exclude xtask --html").run()?;

            eprintln!("\nCoverage HTML: target/llvm-cov/html/index.html");
        }
        "scenario-check" => {
            let mut path = None;
            let mut replay = false;
            for arg in args {
                match arg.as_str() {
                    "--run" => replay = true,
                    _ => path = Some(arg),
                }
            }
            scenario_check(path.as_deref(), replay)?;
        }
        "help" | "-h" | "--help" => {
            print_help();
        }
        other => anyhow::bail!("unknown xtask subcommand: {other}"),
    }

    Ok(())
}

fn print_help() {
    eprintln!(
        r#"xtask - 开发辅助工具

USAGE:
  cargo xtask <command>

COMMANDS:
  check-all       运行 fmt、clippy、test 门禁检查
  cov-core        运行 frame-sched 覆盖率报告
  cov-workspace   运行 workspace 覆盖率报告
  scenario-check  检查场景文件

SCENARIO-CHECK:
  cargo xtask scenario-check [path] [--run]

  不带路径：检查 scenarios/ 下所有 .json 文件（config.json 除外）
  带路径参数：检查指定文件或目录
  --run：用默认配置回放每个场景

  检查内容：
    - JSON 结构与字段取值
    - 生产者引用的元素、事件引用的生产者是否存在
    - 回放时是否有回调 panic

ALIASES (in .cargo/config.toml):
  cargo check-all      -> cargo xtask check-all
  cargo cov-core       -> cargo xtask cov-core
  cargo cov-workspace  -> cargo xtask cov-workspace
  cargo scenario-check -> cargo xtask scenario-check
"#
    );
}

//=============================================================================
// scenario-check 命令实现
//=============================================================================

/// 默认场景目录（相对于 workspace root）
const SCENARIOS_DIR: &str = "scenarios";

/// 场景检查结果
#[derive(Default)]
struct ScenarioCheckResult {
    checked: usize,
    failures: Vec<(PathBuf, String)>,
    warnings: Vec<(PathBuf, String)>,
}

/// 执行场景检查
fn scenario_check(path: Option<&str>, replay: bool) -> anyhow::Result<()> {
    let files = match path {
        Some(p) => {
            let path = PathBuf::from(p);
            if path.is_file() {
                vec![path]
            } else if path.is_dir() {
                collect_scenario_files(&path)
            } else {
                anyhow::bail!("路径不存在: {}", p);
            }
        }
        None => {
            let dir = Path::new(SCENARIOS_DIR);
            if !dir.exists() {
                anyhow::bail!(
                    "默认场景目录不存在: {}\n请在 workspace 根目录运行，或指定场景路径",
                    dir.display()
                );
            }
            collect_scenario_files(dir)
        }
    };

    if files.is_empty() {
        eprintln!("未找到场景文件（.json）");
        return Ok(());
    }

    eprintln!("==> 检查 {} 个场景文件...\n", files.len());

    let mut result = ScenarioCheckResult::default();
    for file in &files {
        check_scenario_file(file, replay, &mut result);
    }

    print_check_result(&result);

    if !result.failures.is_empty() {
        anyhow::bail!("场景检查发现错误");
    }
    Ok(())
}

/// 收集目录下的所有场景文件
fn collect_scenario_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter(|path| path.file_name().is_some_and(|name| name != "config.json"))
        .collect();
    files.sort();
    files
}

/// 检查单个场景文件
fn check_scenario_file(file: &Path, replay: bool, result: &mut ScenarioCheckResult) {
    result.checked += 1;

    let scenario = match Scenario::load(file) {
        Ok(s) => s,
        Err(e) => {
            result.failures.push((file.to_path_buf(), e.to_string()));
            return;
        }
    };

    if scenario.events.is_empty() {
        result
            .warnings
            .push((file.to_path_buf(), "场景没有任何事件".to_string()));
    }

    if !replay {
        return;
    }

    match run_scenario(scenario, AppConfig::default()) {
        Ok(report) => {
            if report.frames.failed_callbacks > 0 {
                result.failures.push((
                    file.to_path_buf(),
                    format!("回放时有 {} 次回调 panic", report.frames.failed_callbacks),
                ));
            }
            for counter in report.counters.iter().filter(|c| !c.started) {
                result.warnings.push((
                    file.to_path_buf(),
                    format!("计数器 '{}' 从未触发", counter.id),
                ));
            }
            for progress in report.progress.iter().filter(|p| !p.complete) {
                result.warnings.push((
                    file.to_path_buf(),
                    format!("进度条 '{}' 未完成", progress.id),
                ));
            }
        }
        Err(e) => {
            result
                .failures
                .push((file.to_path_buf(), format!("回放失败 - {e}")));
        }
    }
}

/// 输出检查结果
fn print_check_result(result: &ScenarioCheckResult) {
    eprintln!("─────────────────────────────────────────────────────");
    eprintln!("检查完成: {} 个场景", result.checked);
    eprintln!();

    for (file, message) in &result.failures {
        eprintln!("[ERROR] {}: {}", file.display(), message);
    }
    for (file, message) in &result.warnings {
        eprintln!("[WARN] {}: {}", file.display(), message);
    }

    let error_count = result.failures.len();
    let warn_count = result.warnings.len();

    eprintln!();
    if error_count > 0 {
        eprintln!("❌ {} 个错误, {} 个警告", error_count, warn_count);
    } else if warn_count > 0 {
        eprintln!("⚠️  0 个错误, {} 个警告", warn_count);
    } else {
        eprintln!("✅ 检查通过，无错误");
    }
}
