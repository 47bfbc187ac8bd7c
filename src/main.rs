// ==========================================
// 抽签分配引擎 - 命令行入口
// ==========================================
// 用法:
//   lottery-engine [db_path] <lottery_id> [--mismatch-allowed] [--invalidate]
//
// 省略 db_path 时使用 LOTTERY_ENGINE_DB_PATH 或用户数据目录
// 执行一次抽签并等待结果，以 JSON 输出
// ==========================================

use anyhow::{anyhow, bail, Context};
use lottery_engine::app::{get_default_db_path, AppState};
use lottery_engine::domain::{ExecutionOptions, LotteryId};
use lottery_engine::{ExecutionError, ExecutionOutcome};

const USAGE: &str =
    "用法: lottery-engine [db_path] <lottery_id> [--mismatch-allowed] [--invalidate]";

struct CliArgs {
    db_path: String,
    lottery_id: LotteryId,
    options: ExecutionOptions,
    invalidate: bool,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    let mut invalidate = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--invalidate" => invalidate = true,
            "-h" | "--help" => bail!(USAGE),
            s if s.starts_with("--") => flags.push(arg),
            _ => positional.push(arg),
        }
    }

    let (db_path, raw_id) = match positional.as_slice() {
        [id] => (get_default_db_path(), id.clone()),
        [db, id] => (db.clone(), id.clone()),
        _ => bail!(USAGE),
    };

    let lottery_id = raw_id
        .parse::<LotteryId>()
        .with_context(|| format!("无效的 lottery_id: {}", raw_id))?;
    let options = ExecutionOptions::from_flags(&flags)?;

    Ok(CliArgs {
        db_path,
        lottery_id,
        options,
        invalidate,
    })
}

/// 技术错误在内层，本地化消息在外层
fn with_user_message(err: ExecutionError) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lottery_engine::logging::init();
    lottery_engine::i18n::init_from_env();

    let args = parse_args()?;

    tracing::info!("==================================================");
    tracing::info!("{} v{}", lottery_engine::APP_NAME, lottery_engine::VERSION);
    tracing::info!("==================================================");

    let state = AppState::new(args.db_path.clone()).map_err(|e| anyhow!(e))?;
    let service = state.execution_service.clone();

    if args.invalidate {
        let report = service
            .invalidate(args.lottery_id)
            .map_err(with_user_message)?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let ticket = service
        .execute(args.lottery_id, args.options)
        .await
        .map_err(with_user_message)?;

    let outcome = ticket.wait().await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome {
        ExecutionOutcome::Executed { .. } => Ok(()),
        ExecutionOutcome::Failed { user_message, .. } => Err(anyhow!(user_message)),
    }
}
